//! Output sinks for packed trace records.
//!
//! A sink is an append-only byte stream owned by one encoder. Every run of
//! the traced program gets a fresh sink per core from a [`SinkFactory`].

use crate::config::FileSinkConfig;
use qtrace_core::{CoreId, TraceReader, TraceRecord};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Append-only destination for one core's trace.
pub trait TraceSink: Write + Send {
    /// Flush and finalize the stream. Called once when the run ends.
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush()
    }
}

/// Opens one sink per (run, core) pair.
pub trait SinkFactory {
    fn open(&mut self, run: u64, core: CoreId) -> io::Result<Box<dyn TraceSink>>;
}

impl<F> SinkFactory for F
where
    F: FnMut(u64, CoreId) -> io::Result<Box<dyn TraceSink>>,
{
    fn open(&mut self, run: u64, core: CoreId) -> io::Result<Box<dyn TraceSink>> {
        self(run, core)
    }
}

// =========================================================================
// zstd file sink
// =========================================================================

/// zstd-compressed trace file.
pub struct ZstdFileSink {
    path: PathBuf,
    encoder: zstd::stream::write::Encoder<'static, BufWriter<File>>,
}

impl ZstdFileSink {
    pub fn create<P: AsRef<Path>>(path: P, level: i32) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), level)?;
        Ok(Self { path, encoder })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for ZstdFileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl TraceSink for ZstdFileSink {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let this = *self;
        let mut inner = this.encoder.finish()?;
        inner.flush()
    }
}

/// Creates `{prefix}_{run}-{core}.log.zst` files under the output directory.
pub struct FileSinkFactory {
    config: FileSinkConfig,
}

impl FileSinkFactory {
    pub fn new(config: FileSinkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FileSinkConfig {
        &self.config
    }
}

impl SinkFactory for FileSinkFactory {
    fn open(&mut self, run: u64, core: CoreId) -> io::Result<Box<dyn TraceSink>> {
        fs::create_dir_all(&self.config.out_dir)?;
        let path = self.config.trace_path(run, core);
        tracing::debug!(path = %path.display(), run, core, "opening trace file");
        let sink = ZstdFileSink::create(path, self.config.compression_level)?;
        Ok(Box::new(sink))
    }
}

/// Open a zstd-compressed trace file for reading.
pub fn open_trace_file<P: AsRef<Path>>(
    path: P,
) -> io::Result<TraceReader<zstd::stream::read::Decoder<'static, BufReader<File>>>> {
    let file = File::open(path)?;
    let decoder = zstd::stream::read::Decoder::new(file)?;
    Ok(TraceReader::new(decoder))
}

// =========================================================================
// In-memory sink
// =========================================================================

/// Shared, growable byte buffer. Clones see the same bytes.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the bytes written so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Decode every complete record written so far.
    pub fn records(&self) -> qtrace_core::record::Result<Vec<TraceRecord>> {
        let bytes = self.bytes();
        TraceReader::new(bytes.as_slice()).collect()
    }
}

/// Uncompressed sink backed by a [`SharedBuffer`].
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: SharedBuffer,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink appending to an existing buffer.
    pub fn from_buffer(buffer: SharedBuffer) -> Self {
        Self { buffer }
    }

    /// Handle to the bytes this sink writes.
    pub fn buffer(&self) -> SharedBuffer {
        self.buffer.clone()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TraceSink for MemorySink {}

/// Hands out [`MemorySink`]s and keeps a handle to each one.
#[derive(Debug, Default)]
pub struct MemorySinkFactory {
    opened: Vec<(u64, CoreId, SharedBuffer)>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer of the sink opened for `(run, core)`.
    pub fn buffer(&self, run: u64, core: CoreId) -> Option<SharedBuffer> {
        self.opened
            .iter()
            .find(|(r, c, _)| *r == run && *c == core)
            .map(|(_, _, buf)| buf.clone())
    }

    /// Number of sinks opened so far.
    pub fn opened(&self) -> usize {
        self.opened.len()
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(&mut self, run: u64, core: CoreId) -> io::Result<Box<dyn TraceSink>> {
        let sink = MemorySink::new();
        self.opened.push((run, core, sink.buffer()));
        Ok(Box::new(sink))
    }
}
