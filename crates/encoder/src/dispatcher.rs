//! Routes engine callbacks to per-core encoders and manages trace streams.

use crate::config::{AddressSpace, DispatcherConfig};
use crate::encoder::{EncoderError, EncoderStats, TraceEncoder};
use crate::log::DebugLog;
use crate::sink::SinkFactory;
use qtrace_core::{CoreId, DecodedInsn, Decoder, TraceEvent};
use std::io;
use thiserror::Error;

/// Errors produced by the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("core {core} out of range (machine has {num_cores} cores)")]
    UnknownCore { core: CoreId, num_cores: usize },

    #[error("failed to open trace stream for run {run}, core {core}: {source}")]
    OpenSink {
        run: u64,
        core: CoreId,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Encoder(#[from] EncoderError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Lifecycle of the traced program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No program has started yet.
    Idle,
    /// Streams are open and events are traced.
    Running,
    /// The last program ended; events are ignored until the next start.
    Finished,
}

/// Counters for one [`TraceDispatcher::replay`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: u64,
    pub runs: u64,
    pub fetches_traced: u64,
    pub fetches_skipped: u64,
    pub memory_accesses: u64,
    /// Events that arrived outside a running program.
    pub ignored: u64,
    /// Events rejected because their core's stream had failed.
    pub failed: u64,
}

/// Owns one encoder per core and the output stream lifecycle.
pub struct TraceDispatcher<F: SinkFactory> {
    config: DispatcherConfig,
    factory: F,
    encoders: Vec<TraceEncoder>,
    state: RunState,
    runs: u64,
}

impl<F: SinkFactory> TraceDispatcher<F> {
    pub fn new(config: DispatcherConfig, factory: F) -> Self {
        let encoders = (0..config.num_cores)
            .map(|core| TraceEncoder::new(core, config.encoder.clone()))
            .collect();
        Self {
            config,
            factory,
            encoders,
            state: RunState::Idle,
            runs: 0,
        }
    }

    /// Install a debug log on every core.
    pub fn set_debug_log<L>(&mut self, mut make: L)
    where
        L: FnMut(CoreId) -> Box<dyn DebugLog>,
    {
        for encoder in &mut self.encoders {
            encoder.set_debug_log(make(encoder.core()));
        }
    }

    pub fn num_cores(&self) -> usize {
        self.encoders.len()
    }

    /// Number of program runs started so far.
    pub fn run_count(&self) -> u64 {
        self.runs
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn has_finished(&self) -> bool {
        self.state == RunState::Finished
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn encoder(&self, core: CoreId) -> Option<&TraceEncoder> {
        self.encoders.get(core)
    }

    /// Counters of the current (or last) run, one entry per core.
    pub fn stats(&self) -> Vec<EncoderStats> {
        self.encoders.iter().map(TraceEncoder::stats).collect()
    }

    /// Open a fresh stream per core for a new run. A run still open is
    /// ended first. Returns the index of the new run.
    ///
    /// If any stream fails to open, the streams already opened are closed and
    /// the dispatcher is left `Finished`.
    pub fn on_program_start(&mut self) -> Result<u64> {
        if self.state == RunState::Running {
            tracing::warn!(run = self.runs - 1, "program started while a run is open, rotating");
            if let Err(e) = self.close_run() {
                tracing::warn!(error = %e, "error closing previous run");
            }
        }

        // Run indices are never reused, even when opening fails.
        let run = self.runs;
        self.runs += 1;
        if let Err(e) = self.open_streams(run) {
            self.state = RunState::Finished;
            if let Err(close) = self.close_run() {
                tracing::warn!(run, error = %close, "error closing partially opened run");
            }
            return Err(e);
        }

        self.state = RunState::Running;
        tracing::info!(run, cores = self.encoders.len(), "program started");
        Ok(run)
    }

    /// End the current run and close every stream.
    ///
    /// All cores are closed even if some fail; the first failure is returned.
    pub fn on_program_end(&mut self) -> Result<Vec<EncoderStats>> {
        if self.state != RunState::Running {
            tracing::debug!(state = ?self.state, "program end without a running program");
            return Ok(Vec::new());
        }

        self.state = RunState::Finished;
        let result = self.close_run();
        let stats = self.stats();
        let emitted: u64 = stats.iter().map(|s| s.emitted).sum();
        tracing::info!(run = self.runs - 1, records = emitted, "program ended");
        result.map(|()| stats)
    }

    /// Route a decoded fetch to `core`'s encoder.
    ///
    /// `Ok(false)` means nothing was traced: no program is running or the
    /// descriptor had no operand detail.
    pub fn on_fetch(&mut self, core: CoreId, insn: &DecodedInsn) -> Result<bool> {
        if self.state != RunState::Running {
            return Ok(false);
        }
        let encoder = self.encoder_mut(core)?;
        Ok(encoder.on_fetch(insn)?)
    }

    /// Decode `bytes` fetched at `vaddr` and route the result to `core`.
    /// Bytes the decoder rejects are treated like a descriptor without detail.
    pub fn on_fetch_bytes<D: Decoder>(
        &mut self,
        decoder: &mut D,
        core: CoreId,
        vaddr: u64,
        bytes: &[u8],
    ) -> Result<bool> {
        if self.state != RunState::Running {
            return Ok(false);
        }
        let insn = match decoder.decode(vaddr, bytes) {
            Some(mut insn) => {
                insn.address = vaddr;
                insn
            }
            None => DecodedInsn::without_detail(vaddr, 0, bytes.len() as u8),
        };
        self.on_fetch(core, &insn)
    }

    /// Route a memory access to `core`'s encoder.
    pub fn on_memory_access(
        &mut self,
        core: CoreId,
        vaddr: u64,
        paddr: u64,
        size: u8,
        is_write: bool,
    ) -> Result<bool> {
        if self.state != RunState::Running {
            return Ok(false);
        }
        let addr = match self.config.address_space {
            AddressSpace::Virtual => vaddr,
            AddressSpace::Physical => paddr,
        };
        let encoder = self.encoder_mut(core)?;
        Ok(encoder.on_memory_access(addr, size, is_write)?)
    }

    /// Dispatch a single recorded event.
    pub fn dispatch(&mut self, event: &TraceEvent) -> Result<bool> {
        match event {
            TraceEvent::ProgramStart => self.on_program_start().map(|_| true),
            TraceEvent::ProgramEnd => self.on_program_end().map(|_| true),
            TraceEvent::Fetch { core, insn } => self.on_fetch(*core, insn),
            TraceEvent::MemoryAccess {
                core,
                vaddr,
                paddr,
                size,
                is_write,
            } => self.on_memory_access(*core, *vaddr, *paddr, *size, *is_write),
        }
    }

    /// Drive the dispatcher from a recorded event sequence.
    ///
    /// A core whose stream fails keeps rejecting its events for the rest of
    /// the run while the other cores continue. Unknown cores and sinks that
    /// cannot be opened abort the replay.
    pub fn replay<I>(&mut self, events: I) -> Result<ReplaySummary>
    where
        I: IntoIterator<Item = TraceEvent>,
    {
        let mut summary = ReplaySummary::default();
        for event in events {
            summary.events += 1;
            let running = self.state == RunState::Running;

            match self.dispatch(&event) {
                Ok(traced) => match event {
                    TraceEvent::ProgramStart => summary.runs += 1,
                    TraceEvent::ProgramEnd => {}
                    _ if !running => summary.ignored += 1,
                    TraceEvent::Fetch { .. } if traced => summary.fetches_traced += 1,
                    TraceEvent::Fetch { .. } => summary.fetches_skipped += 1,
                    TraceEvent::MemoryAccess { .. } => summary.memory_accesses += 1,
                },
                Err(DispatchError::Encoder(e)) => {
                    tracing::warn!(error = %e, "event rejected");
                    summary.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    fn encoder_mut(&mut self, core: CoreId) -> Result<&mut TraceEncoder> {
        let num_cores = self.encoders.len();
        self.encoders
            .get_mut(core)
            .ok_or(DispatchError::UnknownCore { core, num_cores })
    }

    fn open_streams(&mut self, run: u64) -> Result<()> {
        for encoder in &mut self.encoders {
            let core = encoder.core();
            let sink = self
                .factory
                .open(run, core)
                .map_err(|source| DispatchError::OpenSink { run, core, source })?;
            encoder.attach(sink);
        }
        Ok(())
    }

    fn close_run(&mut self) -> Result<()> {
        let mut first_err = None;
        for encoder in &mut self.encoders {
            if !encoder.is_attached() {
                continue;
            }
            if let Err(e) = encoder.finish() {
                tracing::warn!(core = encoder.core(), error = %e, "failed to close trace stream");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl<F: SinkFactory> Drop for TraceDispatcher<F> {
    fn drop(&mut self) {
        if self.state == RunState::Running {
            if let Err(e) = self.close_run() {
                tracing::warn!(error = %e, "error closing trace streams on drop");
            }
        }
    }
}
