//! Encoder, dispatcher and output configuration.

use std::path::PathBuf;

/// How the `size` field of a record is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizePolicy {
    /// Every instruction has the same length (4 on fixed-width ISAs).
    Fixed(u8),
    /// Use the length reported by the decoder.
    Measured,
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self::Fixed(4)
    }
}

/// Which address of a memory access is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressSpace {
    Virtual,
    #[default]
    Physical,
}

/// Configuration for a single per-core encoder.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub size_policy: SizePolicy,
    /// Emit the last pending record when the stream is finished. When false
    /// the final instruction of a run is dropped.
    pub flush_pending_on_end: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            size_policy: SizePolicy::default(),
            flush_pending_on_end: true,
        }
    }
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of emulated cores.
    pub num_cores: usize,
    pub address_space: AddressSpace,
    pub encoder: EncoderConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            num_cores: 1,
            address_space: AddressSpace::default(),
            encoder: EncoderConfig::default(),
        }
    }
}

/// Configuration for file-backed, zstd-compressed trace output.
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Directory the trace files are created in.
    pub out_dir: PathBuf,
    /// File name prefix, files are named `{prefix}_{run}-{core}.log.zst`.
    pub prefix: String,
    /// zstd compression level.
    pub compression_level: i32,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            prefix: "trace".to_string(),
            compression_level: 3,
        }
    }
}

impl FileSinkConfig {
    /// Path of the trace file for a given run and core.
    pub fn trace_path(&self, run: u64, core: usize) -> PathBuf {
        self.out_dir
            .join(format!("{}_{}-{}.log.zst", self.prefix, run, core))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.num_cores, 1);
        assert_eq!(config.address_space, AddressSpace::Physical);
        assert_eq!(config.encoder.size_policy, SizePolicy::Fixed(4));
        assert!(config.encoder.flush_pending_on_end);
    }

    #[test]
    fn test_trace_path() {
        let config = FileSinkConfig {
            out_dir: PathBuf::from("/tmp/out"),
            prefix: "run".to_string(),
            compression_level: 1,
        };
        assert_eq!(
            config.trace_path(2, 3),
            PathBuf::from("/tmp/out/run_2-3.log.zst")
        );
    }
}
