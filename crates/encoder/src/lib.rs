//! Instruction trace encoder for emulated multi-core machines.
//!
//! The emulator pushes fetch and memory-access callbacks for each core; this
//! crate turns them into fixed-layout [`TraceRecord`](qtrace_core::TraceRecord)
//! streams, one per (program run, core).
//!
//! # Architecture
//!
//! ```text
//!   engine callbacks / recorded events
//!                  │
//!   ┌──────────────▼──────────────┐
//!   │       TraceDispatcher       │  run lifecycle, demux by core id
//!   └──────┬───────────────┬──────┘
//!          │               │
//!   ┌──────▼──────┐ ┌──────▼──────┐
//!   │TraceEncoder │ │TraceEncoder │  two-slot delayed commit
//!   │   core 0    │ │   core N    │
//!   └──────┬──────┘ └──────┬──────┘
//!          │               │
//!   ┌──────▼──────┐ ┌──────▼──────┐
//!   │  TraceSink  │ │  TraceSink  │  zstd file or memory
//!   └─────────────┘ └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use qtrace_core::{DecodedInsn, InsnDetail, InsnGroup, Operand};
//! use qtrace_encoder::{DispatcherConfig, MemorySinkFactory, TraceDispatcher};
//!
//! let mut dispatcher = TraceDispatcher::new(DispatcherConfig::default(), MemorySinkFactory::new());
//! dispatcher.on_program_start().unwrap();
//!
//! let jump = InsnDetail {
//!     operands: vec![Operand::Imm(0x1000)],
//!     groups: vec![InsnGroup::Jump],
//!     ..Default::default()
//! };
//! dispatcher.on_fetch(0, &DecodedInsn::new(0x1000, 1, 4, jump)).unwrap();
//! dispatcher.on_fetch(0, &DecodedInsn::new(0x2000, 2, 4, InsnDetail::default())).unwrap();
//! dispatcher.on_program_end().unwrap();
//!
//! let records = dispatcher.factory().buffer(0, 0).unwrap().records().unwrap();
//! assert!(records[0].actually_taken);
//! ```

pub mod config;
pub mod dispatcher;
pub mod encoder;
pub mod log;
pub mod sink;

// Re-export commonly used types
pub use config::{AddressSpace, DispatcherConfig, EncoderConfig, FileSinkConfig, SizePolicy};
pub use dispatcher::{DispatchError, ReplaySummary, RunState, TraceDispatcher};
pub use encoder::{EncoderError, EncoderStats, Role, TraceEncoder};
pub use log::{DebugLog, NoopLog, TracingLog};
pub use sink::{
    open_trace_file, FileSinkFactory, MemorySink, MemorySinkFactory, SharedBuffer, SinkFactory,
    TraceSink, ZstdFileSink,
};
