//! Core types for qtrace.
//!
//! This crate provides the data model shared by the encoder and its tools:
//! - The fixed-layout [`TraceRecord`] and its binary encoding
//! - Decoded instruction descriptors and the [`Decoder`] seam
//! - Engine callback events for live dispatch or replay
//! - A sequential [`TraceReader`] over packed record streams

pub mod decode;
pub mod event;
pub mod reader;
pub mod record;

// Re-export commonly used types at the crate root
pub use decode::{AuxOperand, DecodedInsn, Decoder, InsnDetail, InsnGroup, Operand};
pub use event::{CoreId, TraceEvent};
pub use reader::TraceReader;
pub use record::{
    ControlFlowType, RecordError, RegId, TraceRecord, MAX_LOAD_OPS, MAX_READ_REGS,
    MAX_WRITE_REGS, RECORD_SIZE,
};
