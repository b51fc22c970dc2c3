//! Debug logging hooks for the encoder.
//!
//! The encoder reports what it does to an injected [`DebugLog`]. The default
//! is [`NoopLog`]; [`TracingLog`] forwards everything to `tracing` at debug
//! and trace level.

use qtrace_core::{CoreId, DecodedInsn, TraceRecord};

/// Observer for per-instruction encoder activity.
pub trait DebugLog: Send {
    /// A fetch opened `record`.
    fn fetch(&mut self, _core: CoreId, _insn: &DecodedInsn, _record: &TraceRecord) {}

    /// A fetch was skipped because its descriptor had no operand detail.
    fn skipped(&mut self, _core: CoreId, _address: u64) {}

    /// A memory access was merged into the pending record.
    fn memory_access(&mut self, _core: CoreId, _addr: u64, _size: u8, _is_write: bool) {}

    /// `record` was finalized and written to the sink.
    fn commit(&mut self, _core: CoreId, _record: &TraceRecord) {}

    /// The last pending record of a run was dropped instead of written.
    fn discard(&mut self, _core: CoreId, _record: &TraceRecord) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLog;

impl DebugLog for NoopLog {}

/// Forwards encoder activity to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl DebugLog for TracingLog {
    fn fetch(&mut self, core: CoreId, insn: &DecodedInsn, record: &TraceRecord) {
        tracing::trace!(
            core,
            addr = %format!("{:#x}", insn.address),
            opcode = insn.opcode,
            branch = record.is_branch(),
            target = %format!("{:#x}", record.branch_target),
            src = ?record.read_regs(),
            dst = ?record.write_regs(),
            "fetch"
        );
    }

    fn skipped(&mut self, core: CoreId, address: u64) {
        tracing::debug!(core, addr = %format!("{:#x}", address), "fetch without operand detail skipped");
    }

    fn memory_access(&mut self, core: CoreId, addr: u64, size: u8, is_write: bool) {
        tracing::trace!(
            core,
            addr = %format!("{:#x}", addr),
            size,
            kind = if is_write { "write" } else { "read" },
            "memory access"
        );
    }

    fn commit(&mut self, core: CoreId, record: &TraceRecord) {
        tracing::debug!(
            core,
            addr = %format!("{:#x}", record.instruction_addr),
            branch = record.is_branch(),
            taken = record.actually_taken,
            loads = record.num_load_ops,
            store = record.has_store,
            "commit"
        );
    }

    fn discard(&mut self, core: CoreId, record: &TraceRecord) {
        tracing::debug!(
            core,
            addr = %format!("{:#x}", record.instruction_addr),
            "final pending record discarded"
        );
    }
}
