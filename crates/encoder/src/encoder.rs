//! Per-core delayed-commit trace encoder.
//!
//! An instruction's record cannot be written when it is fetched: whether a
//! branch was taken is only known once the *next* instruction is fetched, and
//! its loads and stores are reported after the fetch. The encoder therefore
//! keeps two record slots:
//!
//! - `Current` is populated by the fetch being processed.
//! - `Pending` holds the previous instruction. Memory accesses merge into it,
//!   and the next fetch resolves `actually_taken`, writes it out and clears it.
//!
//! After every traced fetch the roles swap, so the freshly populated record
//! becomes the pending one.

use crate::config::{EncoderConfig, SizePolicy};
use crate::log::{DebugLog, NoopLog};
use crate::sink::TraceSink;
use qtrace_core::{
    ControlFlowType, CoreId, DecodedInsn, InsnDetail, RecordError, TraceRecord, MAX_LOAD_OPS,
    RECORD_SIZE,
};
use std::io::{self, Write};
use thiserror::Error;

/// Errors produced by the encoder.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("I/O error on core {core} trace stream: {source}")]
    Io {
        core: CoreId,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode record on core {core}: {source}")]
    Record {
        core: CoreId,
        #[source]
        source: RecordError,
    },

    #[error("trace stream for core {core} failed earlier and is closed")]
    StreamFailed { core: CoreId },

    #[error("no trace stream attached to core {core}")]
    Detached { core: CoreId },
}

pub type Result<T> = std::result::Result<T, EncoderError>;

/// Role of a record slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Record being populated by the in-progress fetch.
    Current,
    /// Previous instruction, awaiting the next fetch to commit.
    Pending,
}

/// The two record buffers, addressed by role.
#[derive(Debug, Default)]
struct RecordSlots {
    current: TraceRecord,
    pending: TraceRecord,
}

impl RecordSlots {
    fn get(&self, role: Role) -> &TraceRecord {
        match role {
            Role::Current => &self.current,
            Role::Pending => &self.pending,
        }
    }

    fn get_mut(&mut self, role: Role) -> &mut TraceRecord {
        match role {
            Role::Current => &mut self.current,
            Role::Pending => &mut self.pending,
        }
    }

    fn swap_roles(&mut self) {
        std::mem::swap(&mut self.current, &mut self.pending);
    }

    fn clear(&mut self) {
        self.current.clear();
        self.pending.clear();
    }
}

/// Per-run encoder counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStats {
    /// Fetches that opened a record.
    pub fetched: u64,
    /// Fetches skipped for lack of operand detail.
    pub skipped: u64,
    /// Records written to the sink.
    pub emitted: u64,
    /// Final pending records dropped at end of run.
    pub discarded: u64,
    /// Memory accesses that arrived with no pending record.
    pub orphan_accesses: u64,
    /// Non-contiguous loads beyond the second.
    pub dropped_loads: u64,
    /// Register ids beyond array capacity.
    pub truncated_regs: u64,
}

/// Delayed-commit encoder for one core.
pub struct TraceEncoder {
    core: CoreId,
    config: EncoderConfig,
    slots: RecordSlots,
    has_prior: bool,
    sink: Option<Box<dyn TraceSink>>,
    /// Scratch buffer for the packed record being committed.
    scratch: Vec<u8>,
    failed: bool,
    log: Box<dyn DebugLog>,
    stats: EncoderStats,
}

impl TraceEncoder {
    /// Create a detached encoder. Attach a sink before feeding events.
    pub fn new(core: CoreId, config: EncoderConfig) -> Self {
        Self {
            core,
            config,
            slots: RecordSlots::default(),
            has_prior: false,
            sink: None,
            scratch: Vec::with_capacity(RECORD_SIZE),
            failed: false,
            log: Box::new(NoopLog),
            stats: EncoderStats::default(),
        }
    }

    /// Create an encoder writing to `sink`.
    pub fn with_sink(core: CoreId, config: EncoderConfig, sink: Box<dyn TraceSink>) -> Self {
        let mut encoder = Self::new(core, config);
        encoder.attach(sink);
        encoder
    }

    pub fn set_debug_log(&mut self, log: Box<dyn DebugLog>) {
        self.log = log;
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn stats(&self) -> EncoderStats {
        self.stats
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// The record awaiting commit, if any.
    pub fn pending(&self) -> Option<&TraceRecord> {
        self.has_prior.then(|| self.slots.get(Role::Pending))
    }

    /// Start a new stream. Any state from a previous stream is discarded.
    pub fn attach(&mut self, sink: Box<dyn TraceSink>) {
        self.slots.clear();
        self.has_prior = false;
        self.failed = false;
        self.stats = EncoderStats::default();
        self.sink = Some(sink);
    }

    /// Process a fetched instruction.
    ///
    /// Returns `Ok(false)` when the descriptor carries no operand detail; in
    /// that case nothing is opened and the pending record is left alone.
    pub fn on_fetch(&mut self, insn: &DecodedInsn) -> Result<bool> {
        self.check_stream()?;

        let Some(detail) = insn.detail.as_ref() else {
            self.stats.skipped += 1;
            self.log.skipped(self.core, insn.address);
            return Ok(false);
        };

        let current = self.slots.get_mut(Role::Current);
        let truncated = populate(current, insn, detail, self.config.size_policy);
        self.stats.truncated_regs += truncated as u64;
        self.log.fetch(self.core, insn, self.slots.get(Role::Current));

        if self.has_prior {
            let pending = self.slots.get_mut(Role::Pending);
            pending.actually_taken = insn.address == pending.branch_target;
            self.commit_pending()?;
        }

        self.slots.swap_roles();
        self.has_prior = true;
        self.stats.fetched += 1;
        Ok(true)
    }

    /// Merge a memory access into the pending record.
    ///
    /// Writes accumulate `write_size` without checking contiguity. Reads
    /// extend the first load when contiguous with it, otherwise occupy the
    /// second load slot; a third distinct load has nowhere to go and is
    /// dropped. Returns `Ok(false)` if there is no pending record.
    pub fn on_memory_access(&mut self, addr: u64, size: u8, is_write: bool) -> Result<bool> {
        self.check_stream()?;
        if !self.has_prior {
            self.stats.orphan_accesses += 1;
            return Ok(false);
        }

        let rec = self.slots.get_mut(Role::Pending);
        if is_write {
            if !rec.has_store {
                rec.has_store = true;
                rec.store_addr = addr;
                rec.write_size = size as u16;
            } else {
                rec.write_size = rec.write_size.saturating_add(size as u16);
            }
        } else if rec.num_load_ops == 0 {
            rec.num_load_ops = 1;
            rec.load_addr_1 = addr;
            rec.read_size = size as u16;
        } else if rec.load_addr_1.wrapping_add(rec.read_size as u64) == addr {
            rec.read_size = rec.read_size.saturating_add(size as u16);
        } else if rec.num_load_ops < MAX_LOAD_OPS {
            rec.num_load_ops += 1;
            rec.load_addr_2 = addr;
        } else {
            self.stats.dropped_loads += 1;
        }

        self.log.memory_access(self.core, addr, size, is_write);
        Ok(true)
    }

    /// End the stream.
    ///
    /// The last pending record has no successor to resolve it. With
    /// `flush_pending_on_end` it is written with `actually_taken = false`
    /// and returned; otherwise it is dropped. The sink is finalized and
    /// detached either way.
    pub fn finish(&mut self) -> Result<Option<TraceRecord>> {
        let Some(sink) = self.sink.take() else {
            return Err(EncoderError::Detached { core: self.core });
        };
        if self.failed {
            self.reset_slots();
            return Err(EncoderError::StreamFailed { core: self.core });
        }
        self.sink = Some(sink);

        let mut flushed = None;
        if self.has_prior {
            if self.config.flush_pending_on_end {
                self.slots.get_mut(Role::Pending).actually_taken = false;
                flushed = Some(self.slots.get(Role::Pending).clone());
                self.commit_pending()?;
            } else {
                self.log.discard(self.core, self.slots.get(Role::Pending));
                self.stats.discarded += 1;
            }
        }
        self.reset_slots();

        if let Some(sink) = self.sink.take() {
            sink.finish().map_err(|source| self.io_failure(source))?;
        }
        Ok(flushed)
    }

    fn check_stream(&self) -> Result<()> {
        if self.failed {
            return Err(EncoderError::StreamFailed { core: self.core });
        }
        if self.sink.is_none() {
            return Err(EncoderError::Detached { core: self.core });
        }
        Ok(())
    }

    /// Serialize the pending record and clear it.
    fn commit_pending(&mut self) -> Result<()> {
        self.scratch.clear();
        self.slots
            .get(Role::Pending)
            .encode_into(&mut self.scratch)
            .map_err(|source| EncoderError::Record {
                core: self.core,
                source,
            })?;
        let sink = self
            .sink
            .as_mut()
            .ok_or(EncoderError::Detached { core: self.core })?;
        if let Err(source) = sink.write_all(&self.scratch) {
            return Err(self.io_failure(source));
        }

        self.log.commit(self.core, self.slots.get(Role::Pending));
        self.stats.emitted += 1;
        self.slots.get_mut(Role::Pending).clear();
        Ok(())
    }

    fn io_failure(&mut self, source: io::Error) -> EncoderError {
        self.failed = true;
        tracing::warn!(core = self.core, error = %source, "trace stream failed");
        EncoderError::Io {
            core: self.core,
            source,
        }
    }

    fn reset_slots(&mut self) {
        self.slots.clear();
        self.has_prior = false;
    }
}

/// Fill `rec` from a decoded instruction. Returns the number of register ids
/// that did not fit.
fn populate(
    rec: &mut TraceRecord,
    insn: &DecodedInsn,
    detail: &InsnDetail,
    size_policy: SizePolicy,
) -> usize {
    rec.clear();

    rec.instruction_addr = insn.address;
    rec.opcode = insn.opcode;
    rec.size = match size_policy {
        SizePolicy::Fixed(size) => size,
        SizePolicy::Measured => insn.length,
    };

    rec.control_flow_type = if detail.is_jump() {
        ControlFlowType::Branch
    } else {
        ControlFlowType::None
    };
    rec.has_immediate = detail.has_immediate();
    rec.is_fp = detail.is_fp();
    rec.writeback = detail.writeback;

    if rec.is_branch() {
        if let Some(offset) = detail.first_imm() {
            rec.branch_target = rec.instruction_addr.wrapping_add_signed(offset);
        }
    }

    if let Some(aux) = detail.aux() {
        rec.store_addr = aux.value();
    }

    rec.set_read_regs(&detail.regs_read) + rec.set_write_regs(&detail.regs_write)
}
