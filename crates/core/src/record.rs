//! Fixed-layout trace record for one retired instruction.
//!
//! A record is written as a packed, little-endian byte sequence of
//! [`RECORD_SIZE`] bytes. The layout is produced by bincode's fixed-int
//! encoding of the serde derive below, so field order in the struct *is*
//! the wire order:
//!
//! ```text
//!  off  field              type
//!    0  instruction_addr   u64
//!    8  opcode             u32
//!   12  size               u8
//!   13  control_flow_type  u8  (0 = none, 1 = branch)
//!   14  actually_taken     u8
//!   15  has_immediate      u8
//!   16  is_fp              u8
//!   17  writeback          u8
//!   18  branch_target      u64
//!   26  num_load_ops       u8
//!   27  has_store          u8
//!   28  load_addr_1        u64
//!   36  load_addr_2        u64
//!   44  store_addr         u64
//!   52  read_size          u16
//!   54  write_size         u16
//!   56  num_read_regs      u8
//!   57  num_write_regs     u8
//!   58  read_regs          [u8; 9]
//!   67  write_regs         [u8; 6]
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use thiserror::Error;

/// Register identifier as assigned by the decoder.
pub type RegId = u8;

/// Capacity of the source register array.
pub const MAX_READ_REGS: usize = 9;

/// Capacity of the destination register array.
pub const MAX_WRITE_REGS: usize = 6;

/// Number of independent load addresses a record can carry.
pub const MAX_LOAD_OPS: u8 = 2;

/// Serialized size of a [`TraceRecord`] in bytes.
pub const RECORD_SIZE: usize = 73;

/// Errors produced while encoding or decoding records.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Truncated record: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Invalid control flow type: {0}")]
    InvalidControlFlow(u8),
}

pub type Result<T> = std::result::Result<T, RecordError>;

/// Control-flow classification of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ControlFlowType {
    #[default]
    None,
    Branch,
}

impl From<ControlFlowType> for u8 {
    fn from(cf: ControlFlowType) -> u8 {
        match cf {
            ControlFlowType::None => 0,
            ControlFlowType::Branch => 1,
        }
    }
}

impl TryFrom<u8> for ControlFlowType {
    type Error = RecordError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Branch),
            other => Err(RecordError::InvalidControlFlow(other)),
        }
    }
}

impl fmt::Display for ControlFlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Branch => write!(f, "branch"),
        }
    }
}

/// One retired instruction as seen by the downstream simulator.
///
/// `store_addr` is overloaded: for prefetch and barrier instructions that do
/// not store, it carries the prefetch hint or barrier kind instead. Use
/// [`TraceRecord::aux_hint`] to read it in that role.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Virtual address of the instruction.
    pub instruction_addr: u64,
    /// Decoder-assigned instruction id.
    pub opcode: u32,
    /// Instruction length in bytes.
    pub size: u8,
    pub control_flow_type: ControlFlowType,
    /// Resolved once the next instruction's address is known.
    pub actually_taken: bool,
    pub has_immediate: bool,
    pub is_fp: bool,
    pub writeback: bool,
    /// Branch target computed from the immediate operand, 0 if unknown.
    pub branch_target: u64,
    /// Number of distinct load addresses (0..=2).
    pub num_load_ops: u8,
    pub has_store: bool,
    pub load_addr_1: u64,
    pub load_addr_2: u64,
    pub store_addr: u64,
    /// Bytes covered by the first (possibly merged) load.
    pub read_size: u16,
    /// Bytes covered by all stores.
    pub write_size: u16,
    pub num_read_regs: u8,
    pub num_write_regs: u8,
    pub read_regs: [RegId; MAX_READ_REGS],
    pub write_regs: [RegId; MAX_WRITE_REGS],
}

impl TraceRecord {
    /// Reset every field to zero.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_branch(&self) -> bool {
        self.control_flow_type == ControlFlowType::Branch
    }

    /// Source registers actually in use.
    pub fn read_regs(&self) -> &[RegId] {
        let n = (self.num_read_regs as usize).min(MAX_READ_REGS);
        &self.read_regs[..n]
    }

    /// Destination registers actually in use.
    pub fn write_regs(&self) -> &[RegId] {
        let n = (self.num_write_regs as usize).min(MAX_WRITE_REGS);
        &self.write_regs[..n]
    }

    /// Copy source registers, truncating to capacity. Returns the number dropped.
    pub fn set_read_regs(&mut self, regs: &[RegId]) -> usize {
        self.read_regs = [0; MAX_READ_REGS];
        let n = regs.len().min(MAX_READ_REGS);
        self.read_regs[..n].copy_from_slice(&regs[..n]);
        self.num_read_regs = n as u8;
        regs.len() - n
    }

    /// Copy destination registers, truncating to capacity. Returns the number dropped.
    pub fn set_write_regs(&mut self, regs: &[RegId]) -> usize {
        self.write_regs = [0; MAX_WRITE_REGS];
        let n = regs.len().min(MAX_WRITE_REGS);
        self.write_regs[..n].copy_from_slice(&regs[..n]);
        self.num_write_regs = n as u8;
        regs.len() - n
    }

    /// Prefetch hint or barrier kind carried in the store slot, if any.
    pub fn aux_hint(&self) -> Option<u64> {
        if !self.has_store && self.store_addr != 0 {
            Some(self.store_addr)
        } else {
            None
        }
    }

    /// Write the packed representation to `writer`.
    pub fn encode_into<W: Write>(&self, writer: W) -> Result<()> {
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Packed representation as a byte vector of length [`RECORD_SIZE`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(RECORD_SIZE);
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Decode a record from exactly [`RECORD_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RECORD_SIZE {
            return Err(RecordError::Truncated {
                expected: RECORD_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(bincode::deserialize(bytes)?)
    }

    /// Read one record from `reader`.
    pub fn decode_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; RECORD_SIZE];
        reader.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TraceRecord {
        let mut rec = TraceRecord {
            instruction_addr: 0x1122_3344_5566_7788,
            opcode: 0xAABB_CCDD,
            size: 4,
            control_flow_type: ControlFlowType::Branch,
            actually_taken: true,
            has_immediate: true,
            is_fp: false,
            writeback: true,
            branch_target: 0x2000,
            num_load_ops: 2,
            has_store: true,
            load_addr_1: 0x4000,
            load_addr_2: 0x5000,
            store_addr: 0x6000,
            read_size: 0x0102,
            write_size: 0x0304,
            ..Default::default()
        };
        rec.set_read_regs(&[1, 2, 3]);
        rec.set_write_regs(&[7]);
        rec
    }

    #[test]
    fn test_encoded_size() {
        assert_eq!(sample().to_bytes().unwrap().len(), RECORD_SIZE);
        assert_eq!(TraceRecord::default().to_bytes().unwrap().len(), RECORD_SIZE);
    }

    #[test]
    fn test_layout_offsets() {
        let bytes = sample().to_bytes().unwrap();

        assert_eq!(&bytes[0..8], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&bytes[8..12], &0xAABB_CCDDu32.to_le_bytes());
        assert_eq!(bytes[12], 4);
        assert_eq!(bytes[13], 1); // branch
        assert_eq!(bytes[14], 1); // taken
        assert_eq!(bytes[15], 1); // immediate
        assert_eq!(bytes[16], 0); // fp
        assert_eq!(bytes[17], 1); // writeback
        assert_eq!(&bytes[18..26], &0x2000u64.to_le_bytes());
        assert_eq!(bytes[26], 2);
        assert_eq!(bytes[27], 1);
        assert_eq!(&bytes[28..36], &0x4000u64.to_le_bytes());
        assert_eq!(&bytes[36..44], &0x5000u64.to_le_bytes());
        assert_eq!(&bytes[44..52], &0x6000u64.to_le_bytes());
        assert_eq!(&bytes[52..54], &[0x02, 0x01]);
        assert_eq!(&bytes[54..56], &[0x04, 0x03]);
        assert_eq!(bytes[56], 3);
        assert_eq!(bytes[57], 1);
        assert_eq!(&bytes[58..61], &[1, 2, 3]);
        assert_eq!(bytes[67], 7);
    }

    #[test]
    fn test_round_trip() {
        let rec = sample();
        let decoded = TraceRecord::from_bytes(&rec.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, rec);

        let mut stream = Vec::new();
        rec.encode_into(&mut stream).unwrap();
        let decoded = TraceRecord::decode_from(stream.as_slice()).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn test_from_bytes_rejects_short_input() {
        let bytes = sample().to_bytes().unwrap();
        assert!(matches!(
            TraceRecord::from_bytes(&bytes[..40]),
            Err(RecordError::Truncated {
                expected: RECORD_SIZE,
                actual: 40
            })
        ));
    }

    #[test]
    fn test_from_bytes_rejects_bad_control_flow() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[13] = 7;
        assert!(TraceRecord::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_register_truncation() {
        let mut rec = TraceRecord::default();
        let dropped = rec.set_read_regs(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(dropped, 2);
        assert_eq!(rec.num_read_regs as usize, MAX_READ_REGS);
        assert_eq!(rec.read_regs(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let dropped = rec.set_write_regs(&[1, 2]);
        assert_eq!(dropped, 0);
        assert_eq!(rec.write_regs(), &[1, 2]);
    }

    #[test]
    fn test_aux_hint() {
        let mut rec = TraceRecord::default();
        assert_eq!(rec.aux_hint(), None);

        rec.store_addr = 0x11;
        assert_eq!(rec.aux_hint(), Some(0x11));

        rec.has_store = true;
        assert_eq!(rec.aux_hint(), None);
    }

    #[test]
    fn test_clear() {
        let mut rec = sample();
        rec.clear();
        assert_eq!(rec, TraceRecord::default());
    }
}
