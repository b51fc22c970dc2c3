//! Decoded instruction descriptors.
//!
//! These types are the boundary with the disassembler. The encoder never
//! looks at raw instruction bytes; it only inspects the operand kinds,
//! group membership and register sets described here.

use crate::record::RegId;
use serde::{Deserialize, Serialize};

/// Decoder-assigned instruction group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsnGroup {
    Jump,
    Call,
    Return,
    Interrupt,
    BranchRelative,
    Privilege,
    Other(u8),
}

/// Auxiliary operand metadata for instructions that name memory without
/// accessing it as a load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxOperand {
    /// Prefetch operation hint.
    Prefetch(u64),
    /// Memory barrier kind.
    Barrier(u64),
}

impl AuxOperand {
    pub fn value(&self) -> u64 {
        match self {
            Self::Prefetch(v) | Self::Barrier(v) => *v,
        }
    }
}

/// A single decoded operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    Reg(RegId),
    /// Immediate value.
    Imm(i64),
    /// Compile-time immediate (e.g. a coprocessor field).
    CImm(i64),
    Fp(f64),
    Mem,
    Aux(AuxOperand),
    Other,
}

impl Operand {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Imm(_) | Self::CImm(_))
    }

    pub fn is_fp(&self) -> bool {
        matches!(self, Self::Fp(_))
    }
}

/// Operand-level detail. Absent when the decoder was run without detail mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsnDetail {
    #[serde(default)]
    pub operands: Vec<Operand>,
    #[serde(default)]
    pub groups: Vec<InsnGroup>,
    #[serde(default)]
    pub writeback: bool,
    #[serde(default)]
    pub regs_read: Vec<RegId>,
    #[serde(default)]
    pub regs_write: Vec<RegId>,
}

impl InsnDetail {
    pub fn is_jump(&self) -> bool {
        self.groups.contains(&InsnGroup::Jump)
    }

    pub fn has_immediate(&self) -> bool {
        self.operands.iter().any(Operand::is_immediate)
    }

    pub fn is_fp(&self) -> bool {
        self.operands.iter().any(Operand::is_fp)
    }

    /// First plain immediate operand. Compile-time immediates are not
    /// branch offsets and are skipped.
    pub fn first_imm(&self) -> Option<i64> {
        self.operands.iter().find_map(|op| match op {
            Operand::Imm(v) => Some(*v),
            _ => None,
        })
    }

    /// Prefetch/barrier metadata carried by operand 0.
    pub fn aux(&self) -> Option<AuxOperand> {
        match self.operands.first() {
            Some(Operand::Aux(aux)) => Some(*aux),
            _ => None,
        }
    }
}

/// A fetched and decoded instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedInsn {
    /// Virtual address of the instruction.
    pub address: u64,
    /// Decoder-assigned instruction id.
    pub opcode: u32,
    /// Length of the raw encoding in bytes.
    #[serde(default)]
    pub length: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<InsnDetail>,
}

impl DecodedInsn {
    pub fn new(address: u64, opcode: u32, length: u8, detail: InsnDetail) -> Self {
        Self {
            address,
            opcode,
            length,
            detail: Some(detail),
        }
    }

    /// A descriptor with no operand detail.
    pub fn without_detail(address: u64, opcode: u32, length: u8) -> Self {
        Self {
            address,
            opcode,
            length,
            detail: None,
        }
    }
}

/// Disassembler seam. Implementations wrap whatever decoding library the
/// emulator ships with.
pub trait Decoder {
    /// Decode the instruction at `address` from `bytes`. Returns `None` when
    /// the bytes do not form a valid instruction.
    fn decode(&mut self, address: u64, bytes: &[u8]) -> Option<DecodedInsn>;
}

impl<D: Decoder + ?Sized> Decoder for &mut D {
    fn decode(&mut self, address: u64, bytes: &[u8]) -> Option<DecodedInsn> {
        (**self).decode(address, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch_detail() -> InsnDetail {
        InsnDetail {
            operands: vec![Operand::CImm(3), Operand::Imm(0x40), Operand::Imm(0x80)],
            groups: vec![InsnGroup::BranchRelative, InsnGroup::Jump],
            ..Default::default()
        }
    }

    #[test]
    fn test_operand_classification() {
        let detail = branch_detail();
        assert!(detail.is_jump());
        assert!(detail.has_immediate());
        assert!(!detail.is_fp());
        assert_eq!(detail.first_imm(), Some(0x40));
    }

    #[test]
    fn test_cimm_counts_as_immediate_but_not_target() {
        let detail = InsnDetail {
            operands: vec![Operand::Reg(1), Operand::CImm(9)],
            ..Default::default()
        };
        assert!(detail.has_immediate());
        assert_eq!(detail.first_imm(), None);
    }

    #[test]
    fn test_aux_only_from_first_operand() {
        let detail = InsnDetail {
            operands: vec![Operand::Aux(AuxOperand::Prefetch(0x10)), Operand::Mem],
            ..Default::default()
        };
        assert_eq!(detail.aux(), Some(AuxOperand::Prefetch(0x10)));

        let detail = InsnDetail {
            operands: vec![Operand::Mem, Operand::Aux(AuxOperand::Barrier(0xF))],
            ..Default::default()
        };
        assert_eq!(detail.aux(), None);
    }

    #[test]
    fn test_json_shape() {
        let insn = DecodedInsn::new(0x1000, 12, 4, branch_detail());
        let json = serde_json::to_string(&insn).unwrap();
        let back: DecodedInsn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, insn);

        let bare: DecodedInsn =
            serde_json::from_str(r#"{"address":4096,"opcode":3}"#).unwrap();
        assert_eq!(bare, DecodedInsn::without_detail(0x1000, 3, 0));
    }
}
