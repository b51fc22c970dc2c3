//! Engine callback events.
//!
//! A live emulator pushes these through the dispatcher one call at a time.
//! The same sequence can be captured as JSON lines and replayed later, which
//! is how the encoder is exercised without an engine attached.

use crate::decode::DecodedInsn;
use serde::{Deserialize, Serialize};

/// Core index within the emulated machine.
pub type CoreId = usize;

/// One engine callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    ProgramStart,
    ProgramEnd,
    Fetch {
        core: CoreId,
        insn: DecodedInsn,
    },
    MemoryAccess {
        core: CoreId,
        vaddr: u64,
        paddr: u64,
        size: u8,
        is_write: bool,
    },
}

impl TraceEvent {
    /// Core the event is addressed to, if any.
    pub fn core(&self) -> Option<CoreId> {
        match self {
            Self::Fetch { core, .. } | Self::MemoryAccess { core, .. } => Some(*core),
            Self::ProgramStart | Self::ProgramEnd => None,
        }
    }

    pub fn read(core: CoreId, vaddr: u64, paddr: u64, size: u8) -> Self {
        Self::MemoryAccess {
            core,
            vaddr,
            paddr,
            size,
            is_write: false,
        }
    }

    pub fn write(core: CoreId, vaddr: u64, paddr: u64, size: u8) -> Self {
        Self::MemoryAccess {
            core,
            vaddr,
            paddr,
            size,
            is_write: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::InsnDetail;

    #[test]
    fn test_event_core() {
        assert_eq!(TraceEvent::ProgramStart.core(), None);
        assert_eq!(TraceEvent::read(3, 0x10, 0x20, 4).core(), Some(3));
    }

    #[test]
    fn test_parse_json_line() {
        let line = r#"{"event":"memory_access","core":1,"vaddr":16,"paddr":32,"size":8,"is_write":true}"#;
        let event: TraceEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event, TraceEvent::write(1, 16, 32, 8));

        let line = r#"{"event":"program_start"}"#;
        let event: TraceEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event, TraceEvent::ProgramStart);
    }

    #[test]
    fn test_fetch_json_round_trip() {
        let event = TraceEvent::Fetch {
            core: 0,
            insn: DecodedInsn::new(0x1000, 7, 4, InsnDetail::default()),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: TraceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
