use crate::opcode::{KillSource, Opcode, OPCODE_TABLE};
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::opcode::encode;

/// Decodes a single inbound byte. Unknown bytes yield `None` and are left to
/// the caller to log and drop.
pub fn decode(byte: u8) -> Option<Opcode> {
    OPCODE_TABLE
        .iter()
        .find(|(value, _)| *value == byte)
        .map(|(_, op)| *op)
}

/// A push-driven kill status update reported by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub source: KillSource,
    pub killed: bool,
}

impl StatusChange {
    pub fn from_opcode(op: Opcode) -> Option<Self> {
        match op {
            Opcode::SetKillTrue(source) => Some(Self { source, killed: true }),
            Opcode::SetKillFalse(source) => Some(Self { source, killed: false }),
            _ => None,
        }
    }

    pub fn to_opcode(self) -> Opcode {
        if self.killed {
            Opcode::SetKillTrue(self.source)
        } else {
            Opcode::SetKillFalse(self.source)
        }
    }
}

/// Classifies a decoded byte for the conversation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Status(StatusChange),
    Reply(Opcode),
    Unknown(u8),
}

pub fn classify(byte: u8) -> Inbound {
    match decode(byte) {
        Some(op) => match StatusChange::from_opcode(op) {
            Some(change) => Inbound::Status(change),
            None => Inbound::Reply(op),
        },
        None => Inbound::Unknown(byte),
    }
}

/// Outcome of a successful request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The expected reply byte was read back.
    Verified(u8),
    /// The command was written without waiting for a reply.
    Unverified,
}

impl Ack {
    pub fn is_verified(&self) -> bool {
        matches!(self, Ack::Verified(_))
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no reply to {sent} within timeout (expected {expected:#04x})")]
    AckTimeout { sent: Opcode, expected: u8 },

    #[error("reply mismatch after {sent}: expected {expected:#04x}, got {observed:#04x}")]
    AckMismatch { sent: Opcode, expected: u8, observed: u8 },

    #[error("invalid status reply {observed:#04x} for {kill_source:?}")]
    InvalidStatusReply { kill_source: KillSource, observed: u8 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    /// True when the failure suggests the board is not talking at all, as
    /// opposed to talking out of turn.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, ProtocolError::AckTimeout { .. } | ProtocolError::Transport(_))
    }
}

pub fn hex(byte: u8) -> String {
    format!("{byte:#04x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_bytes() {
        assert_eq!(
            classify(0x12),
            Inbound::Status(StatusChange { source: KillSource::PortForward, killed: true })
        );
        assert_eq!(
            classify(0x1B),
            Inbound::Status(StatusChange { source: KillSource::Remote, killed: false })
        );
    }

    #[test]
    fn test_classify_replies_and_unknown() {
        assert_eq!(classify(0x30), Inbound::Reply(Opcode::PingAck));
        assert_eq!(classify(0x99), Inbound::Unknown(0x99));
        assert_eq!(classify(0x00), Inbound::Unknown(0x00));
    }

    #[test]
    fn test_hex_formatting() {
        assert_eq!(hex(0x05), "0x05");
        assert_eq!(hex(0x52), "0x52");
    }
}
