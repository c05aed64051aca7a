//! Line-delimited JSON spoken between the bridge daemon and its clients.

use crate::alarm::AlarmEvent;
use crate::opcode::KillSource;
use crate::status::KillStatusMessage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_MESSAGE_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundMessage {
    /// Keep-alive from the upstream network. A missing stamp means "now".
    Heartbeat { stamp_ms: Option<u64> },
    /// Name of the controller that currently owns the vehicle.
    ControlMode { mode: String },
    Alarm(AlarmEvent),
    StatusRequest,
    /// Flip a source on the simulated board. Rejected on real hardware.
    SimulateKill { source: KillSource, killed: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundMessage {
    Status(KillStatusMessage),
    Alarm(AlarmEvent),
    Reply { accepted: bool, message: Option<String> },
}

impl OutboundMessage {
    pub fn accepted(message: impl Into<String>) -> Self {
        OutboundMessage::Reply {
            accepted: true,
            message: Some(message.into()),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        OutboundMessage::Reply {
            accepted: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("Message exceeds buffer size")]
    TooLarge,
    #[error("Invalid JSON format")]
    InvalidJson,
}

pub fn parse_inbound(line: &str) -> Result<InboundMessage, MessageError> {
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(MessageError::TooLarge);
    }
    serde_json::from_str(line).map_err(|_| MessageError::InvalidJson)
}
