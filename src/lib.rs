//! # Kill Board Bridge
//!
//! Safety-monitoring bridge between a vehicle's control stack and the
//! kill-switch board on the other end of a plain serial line.
//!
//! The board speaks single-byte opcodes with no framing. It pushes the state of
//! its kill sources (four hull switches, the remote and a computer kill) and
//! takes commands that drive a status light according to who currently has
//! control of the vehicle.
//!
//! ## Quick Start
//!
//! ```rust
//! use killboard::{BridgeConfig, ChannelAlarmBus, KillBoardBridge, KillSource, SimulatedBoard};
//!
//! let (board, handle) = SimulatedBoard::new();
//! let bus = ChannelAlarmBus::new(16);
//! let bridge = KillBoardBridge::new(board, bus, &BridgeConfig::default(), 0);
//!
//! bridge.record_heartbeat(1_000);
//! bridge.set_controller("autonomous");
//! handle.set_kill(KillSource::PortForward, true);
//!
//! let report = bridge.poll_cycle(1_200);
//! assert!(report.control.is_ok());
//! assert!(bridge.evaluate());
//! ```
//!
//! ## Architecture
//!
//! - [`opcode`] - The fixed opcode table
//! - [`protocol`] - Byte codec and protocol errors
//! - [`transport`] - Serial port and simulated board
//! - [`link`] - Mutex-guarded request/reply conversations
//! - [`status`] - Kill status aggregation
//! - [`watchdog`] - Network heartbeat staleness
//! - [`control`] - Control mode light reporting
//! - [`alarm`] - Alarm bus bridge
//! - [`bridge`] - Poll cycle orchestration
//! - [`config`] - Bridge configuration
//! - [`messages`] - Daemon client messages

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]

pub mod alarm;
pub mod bridge;
pub mod config;
pub mod control;
pub mod link;
pub mod messages;
pub mod opcode;
pub mod protocol;
pub mod status;
pub mod transport;
pub mod watchdog;

// Re-export main public types for convenience
pub use alarm::{AlarmBus, AlarmEvent, ChannelAlarmBus};
pub use bridge::{CycleReport, KillBoardBridge};
pub use config::BridgeConfig;
pub use opcode::{ControlMode, KillSource, Opcode};
pub use protocol::{decode, encode, Ack, ProtocolError};
pub use status::{KillStatusMessage, KillStatusSnapshot};
pub use transport::{SerialPortTransport, SerialTransport, SimulatedBoard};

/// Wall-clock milliseconds since the Unix epoch. Heartbeats carry stamps from
/// the same clock.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
