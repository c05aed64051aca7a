use crate::link::BoardLink;
use crate::opcode::{ControlMode, Opcode};
use crate::protocol::{Ack, ProtocolError, StatusChange};
use crate::transport::SerialTransport;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlStats {
    pub reports_sent: u32,
    pub reports_failed: u32,
}

/// Pushes the current control authority to the board's status light.
///
/// The board forgets the mode between commands, so the mode is resent every
/// cycle whether or not it changed.
#[derive(Debug)]
pub struct ControlModeReporter {
    current: AtomicU8,
    verify_ack: bool,
    ack_timeout: Duration,
    reports_sent: AtomicU32,
    reports_failed: AtomicU32,
}

impl ControlModeReporter {
    pub fn new(verify_ack: bool, ack_timeout: Duration) -> Self {
        Self {
            current: AtomicU8::new(ControlMode::Idle.to_u8()),
            verify_ack,
            ack_timeout,
            reports_sent: AtomicU32::new(0),
            reports_failed: AtomicU32::new(0),
        }
    }

    /// Caches the most recently observed mode.
    pub fn set_mode(&self, mode: ControlMode) {
        self.current.store(mode.to_u8(), Ordering::Release);
    }

    pub fn current_mode(&self) -> ControlMode {
        ControlMode::from_u8(self.current.load(Ordering::Acquire))
    }

    pub fn report<T: SerialTransport>(
        &self,
        link: &BoardLink<T>,
        mode: ControlMode,
        on_status: &mut dyn FnMut(StatusChange),
    ) -> Result<Ack, ProtocolError> {
        self.reports_sent.fetch_add(1, Ordering::Relaxed);

        let expected = self.verify_ack.then_some(Opcode::ControlAck(mode));
        let result = link.request(Opcode::ControlCommand(mode), expected, self.ack_timeout, on_status);

        if let Err(e) = &result {
            self.reports_failed.fetch_add(1, Ordering::Relaxed);
            warn!("Light update to {} not confirmed: {}", mode.label(), e);
        }
        result
    }

    pub fn report_current<T: SerialTransport>(
        &self,
        link: &BoardLink<T>,
        on_status: &mut dyn FnMut(StatusChange),
    ) -> Result<Ack, ProtocolError> {
        self.report(link, self.current_mode(), on_status)
    }

    pub fn stats(&self) -> ControlStats {
        ControlStats {
            reports_sent: self.reports_sent.load(Ordering::Relaxed),
            reports_failed: self.reports_failed.load(Ordering::Relaxed),
        }
    }
}
