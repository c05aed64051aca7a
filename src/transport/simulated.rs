use super::{SerialTransport, TransportError};
use crate::opcode::{ControlMode, KillSource, Opcode, KILL_SOURCE_COUNT, STATUS_REPLY_CLEAR, STATUS_REPLY_KILLED};
use crate::protocol::{decode, encode};
use heapless::Deque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

const SIM_RX_CAPACITY: usize = 256;

/// Ways the simulated board can misbehave when answering a light command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckFault {
    /// Answers with the acknowledgement of a different mode.
    Mismatch,
    /// Does not answer at all.
    Silent,
}

#[derive(Debug)]
struct BoardState {
    rx: Deque<u8, SIM_RX_CAPACITY>,
    written: Vec<u8>,
    switches: [bool; KILL_SOURCE_COUNT],
    light: Option<ControlMode>,
    ack_fault: Option<(AckFault, u32)>,
    answer_pings: bool,
    write_failures: u32,
    buffer_clears: u32,
}

impl BoardState {
    fn new() -> Self {
        Self {
            rx: Deque::new(),
            written: Vec::new(),
            switches: [false; KILL_SOURCE_COUNT],
            light: None,
            ack_fault: None,
            answer_pings: true,
            write_failures: 0,
            buffer_clears: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        if self.rx.push_back(byte).is_err() {
            warn!("Simulated board receive queue full, dropping {:#04x}", byte);
        }
    }

    fn set_switch(&mut self, source: KillSource, killed: bool) {
        self.switches[source.index()] = killed;
        self.push(encode(if killed {
            Opcode::SetKillTrue(source)
        } else {
            Opcode::SetKillFalse(source)
        }));

        if source != KillSource::Overall {
            let overall = KillSource::ALL
                .iter()
                .filter(|s| **s != KillSource::Overall)
                .any(|s| self.switches[s.index()]);
            if overall != self.switches[KillSource::Overall.index()] {
                self.set_switch(KillSource::Overall, overall);
            }
        }
    }

    fn take_ack_fault(&mut self) -> Option<AckFault> {
        match self.ack_fault {
            Some((fault, remaining)) if remaining > 0 => {
                self.ack_fault = if remaining > 1 { Some((fault, remaining - 1)) } else { None };
                Some(fault)
            }
            _ => None,
        }
    }

    fn respond(&mut self, op: Opcode) {
        match op {
            Opcode::Ping => {
                if self.answer_pings {
                    self.push(encode(Opcode::PingAck));
                }
            }
            Opcode::ControlCommand(mode) => {
                self.light = Some(mode);
                match self.take_ack_fault() {
                    Some(AckFault::Mismatch) => {
                        let wrong = ControlMode::from_u8((mode.to_u8() + 1) % 3);
                        self.push(encode(Opcode::ControlAck(wrong)));
                    }
                    Some(AckFault::Silent) => {}
                    None => self.push(encode(Opcode::ControlAck(mode))),
                }
            }
            Opcode::ComputerKillAssert => self.set_switch(KillSource::Computer, true),
            Opcode::ComputerKillClear => self.set_switch(KillSource::Computer, false),
            Opcode::StatusQuery(source) => {
                let reply = if self.switches[source.index()] {
                    STATUS_REPLY_KILLED
                } else {
                    STATUS_REPLY_CLEAR
                };
                self.push(reply);
            }
            other => debug!("Simulated board ignoring {}", other),
        }
    }
}

/// In-memory stand-in for the kill board. Answers pings, light commands and
/// status queries the way the firmware does and pushes status opcodes when a
/// switch is flipped through a [`BoardHandle`].
#[derive(Debug)]
pub struct SimulatedBoard {
    state: Arc<Mutex<BoardState>>,
}

/// Test and operator handle onto a [`SimulatedBoard`] owned by a bridge.
#[derive(Debug, Clone)]
pub struct BoardHandle {
    state: Arc<Mutex<BoardState>>,
}

fn lock(state: &Mutex<BoardState>) -> MutexGuard<'_, BoardState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedBoard {
    pub fn new() -> (Self, BoardHandle) {
        let state = Arc::new(Mutex::new(BoardState::new()));
        (
            Self { state: Arc::clone(&state) },
            BoardHandle { state },
        )
    }
}

impl SerialTransport for SimulatedBoard {
    fn write_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }

        state.written.push(byte);
        if let Some(op) = decode(byte) {
            state.respond(op);
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
        Ok(lock(&self.state).rx.pop_front())
    }

    fn bytes_to_read(&mut self) -> Result<usize, TransportError> {
        Ok(lock(&self.state).rx.len())
    }

    fn clear_buffers(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.rx.clear();
        state.buffer_clears += 1;
        Ok(())
    }
}

impl BoardHandle {
    /// Flips a physical or logical kill source and queues the status opcode.
    pub fn set_kill(&self, source: KillSource, killed: bool) {
        lock(&self.state).set_switch(source, killed);
    }

    pub fn is_killed(&self, source: KillSource) -> bool {
        lock(&self.state).switches[source.index()]
    }

    /// Queues a raw byte as if the board had sent it.
    pub fn inject_byte(&self, byte: u8) {
        lock(&self.state).push(byte);
    }

    /// Misbehave on the next `count` light commands.
    pub fn inject_ack_fault(&self, fault: AckFault, count: u32) {
        lock(&self.state).ack_fault = if count > 0 { Some((fault, count)) } else { None };
    }

    /// Fail the next `count` writes with an I/O error.
    pub fn inject_write_failures(&self, count: u32) {
        lock(&self.state).write_failures = count;
    }

    pub fn set_answer_pings(&self, answer: bool) {
        lock(&self.state).answer_pings = answer;
    }

    pub fn light(&self) -> Option<ControlMode> {
        lock(&self.state).light
    }

    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        core::mem::take(&mut lock(&self.state).written)
    }

    pub fn buffer_clears(&self) -> u32 {
        lock(&self.state).buffer_clears
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_flip_updates_overall() {
        let (mut board, handle) = SimulatedBoard::new();
        handle.set_kill(KillSource::PortForward, true);

        assert_eq!(board.read_byte().unwrap(), Some(0x12));
        assert_eq!(board.read_byte().unwrap(), Some(0x10));
        assert_eq!(board.read_byte().unwrap(), None);

        handle.set_kill(KillSource::PortForward, false);
        assert_eq!(board.read_byte().unwrap(), Some(0x13));
        assert_eq!(board.read_byte().unwrap(), Some(0x11));
    }

    #[test]
    fn test_light_command_is_acknowledged() {
        let (mut board, handle) = SimulatedBoard::new();
        board.write_byte(0x42).unwrap();

        assert_eq!(board.read_byte().unwrap(), Some(0x52));
        assert_eq!(handle.light(), Some(ControlMode::Autonomous));
    }

    #[test]
    fn test_mismatch_fault_is_consumed() {
        let (mut board, handle) = SimulatedBoard::new();
        handle.inject_ack_fault(AckFault::Mismatch, 1);

        board.write_byte(0x42).unwrap();
        assert_eq!(board.read_byte().unwrap(), Some(0x50));

        board.write_byte(0x42).unwrap();
        assert_eq!(board.read_byte().unwrap(), Some(0x52));
    }

    #[test]
    fn test_clear_buffers_drops_pending_bytes() {
        let (mut board, handle) = SimulatedBoard::new();
        handle.inject_byte(0x99);
        handle.inject_byte(0x12);

        board.clear_buffers().unwrap();
        assert_eq!(board.bytes_to_read().unwrap(), 0);
        assert_eq!(handle.buffer_clears(), 1);
    }
}
