//! Serialised conversations with the kill board.
//!
//! The serial line carries no framing, so a request byte and its reply must
//! never interleave with another conversation. [`BoardLink`] owns the
//! transport behind a single mutex and every public method takes that lock
//! for the full exchange. The guard never leaves this module.

use crate::opcode::{KillSource, Opcode, STATUS_REPLY_CLEAR, STATUS_REPLY_KILLED};
use crate::protocol::{classify, encode, hex, Ack, Inbound, ProtocolError, StatusChange};
use crate::transport::{SerialTransport, TransportError};
use core::mem::discriminant;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Upper bound on bytes consumed by one drain pass.
pub const MAX_DRAIN_BYTES: usize = 256;

/// Upper bound on bytes examined while waiting for a single reply.
pub const MAX_REPLY_SCAN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub bytes_read: usize,
    pub status_changes: usize,
    pub stray_replies: usize,
    pub unknown_bytes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub resyncs: u32,
}

struct LinkInner<T> {
    transport: T,
    stats: LinkStats,
}

impl<T: SerialTransport> LinkInner<T> {
    fn write(&mut self, op: Opcode) -> Result<(), TransportError> {
        let byte = encode(op);
        if let Err(e) = self.transport.write_byte(byte) {
            error!("Write of {} ({}) failed: {}", op, hex(byte), e);
            self.resync();
            return Err(e);
        }
        self.stats.bytes_sent += 1;
        debug!("Sent: {} ({})", hex(byte), op);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<u8>, TransportError> {
        let byte = self.transport.read_byte()?;
        if let Some(b) = byte {
            self.stats.bytes_received += 1;
            debug!("Rec: {}", hex(b));
        }
        Ok(byte)
    }

    fn resync(&mut self) {
        self.stats.resyncs += 1;
        if let Err(e) = self.transport.clear_buffers() {
            warn!("Failed to clear serial buffers: {}", e);
        }
    }
}

pub struct BoardLink<T> {
    inner: Mutex<LinkInner<T>>,
}

impl<T: SerialTransport> BoardLink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            inner: Mutex::new(LinkInner {
                transport,
                stats: LinkStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes one opcode without waiting for any reply.
    pub fn send(&self, op: Opcode) -> Result<(), ProtocolError> {
        self.lock().write(op)?;
        Ok(())
    }

    /// Writes `op` and, when `expected` is given, waits up to `timeout` for that
    /// reply. Status opcodes that arrive first are handed to `on_status`.
    pub fn request(
        &self,
        op: Opcode,
        expected: Option<Opcode>,
        timeout: Duration,
        on_status: &mut dyn FnMut(StatusChange),
    ) -> Result<Ack, ProtocolError> {
        let mut inner = self.lock();
        inner.write(op)?;

        let Some(expected) = expected else {
            return Ok(Ack::Unverified);
        };
        let expected_byte = encode(expected);
        let deadline = Instant::now() + timeout;

        for _ in 0..MAX_REPLY_SCAN_BYTES {
            let byte = match inner.read() {
                Ok(Some(byte)) => byte,
                Ok(None) => break,
                Err(e) => {
                    error!("Read after {} failed: {}", op, e);
                    inner.resync();
                    return Err(e.into());
                }
            };

            if byte == expected_byte {
                return Ok(Ack::Verified(byte));
            }

            match classify(byte) {
                Inbound::Status(change) => on_status(change),
                // Leftover reply to an earlier, unverified request.
                Inbound::Reply(stale) if discriminant(&stale) != discriminant(&expected) => {
                    debug!("Dropping stale {} while waiting for {}", stale, expected);
                }
                _ => {
                    error!(
                        "Response didn't match. Expected: {}, got: {}.",
                        hex(expected_byte),
                        hex(byte)
                    );
                    inner.resync();
                    return Err(ProtocolError::AckMismatch {
                        sent: op,
                        expected: expected_byte,
                        observed: byte,
                    });
                }
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        error!("No response to {}. Expected: {}, got nothing.", op, hex(expected_byte));
        inner.resync();
        Err(ProtocolError::AckTimeout {
            sent: op,
            expected: expected_byte,
        })
    }

    /// Reads every byte the board has already pushed. Status opcodes go to
    /// `on_status`; an unknown byte clears the buffers and ends the pass.
    pub fn drain(&self, on_status: &mut dyn FnMut(StatusChange)) -> Result<DrainReport, ProtocolError> {
        let mut inner = self.lock();
        let mut report = DrainReport::default();

        if let Err(e) = drain_pending(&mut inner, &mut report, on_status) {
            error!("Drain failed after {} bytes: {}", report.bytes_read, e);
            inner.resync();
            return Err(e.into());
        }
        Ok(report)
    }

    /// Legacy per-source status query (0x21..0x27). The board answers with a
    /// raw 0x01/0x00 rather than an opcode. Status opcodes pushed ahead of the
    /// answer go to `on_status`.
    pub fn query_status(
        &self,
        source: KillSource,
        on_status: &mut dyn FnMut(StatusChange),
    ) -> Result<bool, ProtocolError> {
        let op = Opcode::StatusQuery(source);
        let mut inner = self.lock();
        inner.write(op)?;

        for _ in 0..MAX_REPLY_SCAN_BYTES {
            let reply = match inner.read() {
                Ok(reply) => reply,
                Err(e) => {
                    error!("Read after {} failed: {}", op, e);
                    inner.resync();
                    return Err(e.into());
                }
            };

            match reply {
                Some(STATUS_REPLY_KILLED) => return Ok(true),
                Some(STATUS_REPLY_CLEAR) => return Ok(false),
                Some(byte) => {
                    if let Inbound::Status(change) = classify(byte) {
                        on_status(change);
                        continue;
                    }
                    error!("Status query for {} returned {}", source.label(), hex(byte));
                    inner.resync();
                    return Err(ProtocolError::InvalidStatusReply {
                        kill_source: source,
                        observed: byte,
                    });
                }
                None => break,
            }
        }

        error!("No reply to status query for {}", source.label());
        inner.resync();
        Err(ProtocolError::AckTimeout {
            sent: op,
            expected: STATUS_REPLY_KILLED,
        })
    }

    pub fn resync(&self) {
        self.lock().resync();
    }

    pub fn stats(&self) -> LinkStats {
        self.lock().stats
    }
}

fn drain_pending<T: SerialTransport>(
    inner: &mut LinkInner<T>,
    report: &mut DrainReport,
    on_status: &mut dyn FnMut(StatusChange),
) -> Result<(), TransportError> {
    while report.bytes_read < MAX_DRAIN_BYTES {
        let pending = inner.transport.bytes_to_read()?;
        if pending == 0 {
            return Ok(());
        }

        for _ in 0..pending.min(MAX_DRAIN_BYTES - report.bytes_read) {
            let Some(byte) = inner.read()? else {
                return Ok(());
            };
            report.bytes_read += 1;

            match classify(byte) {
                Inbound::Status(change) => {
                    report.status_changes += 1;
                    on_status(change);
                }
                Inbound::Reply(op) => {
                    report.stray_replies += 1;
                    debug!("Dropping stray {} ({})", op, hex(byte));
                }
                Inbound::Unknown(byte) => {
                    report.unknown_bytes += 1;
                    warn!("Check Buffer response: unknown opcode {}, resynchronising", hex(byte));
                    inner.resync();
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}
