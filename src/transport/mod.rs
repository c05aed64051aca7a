pub mod serial;
pub mod simulated;

pub use serial::SerialPortTransport;
pub use simulated::{BoardHandle, SimulatedBoard};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("serial I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),

    #[error("serial link closed")]
    Closed,
}

/// Byte-level access to the kill board. There is no framing underneath: every
/// call moves at most one opcode.
pub trait SerialTransport: Send {
    fn write_byte(&mut self, byte: u8) -> Result<(), TransportError>;

    /// Reads one byte, waiting at most the transport's read timeout.
    /// `Ok(None)` means the timeout elapsed with nothing received.
    fn read_byte(&mut self) -> Result<Option<u8>, TransportError>;

    /// Number of bytes already buffered and readable without waiting.
    fn bytes_to_read(&mut self) -> Result<usize, TransportError>;

    /// Discards both the input and output buffers.
    fn clear_buffers(&mut self) -> Result<(), TransportError>;
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn write_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        (**self).write_byte(byte)
    }

    fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
        (**self).read_byte()
    }

    fn bytes_to_read(&mut self) -> Result<usize, TransportError> {
        (**self).bytes_to_read()
    }

    fn clear_buffers(&mut self) -> Result<(), TransportError> {
        (**self).clear_buffers()
    }
}
