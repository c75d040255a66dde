//! Error types for uartboot.

use std::io;
use thiserror::Error;

/// Result type for uartboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for uartboot operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the transport. Fatal for the connection: the link state
    /// is unknown and the engine tears it down.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error (open failure, device gone).
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No live connection. Returned after `close()` or a fault teardown.
    #[error("Not connected")]
    NotConnected,

    /// The device did not answer within the phase timeout.
    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    /// The device rejected a protocol phase.
    #[error("Device NACKed {phase}")]
    Nack {
        /// Protocol phase that was rejected.
        phase: &'static str,
    },

    /// The device answered a handshake phase with something other than
    /// ACK or NACK.
    #[error("Unexpected response {byte:#04x} during {phase}")]
    UnexpectedByte {
        /// Protocol phase being acknowledged.
        phase: &'static str,
        /// Byte actually received.
        byte: u8,
    },

    /// A read-back returned fewer bytes than requested.
    #[error("Short read: got {actual} of {expected} bytes")]
    ShortRead {
        /// Bytes requested.
        expected: usize,
        /// Bytes received before the timeout.
        actual: usize,
    },

    /// A read range that would run past the end of the 32-bit address
    /// space.
    #[error("Read range overflow: {len} bytes from {addr:#010x}")]
    RangeOverflow {
        /// Start address of the rejected range.
        addr: u32,
        /// Requested length.
        len: usize,
    },

    /// Firmware image does not fit the application region.
    #[error("Image too large: {len} bytes (padded), application region holds {capacity}")]
    ImageTooLarge {
        /// Padded image length.
        len: usize,
        /// Usable application region size.
        capacity: usize,
    },

    /// Firmware image rejected before any wire traffic.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Operation stopped by the abort checker.
    #[error("Aborted by caller")]
    Aborted,
}

impl Error {
    /// Whether this error invalidates the connection.
    ///
    /// Transport faults leave the link in an unknown state; the engine
    /// closes it and later calls fail fast with [`Error::NotConnected`]
    /// until the caller reconnects. Protocol failures (timeout, NACK,
    /// short read) leave the link usable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Serial(_))
    }

    /// Whether a write-block attempt may be retried after this error.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Nack { .. } | Self::UnexpectedByte { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_faults_are_fatal() {
        let io = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(io.is_fatal());
        assert!(!Error::Timeout("erase ack").is_fatal());
        assert!(!Error::Nack { phase: "write length" }.is_fatal());
        assert!(!Error::NotConnected.is_fatal());
    }

    #[test]
    fn only_handshake_failures_are_retryable() {
        assert!(Error::Timeout("write completion").is_retryable());
        assert!(Error::Nack { phase: "write address" }.is_retryable());
        assert!(
            Error::UnexpectedByte {
                phase: "write length",
                byte: 0x7F
            }
            .is_retryable()
        );
        assert!(!Error::Aborted.is_retryable());
        assert!(!Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).is_retryable());
    }
}
