//! Wire-level definitions for the bootloader protocol.
//!
//! ## Command Format
//!
//! ```text
//! +-----+---------------------------+
//! | CMD |  payload (command-specific)|
//! +-----+---------------------------+
//! | 1 B |  0, 5 or 6 bytes + data   |
//! +-----+---------------------------+
//! ```
//!
//! Every payload phase is gated by a one-byte ACK (`0x06`) or NACK
//! (`0x15`) from the device. There is no checksum; integrity comes from
//! the per-phase handshakes and the bounded block retries above.
//!
//! The same UART carries free-form diagnostic text. A line starting with
//! the literal `[LOG] ` and ending in `\n` is diagnostic output, not
//! protocol data; see `link` for how the two are separated.

use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};

/// Positive acknowledge.
pub const ACK: u8 = 0x06;

/// Negative acknowledge.
pub const NACK: u8 = 0x15;

/// First byte of a diagnostic line (`[`).
pub const LOG_MARKER: u8 = 0x5B;

/// Header literal expected immediately after [`LOG_MARKER`].
pub const LOG_HEADER: &[u8] = b"LOG] ";

/// Bootloader command bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Branch back into the bootloader.
    JumpBootloader = 0x54,
    /// Branch into the application.
    JumpApplication = 0x55,
    /// Erase the application region.
    EraseApplication = 0x56,
    /// Program one block of flash.
    WriteBlock = 0x57,
    /// Read back a stretch of memory.
    ReadBlock = 0x59,
}

/// Maximum payload carried by one write block.
pub const BLOCK_SIZE: usize = 128;

/// Write attempts per block before the whole job is failed.
pub const WRITE_RETRY_COUNT: u32 = 3;

/// Filler appended to odd-length images (the erased-flash value).
pub const PAD_BYTE: u8 = 0xFF;

// Timeouts come in three classes: tens of milliseconds for the log-header
// probe (a genuine header arrives in one burst), one or two seconds for
// per-phase ACKs, ten seconds for the full-region erase.

/// Window for the five header bytes following a `[`.
pub const LOG_PROBE_TIMEOUT: Duration = Duration::from_millis(50);

/// Bound on collecting the remainder of a confirmed log line.
pub const LOG_LINE_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-phase ACK wait.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Final ACK after a block's payload; the device programs flash before
/// answering.
pub const WRITE_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// ACK wait for the full-region erase.
pub const ERASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for read-back data.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

// Pacing. Write payloads go out back-to-back; the line rate alone
// throttles them. Read addresses get an explicit gap between bytes. The
// asymmetry is part of the device contract: tune either constant, but do
// not fold one into the other.

/// Gap between the address bytes of a read command.
pub const ADDR_BYTE_DELAY: Duration = Duration::from_millis(2);

/// Settle time after a block ACKs before the next block starts.
pub const BLOCK_SETTLE_DELAY: Duration = Duration::from_millis(5);

/// Pause between failed attempts of the same block.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// First phase of a write: command byte plus little-endian target address,
/// sent as one burst.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn write_request(addr: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    buf.push(Command::WriteBlock as u8);
    buf.write_u32::<LittleEndian>(addr).unwrap();
    buf
}

/// Little-endian address bytes for the paced phase of a read command.
#[must_use]
pub fn encode_addr(addr: u32) -> [u8; 4] {
    addr.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes_match_device_table() {
        assert_eq!(Command::JumpBootloader as u8, 0x54);
        assert_eq!(Command::JumpApplication as u8, 0x55);
        assert_eq!(Command::EraseApplication as u8, 0x56);
        assert_eq!(Command::WriteBlock as u8, 0x57);
        assert_eq!(Command::ReadBlock as u8, 0x59);
    }

    #[test]
    fn test_write_request_layout() {
        let frame = write_request(0x0800_8000);
        assert_eq!(frame.len(), 5);
        assert_eq!(frame[0], 0x57);
        // Address is little-endian
        assert_eq!(&frame[1..], &[0x00, 0x80, 0x00, 0x08]);
    }

    #[test]
    fn test_encode_addr_little_endian() {
        assert_eq!(encode_addr(0x0800_8080), [0x80, 0x80, 0x00, 0x08]);
    }

    #[test]
    fn test_log_header_literal() {
        assert_eq!(LOG_MARKER, b'[');
        assert_eq!(LOG_HEADER, b"LOG] ");
        assert_eq!(LOG_HEADER.len(), 5);
    }
}
