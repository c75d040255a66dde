//! Port abstraction for serial communication.
//!
//! The `Port` trait separates byte-level I/O from protocol logic, so the
//! link and protocol layers run unchanged against real hardware or a
//! scripted in-memory port in tests.
//!
//! ```text
//! +-------------------+
//! |  Protocol layer   |
//! | (link, protocol)  |
//! +---------+---------+
//!           |
//!           v
//! +---------+---------+
//! |    Port trait     |
//! +---------+---------+
//!           |
//!           v
//! +---------+---------+
//! |    NativePort     |
//! |   (serialport)    |
//! +-------------------+
//! ```

pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
///
/// Framing is fixed at 8N1 with no flow control; the bootloader wire
/// format assumes it.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Initial read/write timeout. The link layer re-arms this per phase.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the initial timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Byte-stream transport under the protocol engine.
///
/// Reads must respect the configured timeout and return either
/// `Ok(0)` or `ErrorKind::TimedOut` when it elapses, never block past it.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Throw away everything the OS has buffered on the receive side.
    fn discard_input(&mut self) -> Result<()>;

    /// Close the port and release the handle.
    ///
    /// Further I/O on a closed port fails fast instead of blocking on a
    /// dead device.
    fn close(&mut self) -> Result<()>;
}

/// Trait for listing available serial ports.
///
/// Separated from `Port` because enumeration does not require an open
/// port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

pub use native::{NativePort, NativePortEnumerator, list_ports};
