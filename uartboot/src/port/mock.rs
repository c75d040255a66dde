//! Scripted in-memory port for protocol tests.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// In-memory [`Port`] with a scripted reply queue and a captured write log.
///
/// Reads pop bytes off the script; an empty script reads as `TimedOut`,
/// which is how a silent device looks to the link layer. The script models
/// bytes the device has not sent yet, so `discard_input` leaves it alone.
pub(crate) struct MockPort {
    /// Bytes the device will send, in order.
    pub script: VecDeque<u8>,
    /// Everything the engine wrote, concatenated.
    pub written: Vec<u8>,
    /// Number of `write()` calls, for pacing assertions.
    pub write_calls: usize,
    /// Fail every read with this error kind instead of serving the script.
    pub read_fault: Option<io::ErrorKind>,
    timeout: Duration,
}

impl MockPort {
    pub fn new(script: &[u8]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            written: Vec::new(),
            write_calls: 0,
            read_fault: None,
            timeout: Duration::from_millis(10),
        }
    }

    /// A port whose reads fail immediately with `kind`.
    pub fn faulty(kind: io::ErrorKind) -> Self {
        let mut port = Self::new(&[]);
        port.read_fault = Some(kind);
        port
    }
}

impl io::Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(kind) = self.read_fault {
            return Err(io::Error::new(kind, "scripted fault"));
        }
        if self.script.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.script.len());
        for b in buf.iter_mut().take(n) {
            *b = self.script.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl io::Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_calls += 1;
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        115200
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn discard_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
