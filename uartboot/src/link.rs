//! Shared-wire discipline: one byte stream, two kinds of traffic.
//!
//! The bootloader answers commands on the same UART it prints free-form
//! diagnostic text on (`[LOG] ...` lines, newline-terminated). [`Link`]
//! sits between the transport and the protocol layer and guarantees that
//! every byte it hands out is protocol data:
//!
//! 1. A received `[` (0x5B) might open a log header. The next five bytes
//!    are probed under a short window; a genuine header arrives in one
//!    burst, so the window stays far below any ACK timeout.
//! 2. All five match `LOG] `: the interpretation is committed. The rest
//!    of the line is consumed up to the newline and published as
//!    [`Event::Log`](crate::event::Event::Log); none of it is ever
//!    re-served as protocol data.
//! 3. Anything else: the marker and every probed byte go back onto the
//!    pending queue, in arrival order, and are served as ordinary
//!    protocol bytes. Nothing is lost, nothing is reordered.
//!
//! Bytes on the pending queue are already classified; they are served
//! before any new wire read and never probed again.

use std::collections::VecDeque;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use log::{trace, warn};

use crate::error::Result;
use crate::event::EventSink;
use crate::port::Port;
use crate::wire::{LOG_HEADER, LOG_LINE_TIMEOUT, LOG_MARKER, LOG_PROBE_TIMEOUT};

/// Demultiplexed byte source over an exclusively owned serial port.
pub struct Link<P: Port> {
    port: P,
    /// Bytes already classified as protocol data. Serve order == push
    /// order; only `discard_input` empties it out of band.
    pending: VecDeque<u8>,
    events: EventSink,
}

impl<P: Port> Link<P> {
    /// Wrap an opened port.
    pub fn new(port: P, events: EventSink) -> Self {
        Self {
            port,
            pending: VecDeque::new(),
            events,
        }
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        self.port.name()
    }

    /// Next protocol byte, or `None` if the deadline passes first.
    ///
    /// Log lines encountered along the way are published and do not count
    /// against the caller other than the time they took to drain.
    pub fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(byte) = self.pending.pop_front() {
                return Ok(Some(byte));
            }
            let Some(byte) = self.read_raw(deadline)? else {
                return Ok(None);
            };
            if byte != LOG_MARKER {
                return Ok(Some(byte));
            }
            match self.probe_log_header()? {
                // Confirmed line went to the event sink; keep looking
                // under the caller's original deadline.
                None => {}
                Some(probed) => {
                    trace!("not a log header, restoring {} byte(s)", probed.len() + 1);
                    self.pending.extend(probed);
                    return Ok(Some(LOG_MARKER));
                }
            }
        }
    }

    /// Collect up to `n` protocol bytes within the timeout.
    ///
    /// A timeout is not an error here: the caller gets whatever arrived
    /// (possibly nothing) and judges the length itself.
    pub fn read_bytes(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() && self.pending.is_empty() {
                break;
            }
            match self.read_byte(remaining)? {
                Some(byte) => out.push(byte),
                None => break,
            }
        }
        Ok(out)
    }

    /// Send bytes as a single write, flushed.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    /// Send bytes one `write` call each, optionally sleeping between them.
    ///
    /// `delay: None` sends back-to-back (bulk payload pacing: the line
    /// rate is the throttle); `Some(gap)` inserts the gap after every
    /// byte but the last (read-address pacing). The two modes are
    /// distinct on the wire and must stay that way.
    pub fn write_paced(&mut self, buf: &[u8], delay: Option<Duration>) -> Result<()> {
        for (i, byte) in buf.iter().enumerate() {
            self.port.write_all(std::slice::from_ref(byte))?;
            if let Some(gap) = delay {
                if i + 1 < buf.len() {
                    thread::sleep(gap);
                }
            }
        }
        self.port.flush()?;
        Ok(())
    }

    /// Drop everything queued on the receive path: classified bytes in
    /// the pending queue and whatever the OS has buffered. A stale ACK
    /// from an earlier attempt must never satisfy the next one.
    pub fn discard_input(&mut self) -> Result<()> {
        self.pending.clear();
        self.port.discard_input()
    }

    /// Drain whatever arrives within `window`, publishing log lines and
    /// queueing stray protocol bytes for a later reader (or the next
    /// pre-command discard).
    ///
    /// Returns the number of stray protocol bytes seen, normally zero
    /// outside a command exchange.
    pub fn pump(&mut self, window: Duration) -> Result<usize> {
        let deadline = Instant::now() + window;
        let mut stray = 0;
        while let Some(byte) = self.read_raw(deadline)? {
            if byte != LOG_MARKER {
                self.pending.push_back(byte);
                stray += 1;
                continue;
            }
            match self.probe_log_header()? {
                None => {}
                Some(probed) => {
                    self.pending.push_back(LOG_MARKER);
                    stray += 1 + probed.len();
                    self.pending.extend(probed);
                }
            }
        }
        Ok(stray)
    }

    /// Close the underlying port.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }

    /// Test-only peek at the wrapped port.
    #[cfg(test)]
    pub(crate) fn port_ref(&self) -> &P {
        &self.port
    }

    /// One raw byte from the wire, bypassing classification. `None` once
    /// the deadline passes.
    fn read_raw(&mut self, deadline: Instant) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.port.set_timeout(remaining)?;
            match self.port.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Raw burst of up to `n` bytes within its own window.
    fn read_burst(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.read_raw(deadline)? {
                Some(byte) => out.push(byte),
                None => break,
            }
        }
        Ok(out)
    }

    /// Decide, after a raw `[`, between log line and ordinary data.
    ///
    /// A confirmed header consumes and publishes the whole line and
    /// returns `None`; otherwise the probed bytes come back so the caller
    /// can restore them.
    fn probe_log_header(&mut self) -> Result<Option<Vec<u8>>> {
        let probed = self.read_burst(LOG_HEADER.len(), LOG_PROBE_TIMEOUT)?;
        if probed == LOG_HEADER {
            self.consume_log_line()?;
            Ok(None)
        } else {
            Ok(Some(probed))
        }
    }

    /// Consume the rest of a confirmed log line and publish it.
    ///
    /// The header already matched, so the interpretation cannot be rolled
    /// back: if the newline never shows up within the window, whatever
    /// was collected is published as-is.
    fn consume_log_line(&mut self) -> Result<()> {
        let deadline = Instant::now() + LOG_LINE_TIMEOUT;
        let mut line = Vec::new();
        loop {
            match self.read_raw(deadline)? {
                Some(b'\n') => break,
                Some(byte) => line.push(byte),
                None => {
                    warn!("log line without newline after {LOG_LINE_TIMEOUT:?}, publishing as-is");
                    break;
                }
            }
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        let text = String::from_utf8_lossy(&line).into_owned();
        trace!("device log: {text}");
        self.events.log(text);
        Ok(())
    }
}
