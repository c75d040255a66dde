//! Engine facade: connection lifecycle, the chunked write pipeline, and
//! passive monitoring.
//!
//! A [`Flasher`] owns the serial connection exclusively and exposes the
//! bootloader operations as blocking calls. Telemetry (write progress,
//! device log lines) flows out through the [`EventSink`] handed in at
//! construction, so a UI can observe a long write from another thread
//! without ever being able to stall it.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::EventSink;
use crate::flash::{FLASH_LAYOUT, FlashLayout, WriteJob};
use crate::link::Link;
use crate::port::{NativePort, Port, SerialConfig};
use crate::protocol::Exchange;
use crate::wire::{BLOCK_SETTLE_DELAY, BLOCK_SIZE, RETRY_BACKOFF, WRITE_RETRY_COUNT};

/// Host-side driver for one bootloader device.
///
/// All operations take `&mut self`, so command exchanges and the passive
/// monitor pump are mutually exclusive by construction. After a transport
/// fault the connection is gone for good: operations fail fast with
/// [`Error::NotConnected`] until the caller opens a new flasher.
pub struct Flasher<P: Port> {
    link: Option<Link<P>>,
    layout: FlashLayout,
    events: EventSink,
}

impl Flasher<NativePort> {
    /// Open a native serial port and drive the bootloader behind it.
    pub fn open(config: &SerialConfig, events: EventSink) -> Result<Self> {
        let port = NativePort::open(config)?;
        info!("connected to {} at {} baud", config.port_name, config.baud_rate);
        Ok(Self::new(port, events))
    }
}

impl<P: Port> Flasher<P> {
    /// Wrap an already opened port.
    pub fn new(port: P, events: EventSink) -> Self {
        Self {
            link: Some(Link::new(port, events.clone())),
            layout: FLASH_LAYOUT,
            events,
        }
    }

    /// Flash geometry the engine computes addresses against.
    #[must_use]
    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    /// Whether a live connection exists.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Close the connection. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            debug!("closing {}", link.port_name());
            let _ = link.close();
        }
    }

    /// Erase the application region.
    ///
    /// Slow on the device (the long ACK timeout covers it); failures are
    /// surfaced as-is, re-running the erase is the caller's decision.
    pub fn erase_application(&mut self) -> Result<()> {
        info!("erasing application region");
        self.with_link(|link| Exchange::begin(link)?.erase())
    }

    /// Write a firmware image to the application region.
    ///
    /// The image is padded and partitioned up front; each block gets up
    /// to [`WRITE_RETRY_COUNT`] attempts before the whole job fails. A
    /// failed job promises nothing about which blocks landed. Progress is
    /// published after every confirmed block, and the abort checker is
    /// consulted between blocks, never mid-exchange.
    pub fn write_firmware(&mut self, image: &[u8]) -> Result<()> {
        let job = WriteJob::new(image.to_vec(), self.layout)?;
        let total = job.total();
        info!(
            "writing {total} bytes in {} block(s)",
            total.div_ceil(BLOCK_SIZE)
        );

        for block in job.blocks() {
            if crate::abort_requested() {
                warn!("abort requested, stopping before block @ {:#010x}", block.addr);
                return Err(Error::Aborted);
            }
            self.write_block_with_retry(block.addr, block.data)?;
            self.events.progress(block.end, total);
            // Let the device finish committing before the next request
            thread::sleep(BLOCK_SETTLE_DELAY);
        }

        info!("firmware write complete");
        Ok(())
    }

    /// Read back `len` bytes starting at `addr`, chunked into block-sized
    /// wire reads. Bytes come back verbatim and in order.
    ///
    /// The range may end on the last 32-bit address but not run past it;
    /// an overflowing range is rejected before any wire traffic.
    pub fn read_memory(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let last = u32::try_from(len - 1).ok().and_then(|l| addr.checked_add(l));
        if last.is_none() {
            return Err(Error::RangeOverflow { addr, len });
        }

        debug!("reading {len} bytes @ {addr:#010x}");
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            // Chunks are capped at BLOCK_SIZE, well inside u8
            #[allow(clippy::cast_possible_truncation)]
            let take = (len - out.len()).min(BLOCK_SIZE) as u8;
            // Every chunk start is at most the validated last address
            #[allow(clippy::cast_possible_truncation)]
            let cursor = addr + out.len() as u32;
            let chunk = self.with_link(|link| Exchange::begin(link)?.read_block(cursor, take))?;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Hand control to the application. Fire-and-forget: the device
    /// resets its end of the link, so expect silence (or boot chatter)
    /// afterwards.
    pub fn jump_to_application(&mut self) -> Result<()> {
        info!("jumping to application");
        self.with_link(|link| Exchange::begin(link)?.jump_application())
    }

    /// Ask a running bootloader to restart itself. Fire-and-forget.
    pub fn jump_to_bootloader(&mut self) -> Result<()> {
        info!("jumping to bootloader");
        self.with_link(|link| Exchange::begin(link)?.jump_bootloader())
    }

    /// Pump the receive path for up to `window`, publishing any log lines
    /// that arrive. Stray protocol bytes are counted, kept queued, and
    /// swept away by the next command's pre-exchange discard.
    pub fn poll(&mut self, window: Duration) -> Result<usize> {
        self.with_link(|link| link.pump(window))
    }

    /// Run one operation on the live link, tearing the connection down
    /// if a transport fault comes back. The only paths from connected to
    /// absent are this teardown and `close()`.
    fn with_link<T>(&mut self, op: impl FnOnce(&mut Link<P>) -> Result<T>) -> Result<T> {
        let link = self.link.as_mut().ok_or(Error::NotConnected)?;
        match op(link) {
            Err(e) if e.is_fatal() => {
                warn!("transport fault, dropping connection: {e}");
                self.close();
                Err(e)
            }
            other => other,
        }
    }

    fn write_block_with_retry(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut last = None;
        for attempt in 1..=WRITE_RETRY_COUNT {
            match self.with_link(|link| Exchange::begin(link)?.write_block(addr, data)) {
                Ok(()) => {
                    if attempt > 1 {
                        debug!("block @ {addr:#010x} landed on attempt {attempt}");
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    warn!("block @ {addr:#010x} attempt {attempt}/{WRITE_RETRY_COUNT} failed: {e}");
                    last = Some(e);
                    if attempt < WRITE_RETRY_COUNT {
                        // Give transient line noise a moment to clear;
                        // the next attempt re-discards the receive path
                        thread::sleep(RETRY_BACKOFF);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or(Error::Timeout("write block")))
    }

    /// Test-only peek at the wrapped port.
    #[cfg(test)]
    fn port_ref(&self) -> &P {
        self.link.as_ref().expect("link open").port_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::port::mock::MockPort;
    use crate::test_set_aborted;
    use crate::wire::{ACK, NACK};
    use std::io;
    use std::sync::mpsc::Receiver;

    fn flasher(script: &[u8]) -> Flasher<MockPort> {
        Flasher::new(MockPort::new(script), EventSink::disabled())
    }

    fn flasher_with_events(script: &[u8]) -> (Flasher<MockPort>, Receiver<Event>) {
        let (sink, rx) = EventSink::channel();
        (Flasher::new(MockPort::new(script), sink), rx)
    }

    /// Exact byte stream a clean (retry-free) write of `image` produces.
    fn expected_write_stream(image: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, chunk) in image.chunks(BLOCK_SIZE).enumerate() {
            let addr = 0x0800_8000u32 + (i * BLOCK_SIZE) as u32;
            out.push(0x57);
            out.extend_from_slice(&addr.to_le_bytes());
            out.push(chunk.len() as u8);
            out.extend_from_slice(chunk);
        }
        out
    }

    fn progress_events(rx: &Receiver<Event>) -> Vec<(usize, usize)> {
        rx.try_iter()
            .filter_map(|e| match e {
                Event::Progress { written, total } => Some((written, total)),
                Event::Log(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_write_firmware_blocks_cover_image_in_order() {
        let _guard = crate::abort_flag_guard();
        let image: Vec<u8> = (0..300u16).map(|i| (i % 251) as u8).collect();
        // Three blocks, three ACKs each
        let (mut flasher, rx) = flasher_with_events(&[ACK; 9]);

        flasher.write_firmware(&image).unwrap();

        assert_eq!(flasher.port_ref().written, expected_write_stream(&image));
        assert_eq!(
            progress_events(&rx),
            vec![(128, 300), (256, 300), (300, 300)]
        );
    }

    #[test]
    fn test_write_firmware_pads_odd_image_on_the_wire() {
        let _guard = crate::abort_flag_guard();
        let mut flasher = flasher(&[ACK; 3]);
        flasher.write_firmware(&[1, 2, 3]).unwrap();

        assert_eq!(
            flasher.port_ref().written,
            expected_write_stream(&[1, 2, 3, 0xFF])
        );
    }

    #[test]
    fn test_block_retry_recovers_from_nacks() {
        let _guard = crate::abort_flag_guard();
        // First two attempts die at the address gate, third goes through.
        let (mut flasher, rx) = flasher_with_events(&[NACK, NACK, ACK, ACK, ACK]);

        flasher.write_firmware(&[0xAB, 0xCD]).unwrap();

        let written = &flasher.port_ref().written;
        let attempts = written.iter().filter(|&&b| b == 0x57).count();
        assert_eq!(attempts, 3);
        // Success is reported exactly once
        assert_eq!(progress_events(&rx), vec![(2, 2)]);
    }

    #[test]
    fn test_retry_exhaustion_fails_job_before_next_block() {
        let _guard = crate::abort_flag_guard();
        // 130 bytes -> two blocks; the first never gets past the address
        // gate, so the second must never be attempted.
        let image = vec![0xEE; 130];
        let (mut flasher, rx) = flasher_with_events(&[NACK, NACK, NACK]);

        let err = flasher.write_firmware(&image).unwrap_err();
        assert!(matches!(err, Error::Nack { phase: "write address" }));

        let written = &flasher.port_ref().written;
        let attempts = written.iter().filter(|&&b| b == 0x57).count();
        assert_eq!(attempts, 3);
        // Every attempt targeted block one
        let second_addr = 0x0800_8080u32.to_le_bytes();
        assert!(!written.windows(4).any(|w| w == second_addr));
        assert!(progress_events(&rx).is_empty());
        // Protocol failure does not cost the connection
        assert!(flasher.is_connected());
    }

    #[test]
    fn test_oversized_image_rejected_before_any_wire_traffic() {
        let mut flasher = flasher(&[]);
        let err = flasher.write_firmware(&vec![0; 97 * 1024]).unwrap_err();

        assert!(matches!(err, Error::ImageTooLarge { .. }));
        assert!(flasher.port_ref().written.is_empty());
        assert!(flasher.is_connected());
    }

    #[test]
    fn test_abort_stops_before_first_block() {
        let _guard = crate::abort_flag_guard();
        let mut flasher = flasher(&[ACK; 3]);
        test_set_aborted(true);
        let err = flasher.write_firmware(&[1, 2]).unwrap_err();
        test_set_aborted(false);

        assert!(matches!(err, Error::Aborted));
        assert!(flasher.port_ref().written.is_empty());
    }

    #[test]
    fn test_transport_fault_tears_down_connection() {
        let mut flasher = Flasher::new(
            MockPort::faulty(io::ErrorKind::BrokenPipe),
            EventSink::disabled(),
        );

        let err = flasher.erase_application().unwrap_err();
        assert!(err.is_fatal());
        assert!(!flasher.is_connected());

        // Fail fast from here on
        assert!(matches!(
            flasher.erase_application().unwrap_err(),
            Error::NotConnected
        ));
    }

    #[test]
    fn test_close_then_operate_fails_fast() {
        let mut flasher = flasher(&[ACK]);
        flasher.close();
        flasher.close(); // idempotent

        assert!(matches!(
            flasher.jump_to_application().unwrap_err(),
            Error::NotConnected
        ));
    }

    #[test]
    fn test_erase_application_single_ack() {
        let mut flasher = flasher(&[ACK]);
        flasher.erase_application().unwrap();
        assert_eq!(flasher.port_ref().written, vec![0x56]);
    }

    #[test]
    fn test_read_memory_single_chunk_verbatim() {
        let payload: Vec<u8> = (0..16).collect();
        let mut script = vec![ACK, ACK, ACK];
        script.extend_from_slice(&payload);
        let mut flasher = flasher(&script);

        let data = flasher.read_memory(0x0800_8000, 16).unwrap();
        assert_eq!(data, payload);
    }

    #[test]
    fn test_read_memory_spans_chunks_with_advancing_addresses() {
        let first: Vec<u8> = (0..128u16).map(|i| i as u8).collect();
        let second = [0xAA, 0xBB];
        let mut script = vec![ACK, ACK, ACK];
        script.extend_from_slice(&first);
        script.extend_from_slice(&[ACK, ACK, ACK]);
        script.extend_from_slice(&second);
        let mut flasher = flasher(&script);

        let data = flasher.read_memory(0x0800_8000, 130).unwrap();
        assert_eq!(data.len(), 130);
        assert_eq!(&data[..128], &first[..]);
        assert_eq!(&data[128..], &second);

        // Two read frames, second one 128 bytes further in
        let written = &flasher.port_ref().written;
        let reads = written.iter().filter(|&&b| b == 0x59).count();
        assert_eq!(reads, 2);
        assert!(
            written
                .windows(4)
                .any(|w| w == 0x0800_8080u32.to_le_bytes())
        );
    }

    #[test]
    fn test_read_memory_reaches_top_of_address_space() {
        // 130 bytes whose final byte lands exactly on 0xFFFF_FFFF; the
        // second chunk's address must not wrap.
        let first: Vec<u8> = (0..128u16).map(|i| i as u8).collect();
        let second = [0x01, 0x02];
        let mut script = vec![ACK, ACK, ACK];
        script.extend_from_slice(&first);
        script.extend_from_slice(&[ACK, ACK, ACK]);
        script.extend_from_slice(&second);
        let mut flasher = flasher(&script);

        let data = flasher.read_memory(0xFFFF_FF7E, 130).unwrap();
        assert_eq!(data.len(), 130);

        let written = &flasher.port_ref().written;
        assert!(
            written
                .windows(4)
                .any(|w| w == 0xFFFF_FFFEu32.to_le_bytes())
        );
    }

    #[test]
    fn test_read_memory_overflowing_range_rejected_before_wire_traffic() {
        // One byte further than the top of the address space.
        let mut flasher = flasher(&[]);
        let err = flasher.read_memory(0xFFFF_FF80, 129).unwrap_err();

        assert!(matches!(err, Error::RangeOverflow { len: 129, .. }));
        assert!(flasher.port_ref().written.is_empty());
        assert!(flasher.is_connected());
    }

    #[test]
    fn test_read_memory_zero_length_is_silent() {
        let mut flasher = flasher(&[]);
        assert!(flasher.read_memory(0x0800_8000, 0).unwrap().is_empty());
        assert!(flasher.port_ref().written.is_empty());
    }

    #[test]
    fn test_jump_commands_write_single_bytes() {
        let mut flasher = flasher(&[]);
        flasher.jump_to_bootloader().unwrap();
        flasher.jump_to_application().unwrap();
        assert_eq!(flasher.port_ref().written, vec![0x54, 0x55]);
    }

    #[test]
    fn test_poll_publishes_log_lines() {
        let (mut flasher, rx) = flasher_with_events(b"[LOG] heartbeat\n");

        let stray = flasher.poll(Duration::from_millis(20)).unwrap();
        assert_eq!(stray, 0);
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![Event::Log("heartbeat".to_string())]
        );
    }
}
