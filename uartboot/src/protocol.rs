//! ACK-gated command exchanges.
//!
//! Every bootloader command is a fixed sequence of phases, each one
//! answered by a single ACK (`0x06`) or NACK (`0x15`) byte read through
//! the demultiplexed link. An [`Exchange`] runs exactly one command:
//! construct it, call the command method, drop it. Construction discards
//! the receive path, so a stale ACK left over from a failed attempt can
//! never satisfy the next one.
//!
//! Retry policy lives a layer up in the flasher; an exchange reports the
//! first phase that fails and stops.

use std::time::Duration;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::link::Link;
use crate::port::Port;
use crate::wire::{
    self, ACK, ACK_TIMEOUT, ADDR_BYTE_DELAY, Command, ERASE_TIMEOUT, NACK, READ_TIMEOUT,
    WRITE_ACK_TIMEOUT,
};

/// One command execution against the demultiplexed link.
pub struct Exchange<'a, P: Port> {
    link: &'a mut Link<P>,
}

impl<'a, P: Port> Exchange<'a, P> {
    /// Start a command exchange on a clean receive path.
    pub fn begin(link: &'a mut Link<P>) -> Result<Self> {
        link.discard_input()?;
        Ok(Self { link })
    }

    /// Erase the application region. One long-wait ACK; the device blanks
    /// the whole region before answering.
    pub fn erase(mut self) -> Result<()> {
        debug!("erase application region");
        self.link.write_all(&[Command::EraseApplication as u8])?;
        self.expect_ack("erase", ERASE_TIMEOUT)
    }

    /// Program one block. Three gates: command plus address, length,
    /// payload.
    pub fn write_block(mut self, addr: u32, data: &[u8]) -> Result<()> {
        debug_assert!(!data.is_empty() && data.len() <= wire::BLOCK_SIZE);
        trace!("write block: {} bytes @ {addr:#010x}", data.len());

        self.link.write_all(&wire::write_request(addr))?;
        self.expect_ack("write address", ACK_TIMEOUT)?;

        // Length fits one byte: blocks are capped at BLOCK_SIZE
        #[allow(clippy::cast_possible_truncation)]
        let len = data.len() as u8;
        self.link.write_all(&[len])?;
        self.expect_ack("write length", ACK_TIMEOUT)?;

        // Payload goes out one write per byte with no added gap; the
        // line rate is the throttle (see the pacing notes in wire).
        self.link.write_paced(data, None)?;
        self.expect_ack("write completion", WRITE_ACK_TIMEOUT)
    }

    /// Read back `len` bytes starting at `addr`.
    pub fn read_block(mut self, addr: u32, len: u8) -> Result<Vec<u8>> {
        trace!("read block: {len} bytes @ {addr:#010x}");

        self.link.write_all(&[Command::ReadBlock as u8])?;
        self.expect_ack("read command", ACK_TIMEOUT)?;

        // The device parses address bytes as they trickle in; each one
        // needs its gap.
        self.link
            .write_paced(&wire::encode_addr(addr), Some(ADDR_BYTE_DELAY))?;
        self.expect_ack("read address", ACK_TIMEOUT)?;

        self.link.write_all(&[len])?;
        self.expect_ack("read length", ACK_TIMEOUT)?;

        let data = self.link.read_bytes(len as usize, READ_TIMEOUT)?;
        if data.len() != len as usize {
            return Err(Error::ShortRead {
                expected: len as usize,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    /// Branch into the application. Fire-and-forget: the device resets
    /// its end of the link and never answers.
    pub fn jump_application(self) -> Result<()> {
        debug!("jump to application");
        self.link.write_all(&[Command::JumpApplication as u8])
    }

    /// Drop back into the bootloader. Fire-and-forget.
    pub fn jump_bootloader(self) -> Result<()> {
        debug!("jump to bootloader");
        self.link.write_all(&[Command::JumpBootloader as u8])
    }

    fn expect_ack(&mut self, phase: &'static str, timeout: Duration) -> Result<()> {
        match self.link.read_byte(timeout)? {
            Some(ACK) => Ok(()),
            Some(NACK) => Err(Error::Nack { phase }),
            Some(byte) => Err(Error::UnexpectedByte { phase, byte }),
            None => Err(Error::Timeout(phase)),
        }
    }
}
