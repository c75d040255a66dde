//! Flash geometry and write-job preparation.
//!
//! The target keeps its bootloader at the bottom of flash; firmware
//! images land in the application region right above it. A [`WriteJob`]
//! takes a raw image and turns it into the exact block sequence the wire
//! protocol will transmit: validated against the region bound, padded to
//! an even length, and partitioned into contiguous blocks.

use crate::error::{Error, Result};
use crate::wire::{BLOCK_SIZE, PAD_BYTE};

/// Addressable flash window of the target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayout {
    /// First address of the flash window.
    pub base: u32,
    /// Total flash size in bytes.
    pub size: u32,
    /// Bytes at the bottom reserved for the bootloader itself.
    pub bootloader_reserved: u32,
}

/// Layout of the supported target: 128 KiB of flash at `0x0800_0000`,
/// first 32 KiB reserved for the bootloader.
pub const FLASH_LAYOUT: FlashLayout = FlashLayout {
    base: 0x0800_0000,
    size: 128 * 1024,
    bootloader_reserved: 0x8000,
};

impl FlashLayout {
    /// First address of the application region.
    #[must_use]
    pub const fn app_start(&self) -> u32 {
        self.base + self.bootloader_reserved
    }

    /// Usable application bytes.
    #[must_use]
    pub const fn app_capacity(&self) -> usize {
        (self.size - self.bootloader_reserved) as usize
    }
}

/// A firmware image prepared for block-wise transmission.
///
/// Construction settles everything the pipeline needs to know up front:
/// an image that constructs successfully will never fail a bounds or
/// alignment check mid-transfer.
#[derive(Debug)]
pub struct WriteJob {
    image: Vec<u8>,
    layout: FlashLayout,
}

impl WriteJob {
    /// Validate and pad a raw firmware image.
    ///
    /// Odd-length images get one trailing [`PAD_BYTE`] so every write is
    /// half-word aligned; the original bytes are never altered. Empty
    /// images and images that do not fit the application region (after
    /// padding) are rejected.
    pub fn new(image: Vec<u8>, layout: FlashLayout) -> Result<Self> {
        if image.is_empty() {
            return Err(Error::InvalidImage("empty firmware image".to_string()));
        }

        let mut image = image;
        if image.len() % 2 != 0 {
            image.push(PAD_BYTE);
        }

        if image.len() > layout.app_capacity() {
            return Err(Error::ImageTooLarge {
                len: image.len(),
                capacity: layout.app_capacity(),
            });
        }

        Ok(Self { image, layout })
    }

    /// Padded image length; what actually goes over the wire.
    #[must_use]
    pub fn total(&self) -> usize {
        self.image.len()
    }

    /// Padded image bytes.
    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Blocks in transmission order: contiguous, strictly increasing
    /// addresses starting at the application region, each at most
    /// [`BLOCK_SIZE`] bytes.
    pub fn blocks(&self) -> impl Iterator<Item = WriteBlock<'_>> {
        let app_start = self.layout.app_start();
        self.image
            .chunks(BLOCK_SIZE)
            .enumerate()
            .map(move |(i, data)| {
                let offset = i * BLOCK_SIZE;
                // Offsets stay under 96 KiB, far inside u32
                #[allow(clippy::cast_possible_truncation)]
                let addr = app_start + offset as u32;
                WriteBlock {
                    addr,
                    data,
                    end: offset + data.len(),
                }
            })
    }
}

/// One block of a [`WriteJob`].
#[derive(Debug, Clone, Copy)]
pub struct WriteBlock<'a> {
    /// Target flash address.
    pub addr: u32,
    /// Payload bytes, `1..=BLOCK_SIZE` of them.
    pub data: &'a [u8],
    /// Cumulative image bytes written once this block lands.
    pub end: usize,
}
