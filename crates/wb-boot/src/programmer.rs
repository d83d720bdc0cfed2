// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Blocking flash programmer
//!
//! Wraps a [`FlashController`] with region-level erase and word-level
//! programming. Every operation waits for completion within the configured
//! poll bound before returning; there are no retries.

use wb_common::config::{FlashRegion, FlashTiming};
use wb_common::constants::FLASH_FILLER;
use wb_hal::sectors::sectors_overlapping;
use wb_hal::{FlashController, FlashRead, HalError, HalResult};

/// Region-level erase and program over a flash controller
pub struct FlashProgrammer<F: FlashController> {
    flash: F,
    timing: FlashTiming,
}

impl<F: FlashController> FlashProgrammer<F> {
    /// Create a programmer with the given poll bounds
    pub const fn new(flash: F, timing: FlashTiming) -> Self {
        Self { flash, timing }
    }

    /// Underlying controller
    pub const fn flash(&self) -> &F {
        &self.flash
    }

    /// Underlying controller, mutably
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Erase every sector overlapping `region`
    ///
    /// The region must start and end on sector boundaries so that no byte
    /// outside of it is lost. The controller is locked again on every path.
    pub fn erase_region(&mut self, region: &FlashRegion) -> HalResult<()> {
        let (first, last) = {
            let sectors = self.flash.sectors();
            let first = sectors_overlapping(sectors, region).next();
            let last = sectors_overlapping(sectors, region).last();
            let (Some(first), Some(last)) = (first, last) else {
                return Err(HalError::FlashOutOfBounds);
            };
            if first.start != region.start || last.end() != region.end() {
                return Err(HalError::InvalidParameter);
            }
            (first.index, last.index)
        };

        self.flash.unlock()?;
        let result = self.erase_sectors(first, last);
        let locked = self.flash.lock();
        result.and(locked)
    }

    fn erase_sectors(&mut self, first: u8, last: u8) -> HalResult<()> {
        for sector in first..=last {
            self.flash.erase_sector(sector, self.timing.erase_poll_limit)?;
        }
        Ok(())
    }

    /// Program consecutive words starting at `address`
    pub fn program_words(&mut self, address: u32, words: &[u32]) -> HalResult<()> {
        self.flash.unlock()?;
        let result = self.program_each(address, words.iter().copied());
        let locked = self.flash.lock();
        result.and(locked)
    }

    /// Program raw bytes starting at `address`, assembled little-endian into words
    ///
    /// The length must be a multiple of four. Each word is read back after it
    /// is programmed.
    pub fn program_bytes(&mut self, address: u32, data: &[u8]) -> HalResult<()> {
        if data.len() % 4 != 0 {
            return Err(HalError::InvalidParameter);
        }
        let words = data
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]));

        self.flash.unlock()?;
        let result = self.program_each(address, words);
        let locked = self.flash.lock();
        result.and(locked)
    }

    fn program_each(&mut self, address: u32, words: impl Iterator<Item = u32>) -> HalResult<()> {
        let mut at = address;
        for word in words {
            self.flash
                .program_word(at, word, self.timing.program_poll_limit)?;
            if self.flash.read_u32(at)? != word {
                return Err(HalError::FlashVerifyFailed);
            }
            at = at.checked_add(4).ok_or(HalError::FlashOutOfBounds)?;
        }
        Ok(())
    }

    /// Check that every byte of `region` reads as erased
    pub fn region_is_erased(&self, region: &FlashRegion) -> HalResult<bool> {
        let mut block = [0u8; 256];
        let mut at = region.start;
        while at < region.end() {
            let n = (region.end() - at).min(block.len() as u32) as usize;
            self.flash.read(at, &mut block[..n])?;
            if block[..n].iter().any(|&b| b != FLASH_FILLER) {
                return Ok(false);
            }
            at += n as u32;
        }
        Ok(true)
    }
}

impl<F: FlashController> FlashRead for FlashProgrammer<F> {
    fn read(&self, address: u32, buffer: &mut [u8]) -> HalResult<()> {
        self.flash.read(address, buffer)
    }
}
