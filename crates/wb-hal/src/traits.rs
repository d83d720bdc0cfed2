// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! HAL trait definitions
//!
//! Platform-agnostic interfaces implemented by each target and by the
//! in-memory fakes used in host tests.

use crate::error::{HalError, HalResult};
use crate::sectors::FlashSector;
use wb_common::config::CompanionEraseMode;

/// Read access to memory-mapped flash
pub trait FlashRead {
    /// Read data from flash
    ///
    /// # Arguments
    /// * `address` - Absolute flash address
    /// * `buffer` - Buffer to read into
    fn read(&self, address: u32, buffer: &mut [u8]) -> HalResult<()>;

    /// Read one little-endian word
    fn read_u32(&self, address: u32) -> HalResult<u32> {
        let mut word = [0u8; 4];
        self.read(address, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }
}

/// Result of a single status poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStatus {
    /// An operation is still in progress
    Busy,
    /// Controller idle, last operation succeeded
    Ready,
    /// Last operation failed; the error flags have been cleared
    Error(HalError),
}

/// Internal flash controller
///
/// The `begin_*` methods only start an operation. Completion is observed with
/// [`FlashController::poll_status`], and the provided methods wrap the
/// start-then-wait sequence with an explicit poll bound.
pub trait FlashController: FlashRead {
    /// Erasable sectors of this device, in address order
    fn sectors(&self) -> &[FlashSector];

    /// Unlock the controller for erase and program
    fn unlock(&mut self) -> HalResult<()>;

    /// Lock the controller
    fn lock(&mut self) -> HalResult<()>;

    /// Start erasing sector `sector`
    fn begin_erase(&mut self, sector: u8) -> HalResult<()>;

    /// Start programming one 32-bit word at a word-aligned `address`
    fn begin_program(&mut self, address: u32, word: u32) -> HalResult<()>;

    /// Poll the controller status once
    fn poll_status(&mut self) -> FlashStatus;

    /// Leave erase or program mode after an operation completed or failed
    fn end_operation(&mut self);

    /// Busy-wait until the controller is idle
    ///
    /// Returns `FlashTimeout` after `max_polls` polls without reaching
    /// `Ready`. There is no retry.
    fn wait_ready(&mut self, max_polls: u32) -> HalResult<()> {
        for _ in 0..max_polls {
            match self.poll_status() {
                FlashStatus::Ready => return Ok(()),
                FlashStatus::Error(e) => return Err(e),
                FlashStatus::Busy => core::hint::spin_loop(),
            }
        }
        Err(HalError::FlashTimeout)
    }

    /// Erase one sector and wait for completion
    fn erase_sector(&mut self, sector: u8, max_polls: u32) -> HalResult<()> {
        self.wait_ready(max_polls)?;
        self.begin_erase(sector)?;
        let result = self.wait_ready(max_polls);
        self.end_operation();
        result
    }

    /// Program one word and wait for completion
    fn program_word(&mut self, address: u32, word: u32, max_polls: u32) -> HalResult<()> {
        if address % 4 != 0 {
            return Err(HalError::InvalidParameter);
        }
        self.wait_ready(max_polls)?;
        self.begin_program(address, word)?;
        let result = self.wait_ready(max_polls);
        self.end_operation();
        result
    }
}

/// Debug-relay programming port of the companion radio chip
pub trait CompanionDebugPort {
    /// Attach to the companion's debug interface
    fn init(&mut self) -> HalResult<()>;

    /// Download one page and wait for its completion status
    fn download_page(&mut self, page: &[u8], erase: CompanionEraseMode) -> HalResult<()>;

    /// Ask the companion to check `len` bytes of code at `address`
    fn check_code(&mut self, address: u32, len: u32, erase: CompanionEraseMode) -> HalResult<()>;

    /// Power-cycle the companion so it boots the new image
    fn power_cycle(&mut self);
}

/// Firmware entry parameters, resolved before any RAM is cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    /// Address of the firmware vector table
    pub vector_table: u32,
    /// Firmware passed signature verification
    ///
    /// Handed to the firmware so it can tell an official image from a
    /// custom one.
    pub signed: bool,
    /// RAM range `[start, end)` zeroed immediately before the branch
    pub clear_ram: Option<(u32, u32)>,
}

/// Processor-level control used by the boot decision
pub trait SystemControl {
    /// Read the RAM word the firmware uses to request the bootloader
    fn read_session_flag(&self, address: u32) -> u32;

    /// Clear the session flag so it only applies to one reset
    fn clear_session_flag(&mut self, address: u32);

    /// Check if the left (override) button is held
    fn override_held(&self) -> bool;

    /// Reset the processor
    fn reset(&mut self) -> !;

    /// Transfer control to the firmware described by `handoff`
    ///
    /// The RAM clear may cover the caller's own stack, so implementations
    /// must perform it and the branch without touching memory in between.
    fn jump_to_firmware(&mut self, handoff: Handoff) -> !;
}
