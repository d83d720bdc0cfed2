// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! STM32F2 Flash Driver
//!
//! Split-phase driver for the STM32F205 embedded flash controller: every
//! operation is started with a `begin_*` call and completed by polling the
//! status register through [`FlashController::wait_ready`].
//!
//! # STM32F2 Flash Characteristics
//!
//! - Total: 1 MiB, single bank
//! - Sectors: 4 x 16 KiB, 1 x 64 KiB, 7 x 128 KiB
//! - Program: 32-bit parallelism (2.7 V to 3.6 V supply)
//! - Erased state: 0xFF
//!
//! # Safety
//!
//! Flash operations modify volatile memory-mapped registers. Sector 0-1 hold
//! the bootloader and are never erased by this driver.

use crate::error::{HalError, HalResult};
use crate::sectors::{FlashSector, STM32F2_SECTORS};
use crate::traits::{FlashController, FlashRead, FlashStatus};
use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{compiler_fence, Ordering};

// =============================================================================
// Flash Memory Map
// =============================================================================

/// Flash base address
pub const FLASH_BASE: u32 = 0x0800_0000;

/// Total flash size (1 MiB)
pub const FLASH_TOTAL_SIZE: u32 = 1024 * 1024;

/// Sectors below this index belong to the bootloader
pub const FIRST_WRITABLE_SECTOR: u8 = 2;

// =============================================================================
// Flash Register Definitions (STM32F2 RM0033)
// =============================================================================

/// Flash interface register base
const FLASH_R_BASE: u32 = 0x4002_3C00;

const FLASH_KEYR_OFFSET: u32 = 0x04;
const FLASH_SR_OFFSET: u32 = 0x0C;
const FLASH_CR_OFFSET: u32 = 0x10;

// Flash unlock keys
const FLASH_KEY1: u32 = 0x4567_0123;
const FLASH_KEY2: u32 = 0xCDEF_89AB;

// Control register bits
const FLASH_CR_PG: u32 = 1 << 0;
const FLASH_CR_SER: u32 = 1 << 1;
const FLASH_CR_SNB_SHIFT: u32 = 3;
const FLASH_CR_SNB_MASK: u32 = 0xF << FLASH_CR_SNB_SHIFT;
const FLASH_CR_PSIZE_MASK: u32 = 0x3 << 8;
const FLASH_CR_PSIZE_X32: u32 = 0x2 << 8;
const FLASH_CR_STRT: u32 = 1 << 16;
const FLASH_CR_LOCK: u32 = 1 << 31;

// Status register bits
const FLASH_SR_EOP: u32 = 1 << 0;
const FLASH_SR_OPERR: u32 = 1 << 1;
const FLASH_SR_WRPERR: u32 = 1 << 4;
const FLASH_SR_PGAERR: u32 = 1 << 5;
const FLASH_SR_PGPERR: u32 = 1 << 6;
const FLASH_SR_PGSERR: u32 = 1 << 7;
const FLASH_SR_BSY: u32 = 1 << 16;

/// All error flags mask
const FLASH_SR_ERRORS: u32 =
    FLASH_SR_OPERR | FLASH_SR_WRPERR | FLASH_SR_PGAERR | FLASH_SR_PGPERR | FLASH_SR_PGSERR;

/// Flash register accessors
struct FlashRegs;

impl FlashRegs {
    #[inline]
    unsafe fn read(offset: u32) -> u32 {
        read_volatile((FLASH_R_BASE + offset) as *const u32)
    }

    #[inline]
    unsafe fn write(offset: u32, value: u32) {
        write_volatile((FLASH_R_BASE + offset) as *mut u32, value);
    }

    unsafe fn cr() -> u32 { Self::read(FLASH_CR_OFFSET) }
    unsafe fn set_cr(val: u32) { Self::write(FLASH_CR_OFFSET, val); }
    unsafe fn sr() -> u32 { Self::read(FLASH_SR_OFFSET) }
    // SR flags are cleared by writing 1
    unsafe fn clear_sr(val: u32) { Self::write(FLASH_SR_OFFSET, val); }
    unsafe fn set_keyr(val: u32) { Self::write(FLASH_KEYR_OFFSET, val); }
}

/// Map latched status error flags to a HAL error
const fn status_error(sr: u32) -> HalError {
    if sr & FLASH_SR_WRPERR != 0 {
        HalError::FlashLocked
    } else if sr & (FLASH_SR_PGAERR | FLASH_SR_PGPERR | FLASH_SR_PGSERR) != 0 {
        HalError::FlashWriteFailed
    } else {
        HalError::HardwareFault
    }
}

// =============================================================================
// STM32F2 Flash Driver
// =============================================================================

/// STM32F2 Flash driver
pub struct Stm32f2Flash {
    locked: bool,
    /// A sector erase is in progress
    erasing: bool,
}

impl Stm32f2Flash {
    /// Create a new flash driver instance
    ///
    /// The controller comes out of reset locked.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: true,
            erasing: false,
        }
    }

    /// Check if an address range is within flash bounds
    #[must_use]
    pub const fn is_valid_range(address: u32, len: u32) -> bool {
        match address.checked_add(len) {
            Some(end) => address >= FLASH_BASE && end <= FLASH_BASE + FLASH_TOTAL_SIZE,
            None => false,
        }
    }

    /// Check if the controller is locked
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    fn clear_errors() {
        // SAFETY: writing 1s to SR only clears latched flags
        unsafe {
            FlashRegs::clear_sr(FLASH_SR_ERRORS | FLASH_SR_EOP);
        }
    }
}

impl Default for Stm32f2Flash {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashRead for Stm32f2Flash {
    fn read(&self, address: u32, buffer: &mut [u8]) -> HalResult<()> {
        let len = u32::try_from(buffer.len()).map_err(|_| HalError::FlashOutOfBounds)?;
        if !Self::is_valid_range(address, len) {
            return Err(HalError::FlashOutOfBounds);
        }

        // SAFETY: the range lies inside the memory-mapped flash array
        unsafe {
            let src = address as *const u8;
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = read_volatile(src.add(i));
            }
        }

        Ok(())
    }
}

impl FlashController for Stm32f2Flash {
    fn sectors(&self) -> &[FlashSector] {
        &STM32F2_SECTORS
    }

    fn unlock(&mut self) -> HalResult<()> {
        // SAFETY: checking the lock bit and writing the key sequence
        unsafe {
            if FlashRegs::cr() & FLASH_CR_LOCK != 0 {
                FlashRegs::set_keyr(FLASH_KEY1);
                FlashRegs::set_keyr(FLASH_KEY2);
                compiler_fence(Ordering::SeqCst);

                if FlashRegs::cr() & FLASH_CR_LOCK != 0 {
                    return Err(HalError::FlashLocked);
                }
            }
        }

        Self::clear_errors();
        self.locked = false;
        Ok(())
    }

    fn lock(&mut self) -> HalResult<()> {
        // SAFETY: setting the lock bit
        unsafe {
            FlashRegs::set_cr(FlashRegs::cr() | FLASH_CR_LOCK);
        }
        self.locked = true;
        Ok(())
    }

    fn begin_erase(&mut self, sector: u8) -> HalResult<()> {
        if self.locked {
            return Err(HalError::FlashLocked);
        }
        if sector < FIRST_WRITABLE_SECTOR || usize::from(sector) >= STM32F2_SECTORS.len() {
            return Err(HalError::InvalidParameter);
        }

        Self::clear_errors();

        // SAFETY: select the sector, then start the erase
        unsafe {
            let cr = (FlashRegs::cr() & !(FLASH_CR_PSIZE_MASK | FLASH_CR_SNB_MASK))
                | FLASH_CR_PSIZE_X32
                | FLASH_CR_SER
                | (u32::from(sector) << FLASH_CR_SNB_SHIFT);
            FlashRegs::set_cr(cr);
            FlashRegs::set_cr(cr | FLASH_CR_STRT);
        }

        self.erasing = true;
        Ok(())
    }

    fn begin_program(&mut self, address: u32, word: u32) -> HalResult<()> {
        if self.locked {
            return Err(HalError::FlashLocked);
        }
        if address % 4 != 0 {
            return Err(HalError::InvalidParameter);
        }
        let writable = STM32F2_SECTORS[usize::from(FIRST_WRITABLE_SECTOR)].start;
        if address < writable || !Self::is_valid_range(address, 4) {
            return Err(HalError::FlashOutOfBounds);
        }

        Self::clear_errors();

        // SAFETY: PG is set before the single aligned word store that starts
        // the program operation
        unsafe {
            let cr = (FlashRegs::cr() & !FLASH_CR_PSIZE_MASK) | FLASH_CR_PSIZE_X32 | FLASH_CR_PG;
            FlashRegs::set_cr(cr);
            compiler_fence(Ordering::SeqCst);
            write_volatile(address as *mut u32, word);
            compiler_fence(Ordering::SeqCst);
        }

        Ok(())
    }

    fn poll_status(&mut self) -> FlashStatus {
        // SAFETY: reading the status register
        let sr = unsafe { FlashRegs::sr() };

        if sr & FLASH_SR_ERRORS != 0 {
            Self::clear_errors();
            let err = if self.erasing {
                HalError::FlashEraseFailed
            } else {
                status_error(sr)
            };
            return FlashStatus::Error(err);
        }

        if sr & FLASH_SR_BSY != 0 {
            return FlashStatus::Busy;
        }

        if sr & FLASH_SR_EOP != 0 {
            // SAFETY: clearing the end-of-operation flag
            unsafe { FlashRegs::clear_sr(FLASH_SR_EOP) };
        }
        FlashStatus::Ready
    }

    fn end_operation(&mut self) {
        // SAFETY: clearing the operation bits in CR
        unsafe {
            FlashRegs::set_cr(FlashRegs::cr() & !(FLASH_CR_PG | FLASH_CR_SER | FLASH_CR_SNB_MASK));
        }
        self.erasing = false;
    }
}
