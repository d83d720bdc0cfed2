// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Bootloader configuration
//!
//! All configuration is compile-time. The bootloader never reads settings
//! from flash, so a corrupted storage sector cannot change where firmware is
//! written or how long a flash operation may take.

use crate::constants::{
    COMPANION_PAGE_SIZE, FIRMWARE_HEADER_LEN, FW_CHUNK_SIZE, HASH_SLOTS, SESSION_FLAG_MAGIC,
};

/// A contiguous flash address range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegion {
    /// First address of the region
    pub start: u32,
    /// Region length in bytes
    pub len: u32,
}

impl FlashRegion {
    /// Create a region
    #[must_use]
    pub const fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// Exclusive end address
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.start + self.len
    }

    /// Check if an address falls inside the region
    #[must_use]
    pub const fn contains(&self, address: u32) -> bool {
        address >= self.start && address < self.end()
    }

    /// Check if `[address, address + len)` lies entirely inside the region
    #[must_use]
    pub const fn contains_range(&self, address: u32, len: u32) -> bool {
        match address.checked_add(len) {
            Some(end) => address >= self.start && end <= self.end(),
            None => false,
        }
    }

    /// Check if two regions share any address
    #[must_use]
    pub const fn overlaps(&self, other: &FlashRegion) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Flash memory layout
///
/// ```text
/// 0x0800_0000  bootloader           32 KiB
/// 0x0800_8000  secret storage       32 KiB  (legacy metadata lives here)
/// 0x0801_0000  firmware header       1 KiB
/// 0x0801_0400  application code    575 KiB
/// 0x080A_0000  companion staging   384 KiB
/// 0x0810_0000  end of flash
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Bootloader (never written by this code)
    pub bootloader: FlashRegion,
    /// Secret storage, wiped on any authenticity downgrade
    pub storage: FlashRegion,
    /// Firmware header followed by application code
    pub firmware: FlashRegion,
    /// Staging area holding the companion image before it is relayed
    pub companion_staging: FlashRegion,
    /// RAM word the firmware sets to ask for the bootloader on next reset
    pub session_flag_addr: u32,
    /// First RAM address cleared before jumping into firmware
    pub ram_start: u32,
    /// Exclusive end of RAM cleared before jumping into firmware
    pub ram_end: u32,
}

impl MemoryLayout {
    /// STM32F205 (1 MiB) layout with companion staging in the top sectors
    pub const STM32F2: Self = Self {
        bootloader: FlashRegion::new(0x0800_0000, 0x8000),
        storage: FlashRegion::new(0x0800_8000, 0x8000),
        firmware: FlashRegion::new(0x0801_0000, 0x9_0000),
        companion_staging: FlashRegion::new(0x080A_0000, 0x6_0000),
        session_flag_addr: 0x2000_0000,
        ram_start: 0x2000_0004,
        ram_end: 0x2002_0000,
    };

    /// Default layout
    pub const DEFAULT: Self = Self::STM32F2;

    /// Address of the 1 KiB firmware header
    #[must_use]
    pub const fn header_start(&self) -> u32 {
        self.firmware.start
    }

    /// Address of the first code byte (vector table)
    #[must_use]
    pub const fn app_start(&self) -> u32 {
        self.firmware.start + FIRMWARE_HEADER_LEN as u32
    }

    /// Largest code length that fits the application region
    #[must_use]
    pub const fn app_max_len(&self) -> u32 {
        let by_region = self.firmware.len - FIRMWARE_HEADER_LEN as u32;
        let by_slots = (HASH_SLOTS * FW_CHUNK_SIZE - FIRMWARE_HEADER_LEN) as u32;
        if by_region < by_slots {
            by_region
        } else {
            by_slots
        }
    }

    /// Largest companion payload (excluding header) that fits staging
    #[must_use]
    pub const fn companion_max_len(&self) -> u32 {
        self.companion_staging.len - FIRMWARE_HEADER_LEN as u32
    }

    /// Address of chunk `index` for the main target
    #[must_use]
    pub const fn firmware_chunk_start(&self, index: u32) -> u32 {
        self.firmware.start + index * FW_CHUNK_SIZE as u32
    }

    /// Legacy layout: code directly at the firmware region start
    #[must_use]
    pub const fn legacy_app_start(&self) -> u32 {
        self.firmware.start
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Bounded busy-wait limits for the flash controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashTiming {
    /// Status polls allowed for a sector erase (128 KiB sectors take seconds)
    pub erase_poll_limit: u32,
    /// Status polls allowed for a single word program
    pub program_poll_limit: u32,
}

impl FlashTiming {
    /// Default timing for a 120 MHz core
    pub const DEFAULT: Self = Self {
        erase_poll_limit: 240_000_000,
        program_poll_limit: 100_000,
    };
}

impl Default for FlashTiming {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Companion chip erase strategy used by the relay protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompanionEraseMode {
    /// Leave flash as-is
    None = 0,
    /// Erase each page before programming it
    Page = 1,
    /// Erase the whole chip before the first page
    All = 2,
}

/// Update session configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateConfig {
    /// Companion page size used for relay programming
    pub companion_page_size: usize,
    /// Erase mode passed to every companion page
    pub companion_erase_mode: CompanionEraseMode,
    /// Number of progress updates skipped between redraws
    pub progress_interval: u8,
}

impl UpdateConfig {
    /// Default update configuration
    pub const DEFAULT: Self = Self {
        companion_page_size: COMPANION_PAGE_SIZE,
        companion_erase_mode: CompanionEraseMode::All,
        progress_interval: 32,
    };
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Boot configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Value of the session flag that keeps the device in the bootloader
    pub session_flag_value: u32,
    /// Clear RAM between `ram_start` and `ram_end` before the jump
    pub clear_ram_before_jump: bool,
}

impl BootConfig {
    /// Default boot configuration
    pub const DEFAULT: Self = Self {
        session_flag_value: SESSION_FLAG_MAGIC,
        clear_ram_before_jump: true,
    };
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Complete bootloader configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemConfig {
    /// Flash and RAM layout
    pub layout: MemoryLayout,
    /// Flash busy-wait bounds
    pub timing: FlashTiming,
    /// Update session settings
    pub update: UpdateConfig,
    /// Boot decision settings
    pub boot: BootConfig,
}

impl SystemConfig {
    /// Default configuration
    pub const DEFAULT: Self = Self {
        layout: MemoryLayout::DEFAULT,
        timing: FlashTiming::DEFAULT,
        update: UpdateConfig::DEFAULT,
        boot: BootConfig::DEFAULT,
    };
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
