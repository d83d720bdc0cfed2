// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Flash sector geometry
//!
//! Erase granularity on the STM32F2 is a sector, and sectors are not all the
//! same size. Region erase walks this table and erases every sector that
//! overlaps the region.

use wb_common::config::FlashRegion;

/// One erasable flash sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashSector {
    /// Sector number as written to the controller
    pub index: u8,
    /// First address of the sector
    pub start: u32,
    /// Sector size in bytes
    pub size: u32,
}

impl FlashSector {
    const fn new(index: u8, start: u32, size: u32) -> Self {
        Self { index, start, size }
    }

    /// Exclusive end address
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.start + self.size
    }

    /// Address range covered by the sector
    #[must_use]
    pub const fn region(&self) -> FlashRegion {
        FlashRegion::new(self.start, self.size)
    }
}

/// STM32F205 1 MiB sector table (RM0033 table 5)
pub const STM32F2_SECTORS: [FlashSector; 12] = [
    FlashSector::new(0, 0x0800_0000, 0x4000),
    FlashSector::new(1, 0x0800_4000, 0x4000),
    FlashSector::new(2, 0x0800_8000, 0x4000),
    FlashSector::new(3, 0x0800_C000, 0x4000),
    FlashSector::new(4, 0x0801_0000, 0x1_0000),
    FlashSector::new(5, 0x0802_0000, 0x2_0000),
    FlashSector::new(6, 0x0804_0000, 0x2_0000),
    FlashSector::new(7, 0x0806_0000, 0x2_0000),
    FlashSector::new(8, 0x0808_0000, 0x2_0000),
    FlashSector::new(9, 0x080A_0000, 0x2_0000),
    FlashSector::new(10, 0x080C_0000, 0x2_0000),
    FlashSector::new(11, 0x080E_0000, 0x2_0000),
];

/// Sector containing `address`
#[must_use]
pub fn sector_for_address(sectors: &[FlashSector], address: u32) -> Option<FlashSector> {
    sectors
        .iter()
        .copied()
        .find(|s| address >= s.start && address < s.end())
}

/// Sectors that overlap `region`, in address order
pub fn sectors_overlapping<'a>(
    sectors: &'a [FlashSector],
    region: &'a FlashRegion,
) -> impl Iterator<Item = FlashSector> + 'a {
    sectors
        .iter()
        .copied()
        .filter(move |s| region.len > 0 && s.region().overlaps(region))
}
