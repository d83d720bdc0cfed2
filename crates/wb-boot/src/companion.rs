// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Companion radio flashing
//!
//! The companion image is first staged in main flash, then relayed page by
//! page through the companion's debug port.

use wb_common::config::UpdateConfig;
use wb_common::constants::COMPANION_PAGE_SIZE;
use wb_common::Error;
use wb_hal::{CompanionDebugPort, FlashRead, HalError};
use zeroize::Zeroize;

/// Relay `len` bytes staged at `source` into the companion chip
///
/// Full pages are sent as-is; the last partial page is zero padded. Every
/// page's completion status is checked before the next one is sent, and the
/// companion must accept the final code check. `progress` receives permille.
pub fn flash_companion<S, P>(
    source: &S,
    port: &mut P,
    address: u32,
    len: u32,
    config: &UpdateConfig,
    mut progress: impl FnMut(u16),
) -> Result<(), Error>
where
    S: FlashRead + ?Sized,
    P: CompanionDebugPort + ?Sized,
{
    let page_size = config.companion_page_size;
    if page_size == 0 || page_size > COMPANION_PAGE_SIZE {
        return Err(Error::InvalidParameter);
    }

    port.init().map_err(|_| Error::from(HalError::CompanionInitFailed))?;

    let mut page = [0u8; COMPANION_PAGE_SIZE];
    let mut offset = 0u32;
    while offset < len {
        progress(permille(offset, len));

        let n = (len - offset).min(page_size as u32) as usize;
        page.zeroize();
        source.read(address + offset, &mut page[..n])?;
        port.download_page(&page[..page_size], config.companion_erase_mode)
            .map_err(|_| Error::from(HalError::CompanionDownloadFailed))?;

        offset += n as u32;
    }
    page.zeroize();

    progress(1000);
    port.check_code(address, offset, config.companion_erase_mode)
        .map_err(|_| Error::from(HalError::CompanionCheckFailed))
}

/// `done / total` in permille, saturating at 1000
#[must_use]
pub fn permille(done: u32, total: u32) -> u16 {
    if total == 0 {
        return 1000;
    }
    let p = u64::from(done) * 1000 / u64::from(total);
    p.min(1000) as u16
}
