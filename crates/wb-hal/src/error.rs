// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! HAL error types

use core::fmt;

/// HAL error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Flash is locked
    FlashLocked,
    /// Flash address out of bounds
    FlashOutOfBounds,
    /// Flash erase failed
    FlashEraseFailed,
    /// Flash write failed
    FlashWriteFailed,
    /// Flash read back differs from what was written
    FlashVerifyFailed,
    /// Flash controller stayed busy past the poll bound
    FlashTimeout,
    /// Companion debug port did not respond to init
    CompanionInitFailed,
    /// Companion rejected a page download
    CompanionDownloadFailed,
    /// Companion code check failed
    CompanionCheckFailed,
    /// Invalid parameter
    InvalidParameter,
    /// Hardware fault detected
    HardwareFault,
}

impl HalError {
    /// Get error code
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::FlashLocked => 0x0811,
            Self::FlashOutOfBounds => 0x0812,
            Self::FlashEraseFailed => 0x0813,
            Self::FlashWriteFailed => 0x0814,
            Self::FlashVerifyFailed => 0x0815,
            Self::FlashTimeout => 0x0816,
            Self::CompanionInitFailed => 0x0850,
            Self::CompanionDownloadFailed => 0x0851,
            Self::CompanionCheckFailed => 0x0852,
            Self::InvalidParameter => 0x08F0,
            Self::HardwareFault => 0x08D0,
        }
    }

    /// Get error description
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::FlashLocked => "flash locked",
            Self::FlashOutOfBounds => "flash address out of bounds",
            Self::FlashEraseFailed => "flash erase failed",
            Self::FlashWriteFailed => "flash write failed",
            Self::FlashVerifyFailed => "flash verify failed",
            Self::FlashTimeout => "flash operation timeout",
            Self::CompanionInitFailed => "companion debug port init failed",
            Self::CompanionDownloadFailed => "companion page download failed",
            Self::CompanionCheckFailed => "companion code check failed",
            Self::InvalidParameter => "invalid parameter",
            Self::HardwareFault => "hardware fault detected",
        }
    }
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04X}] {}", self.code(), self.description())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for HalError {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "[{=u16:#x}] {=str}", self.code(), self.description());
    }
}

impl From<HalError> for wb_common::Error {
    fn from(e: HalError) -> Self {
        match e {
            HalError::FlashLocked => Self::FlashLocked,
            HalError::FlashOutOfBounds => Self::FlashOutOfBounds,
            HalError::FlashEraseFailed => Self::FlashEraseFailed,
            HalError::FlashWriteFailed | HalError::FlashVerifyFailed => Self::FlashProgramFailed,
            HalError::FlashTimeout => Self::FlashTimeout,
            HalError::CompanionInitFailed
            | HalError::CompanionDownloadFailed
            | HalError::CompanionCheckFailed => Self::CompanionFlashFailed,
            HalError::InvalidParameter => Self::InvalidParameter,
            HalError::HardwareFault => Self::InternalError,
        }
    }
}

/// HAL Result type
pub type HalResult<T> = Result<T, HalError>;
