// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Error types for the wallet bootloader
//!
//! One unified, `Copy`, allocation-free error type is shared by the verifier,
//! the flash programmer and the update session. Every variant belongs to one
//! of five handling classes (see [`ErrorKind`]); the class, not the variant,
//! decides whether a session rejects a packet, wipes and halts, or just halts.

use core::fmt;

/// Result type alias for bootloader operations
pub type Result<T> = core::result::Result<T, Error>;

/// Handling class of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad magic, length or framing. No partial commit has happened.
    Structural,
    /// Header signatures do not verify against any trusted key set
    SignatureInvalid,
    /// Per-chunk or whole-image content hash does not match the header
    HashMismatch,
    /// Flash or companion hardware did not complete an operation
    HardwareFault,
    /// The user declined a confirmation prompt
    UserCancelled,
}

/// Unified error type for the wallet bootloader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Structural Errors (0x01xx)
    // =========================================================================
    /// Image magic is not one of the accepted formats
    InvalidMagic,
    /// Image or code length outside the bounds of the target region
    InvalidLength,
    /// Packet does not start with the expected sentinel or tag
    InvalidFraming,
    /// Image magic does not match the region that was erased for it
    TargetMismatch,

    // =========================================================================
    // Verification Errors (0x02xx)
    // =========================================================================
    /// A signature slot references a key index outside 1..=5
    InvalidKeyIndex,
    /// Two signature slots reference the same key
    DuplicateKeyIndex,
    /// A signature did not verify against any trusted key set
    SignatureInvalid,
    /// A chunk digest differs from the declared hash
    HashMismatch,
    /// A hash slot past the last used chunk is not empty
    StaleHashSlot,

    // =========================================================================
    // Flash / Hardware Errors (0x03xx)
    // =========================================================================
    /// Flash controller did not become ready within the poll bound
    FlashTimeout,
    /// Flash controller reported a programming error
    FlashProgramFailed,
    /// Flash controller reported an erase error
    FlashEraseFailed,
    /// Address outside of the flash device or region
    FlashOutOfBounds,
    /// Flash controller is locked
    FlashLocked,
    /// A wiped region does not read back as erased
    EraseVerifyFailed,
    /// Companion chip debug port did not accept a page or check
    CompanionFlashFailed,

    // =========================================================================
    // Session Errors (0x04xx)
    // =========================================================================
    /// The user declined a confirmation
    UserCancelled,
    /// Operation not valid in the current session state
    InvalidState,

    // =========================================================================
    // General Errors (0xFFxx)
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Internal error (should not occur)
    InternalError,
}

impl Error {
    /// Get the error code for this error
    ///
    /// Error codes are organized by category:
    /// - 0x01xx: Structural errors
    /// - 0x02xx: Verification errors
    /// - 0x03xx: Flash and hardware errors
    /// - 0x04xx: Session errors
    /// - 0xFFxx: General errors
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::InvalidMagic => 0x0101,
            Self::InvalidLength => 0x0102,
            Self::InvalidFraming => 0x0103,
            Self::TargetMismatch => 0x0104,

            Self::InvalidKeyIndex => 0x0201,
            Self::DuplicateKeyIndex => 0x0202,
            Self::SignatureInvalid => 0x0203,
            Self::HashMismatch => 0x0204,
            Self::StaleHashSlot => 0x0205,

            Self::FlashTimeout => 0x0301,
            Self::FlashProgramFailed => 0x0302,
            Self::FlashEraseFailed => 0x0303,
            Self::FlashOutOfBounds => 0x0304,
            Self::FlashLocked => 0x0305,
            Self::EraseVerifyFailed => 0x0306,
            Self::CompanionFlashFailed => 0x0307,

            Self::UserCancelled => 0x0401,
            Self::InvalidState => 0x0402,

            Self::InvalidParameter => 0xFF02,
            Self::InternalError => 0xFFFF,
        }
    }

    /// Handling class of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMagic
            | Self::InvalidLength
            | Self::InvalidFraming
            | Self::TargetMismatch
            | Self::InvalidState
            | Self::InvalidParameter => ErrorKind::Structural,
            Self::InvalidKeyIndex | Self::DuplicateKeyIndex | Self::SignatureInvalid => {
                ErrorKind::SignatureInvalid
            }
            Self::HashMismatch | Self::StaleHashSlot => ErrorKind::HashMismatch,
            Self::FlashTimeout
            | Self::FlashProgramFailed
            | Self::FlashEraseFailed
            | Self::FlashOutOfBounds
            | Self::FlashLocked
            | Self::EraseVerifyFailed
            | Self::CompanionFlashFailed
            | Self::InternalError => ErrorKind::HardwareFault,
            Self::UserCancelled => ErrorKind::UserCancelled,
        }
    }

    /// Whether the error is fatal: erase the update target, then halt
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SignatureInvalid | ErrorKind::HashMismatch | ErrorKind::HardwareFault
        )
    }

    /// Check if this is a security-critical error
    #[must_use]
    pub const fn is_security_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SignatureInvalid | ErrorKind::HashMismatch
        )
    }

    /// Get a short description of the error
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::InvalidMagic => "invalid image magic",
            Self::InvalidLength => "image length out of range",
            Self::InvalidFraming => "invalid packet framing",
            Self::TargetMismatch => "image does not match erased target",
            Self::InvalidKeyIndex => "signature key index out of range",
            Self::DuplicateKeyIndex => "signature key index reused",
            Self::SignatureInvalid => "signature verification failed",
            Self::HashMismatch => "content hash mismatch",
            Self::StaleHashSlot => "unused hash slot not empty",
            Self::FlashTimeout => "flash operation timeout",
            Self::FlashProgramFailed => "flash program failed",
            Self::FlashEraseFailed => "flash erase failed",
            Self::FlashOutOfBounds => "flash address out of bounds",
            Self::FlashLocked => "flash locked",
            Self::EraseVerifyFailed => "erased region not blank",
            Self::CompanionFlashFailed => "companion flash failed",
            Self::UserCancelled => "cancelled by user",
            Self::InvalidState => "invalid session state",
            Self::InvalidParameter => "invalid parameter",
            Self::InternalError => "internal error",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:04X}] {}", self.code(), self.description())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "[{=u16:#x}] {=str}", self.code(), self.description());
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
