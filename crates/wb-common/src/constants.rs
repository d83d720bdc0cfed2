// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! System-wide constants for the wallet bootloader
//!
//! Image format, chunking and transport sizes. Addresses live in
//! [`crate::config::MemoryLayout`]; everything here is layout independent.

// =============================================================================
// Image Format Constants
// =============================================================================

/// Main MCU firmware magic: "TRZF" in little-endian
pub const FIRMWARE_MAGIC_NEW: u32 = 0x465A_5254;

/// Companion radio firmware magic: "5283" in little-endian
pub const FIRMWARE_MAGIC_COMPANION: u32 = 0x3338_3235;

/// Legacy firmware metadata magic: "TRZR" in little-endian
pub const FIRMWARE_MAGIC_LEGACY: u32 = 0x525A_5254;

/// Size of the firmware header that precedes the code
pub const FIRMWARE_HEADER_LEN: usize = 1024;

/// Size of one independently hashed firmware chunk (64 KiB)
pub const FW_CHUNK_SIZE: usize = 64 * 1024;

/// Number of content-hash slots in a header
pub const HASH_SLOTS: usize = 16;

/// SHA-256 digest size
pub const DIGEST_SIZE: usize = 32;

/// Number of signature slots in a header
pub const SIGNATURE_SLOTS: usize = 3;

/// Number of keys in each trusted key set
pub const KEYS_PER_SET: usize = 5;

/// Compact secp256k1 signature size (r || s)
pub const SIGNATURE_SIZE: usize = 64;

/// Uncompressed SEC1 public key size
pub const PUBLIC_KEY_SIZE: usize = 65;

/// Smallest code length accepted for a new-format image
pub const MIN_CODE_LEN: u32 = 4096;

/// Smallest code length accepted for a legacy image
pub const MIN_LEGACY_CODE_LEN: u32 = 8192;

/// Byte value read back from erased flash, used to pad partial chunks
pub const FLASH_FILLER: u8 = 0xFF;

// =============================================================================
// Legacy Metadata Offsets (relative to secret storage start)
// =============================================================================

/// Offset of the code length in legacy metadata
pub const LEGACY_CODELEN_OFFSET: u32 = 0x04;

/// Offset of the three key index bytes in legacy metadata
pub const LEGACY_SIGINDEX_OFFSET: u32 = 0x08;

/// Offset of the first signature in legacy metadata (each is 0x40 apart)
pub const LEGACY_SIG_OFFSET: u32 = 0x40;

// =============================================================================
// Transport Constants
// =============================================================================

/// Every host packet is exactly this size
pub const PACKET_SIZE: usize = 64;

/// Upload-begin length field counts this many bytes beyond the image
pub const UPLOAD_LENGTH_OVERHEAD: u32 = 4;

/// Byte offset in the upload-begin packet where image bytes start
pub const UPLOAD_PAYLOAD_OFFSET: usize = 13;

/// Relay link receive queue capacity (15 KiB)
pub const RELAY_QUEUE_SIZE: usize = 15 * 1024;

/// Largest relay frame accepted (tag + length + payload + CRC)
pub const RELAY_MAX_FRAME: usize = 4 * 1024;

// =============================================================================
// Companion Chip Constants
// =============================================================================

/// Companion chip flash page size
pub const COMPANION_PAGE_SIZE: usize = 4096;

/// Magic left in RAM by the firmware to request staying in the bootloader
pub const SESSION_FLAG_MAGIC: u32 = 0x55AA_55AA;
