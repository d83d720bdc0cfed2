// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Firmware image header
//!
//! Every image starts with a fixed 1024-byte little-endian header. It is
//! decoded field by field from a byte buffer; nothing is reinterpreted in
//! place, so a header read from flash or staged from packets is handled the
//! same way.
//!
//! Layout:
//! ```text
//! Offset  Size    Field
//! 0x000   4       Magic ("TRZF" main, "5283" companion)
//! 0x004   4       Header length (not checked, see below)
//! 0x008   4       Expiry (reserved)
//! 0x00C   4       Code length
//! 0x010   4       Version
//! 0x014   4       Fix version
//! 0x018   8       Reserved
//! 0x020   16x32   Chunk content hashes (SHA-256)
//! 0x220   64      Signature 1
//! 0x260   64      Signature 2
//! 0x2A0   64      Signature 3
//! 0x2E0   1       Signature 1 key index
//! 0x2E1   1       Signature 2 key index
//! 0x2E2   1       Signature 3 key index
//! 0x2E3   220     Reserved
//! 0x3BF   1       Signature mask (reserved)
//! 0x3C0   64      Signature (reserved)
//! ```
//!
//! The header length field once carried a reset-handler pointer for older
//! bootloaders and is kept verbatim without validation.

use wb_common::constants::{
    DIGEST_SIZE, FIRMWARE_HEADER_LEN, FIRMWARE_MAGIC_COMPANION, FIRMWARE_MAGIC_NEW,
    HASH_SLOTS, SIGNATURE_SIZE, SIGNATURE_SLOTS,
};

const OFF_MAGIC: usize = 0x000;
const OFF_HDRLEN: usize = 0x004;
const OFF_EXPIRY: usize = 0x008;
const OFF_CODELEN: usize = 0x00C;
const OFF_VERSION: usize = 0x010;
const OFF_FIX_VERSION: usize = 0x014;
const OFF_RESERVED0: usize = 0x018;
const OFF_HASHES: usize = 0x020;
const OFF_SIGS: usize = 0x220;
const OFF_SIGINDEX: usize = 0x2E0;
const OFF_RESERVED1: usize = 0x2E3;
const OFF_SIGMASK: usize = 0x3BF;
const OFF_SIG: usize = 0x3C0;

const RESERVED0_LEN: usize = 8;
const RESERVED1_LEN: usize = OFF_SIGMASK - OFF_RESERVED1;

/// Flash target selected by an image magic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTarget {
    /// Main MCU application region
    MainMcu,
    /// Companion radio chip, staged in main flash first
    CompanionRadio,
}

impl UpdateTarget {
    /// Target for a streamed image magic
    #[must_use]
    pub const fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            FIRMWARE_MAGIC_NEW => Some(Self::MainMcu),
            FIRMWARE_MAGIC_COMPANION => Some(Self::CompanionRadio),
            _ => None,
        }
    }

    /// Magic an image for this target must carry
    #[must_use]
    pub const fn magic(&self) -> u32 {
        match self {
            Self::MainMcu => FIRMWARE_MAGIC_NEW,
            Self::CompanionRadio => FIRMWARE_MAGIC_COMPANION,
        }
    }
}

/// One of the three signature slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureSlot {
    /// 1-based key index into a key set
    pub index: u8,
    /// Compact secp256k1 signature (r || s)
    pub signature: [u8; SIGNATURE_SIZE],
}

/// Decoded firmware header
#[derive(Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Format magic
    pub magic: u32,
    /// Legacy header length word, preserved unchecked
    pub hdrlen: u32,
    /// Reserved expiry word
    pub expiry: u32,
    /// Code length following the header
    pub codelen: u32,
    /// Firmware version
    pub version: u32,
    /// Lowest version this firmware can be downgraded to without a wipe
    pub fix_version: u32,
    reserved0: [u8; RESERVED0_LEN],
    /// Per-chunk SHA-256 digests; unused slots are zero
    pub hashes: [[u8; DIGEST_SIZE]; HASH_SLOTS],
    /// Signature slots
    pub slots: [SignatureSlot; SIGNATURE_SLOTS],
    reserved1: [u8; RESERVED1_LEN],
    /// Reserved signature mask
    pub sigmask: u8,
    /// Reserved trailing signature
    pub sig: [u8; SIGNATURE_SIZE],
}

fn read_u32(bytes: &[u8; FIRMWARE_HEADER_LEN], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_array<const N: usize>(bytes: &[u8; FIRMWARE_HEADER_LEN], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

impl ImageHeader {
    /// Decode a header from its 1024-byte encoding
    #[must_use]
    pub fn from_bytes(bytes: &[u8; FIRMWARE_HEADER_LEN]) -> Self {
        let mut hashes = [[0u8; DIGEST_SIZE]; HASH_SLOTS];
        for (i, hash) in hashes.iter_mut().enumerate() {
            *hash = read_array(bytes, OFF_HASHES + i * DIGEST_SIZE);
        }

        let mut slots = [SignatureSlot {
            index: 0,
            signature: [0u8; SIGNATURE_SIZE],
        }; SIGNATURE_SLOTS];
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.index = bytes[OFF_SIGINDEX + i];
            slot.signature = read_array(bytes, OFF_SIGS + i * SIGNATURE_SIZE);
        }

        Self {
            magic: read_u32(bytes, OFF_MAGIC),
            hdrlen: read_u32(bytes, OFF_HDRLEN),
            expiry: read_u32(bytes, OFF_EXPIRY),
            codelen: read_u32(bytes, OFF_CODELEN),
            version: read_u32(bytes, OFF_VERSION),
            fix_version: read_u32(bytes, OFF_FIX_VERSION),
            reserved0: read_array(bytes, OFF_RESERVED0),
            hashes,
            slots,
            reserved1: read_array(bytes, OFF_RESERVED1),
            sigmask: bytes[OFF_SIGMASK],
            sig: read_array(bytes, OFF_SIG),
        }
    }

    /// Encode the header back into its 1024-byte form
    #[must_use]
    pub fn to_bytes(&self) -> [u8; FIRMWARE_HEADER_LEN] {
        let mut out = [0u8; FIRMWARE_HEADER_LEN];
        out[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&self.magic.to_le_bytes());
        out[OFF_HDRLEN..OFF_HDRLEN + 4].copy_from_slice(&self.hdrlen.to_le_bytes());
        out[OFF_EXPIRY..OFF_EXPIRY + 4].copy_from_slice(&self.expiry.to_le_bytes());
        out[OFF_CODELEN..OFF_CODELEN + 4].copy_from_slice(&self.codelen.to_le_bytes());
        out[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&self.version.to_le_bytes());
        out[OFF_FIX_VERSION..OFF_FIX_VERSION + 4].copy_from_slice(&self.fix_version.to_le_bytes());
        out[OFF_RESERVED0..OFF_RESERVED0 + RESERVED0_LEN].copy_from_slice(&self.reserved0);
        for (i, hash) in self.hashes.iter().enumerate() {
            let at = OFF_HASHES + i * DIGEST_SIZE;
            out[at..at + DIGEST_SIZE].copy_from_slice(hash);
        }
        for (i, slot) in self.slots.iter().enumerate() {
            let at = OFF_SIGS + i * SIGNATURE_SIZE;
            out[at..at + SIGNATURE_SIZE].copy_from_slice(&slot.signature);
            out[OFF_SIGINDEX + i] = slot.index;
        }
        out[OFF_RESERVED1..OFF_SIGMASK].copy_from_slice(&self.reserved1);
        out[OFF_SIGMASK] = self.sigmask;
        out[OFF_SIG..OFF_SIG + SIGNATURE_SIZE].copy_from_slice(&self.sig);
        out
    }

    /// Encoding with every signature and key index zeroed
    ///
    /// This is the message the vendor signs.
    #[must_use]
    pub fn unsigned_bytes(&self) -> [u8; FIRMWARE_HEADER_LEN] {
        let mut out = self.to_bytes();
        out[OFF_SIGS..OFF_SIGS + SIGNATURE_SLOTS * SIGNATURE_SIZE].fill(0);
        out[OFF_SIGINDEX..OFF_SIGINDEX + SIGNATURE_SLOTS].fill(0);
        out
    }

    /// Key indices of the three slots
    #[must_use]
    pub fn key_indices(&self) -> [u8; SIGNATURE_SLOTS] {
        [self.slots[0].index, self.slots[1].index, self.slots[2].index]
    }
}

impl core::fmt::Debug for ImageHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ImageHeader")
            .field("magic", &format_args!("{:#010x}", self.magic))
            .field("codelen", &self.codelen)
            .field("version", &self.version)
            .field("fix_version", &self.fix_version)
            .field("indices", &self.key_indices())
            .finish_non_exhaustive()
    }
}
