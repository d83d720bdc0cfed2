// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Firmware Image Verification
//!
//! Authenticity and integrity checks for installed and incoming firmware.
//!
//! # Verification Process
//!
//! 1. Presence check: magic and code-length bounds, no cryptography
//! 2. Signatures: three secp256k1 ECDSA signatures over the header
//!    fingerprint, each from a distinct key index
//! 3. Content hashes: SHA-256 of every 64 KiB chunk of flashed code compared
//!    with the digests declared in the header
//!
//! # Security Features
//!
//! - Fails closed on the first slot that does not verify
//! - Duplicate key indices are rejected before any signature is checked
//! - Digest comparisons are constant time
//! - The last partial chunk is padded with the erased-flash value, and flash
//!   past the code must actually read erased

use crate::header::ImageHeader;
use crate::keys::KeySet;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use wb_common::config::MemoryLayout;
use wb_common::constants::{
    DIGEST_SIZE, FIRMWARE_HEADER_LEN, FIRMWARE_MAGIC_LEGACY, FIRMWARE_MAGIC_NEW, FLASH_FILLER,
    FW_CHUNK_SIZE, HASH_SLOTS, KEYS_PER_SET, LEGACY_CODELEN_OFFSET, LEGACY_SIGINDEX_OFFSET,
    LEGACY_SIG_OFFSET, MIN_CODE_LEN, MIN_LEGACY_CODE_LEN, SIGNATURE_SIZE, SIGNATURE_SLOTS,
};
use wb_common::Error;
use wb_hal::{FlashRead, HalError};

/// Read granularity when hashing flash
const READ_BLOCK: usize = 256;

// ============================================================================
// Verification Error Types
// ============================================================================

/// Verification error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// Magic does not match the expected format
    InvalidMagic,
    /// Code length outside the accepted bounds
    LengthOutOfRange,
    /// A key index is outside 1..=5
    InvalidKeyIndex,
    /// Two slots use the same key index
    DuplicateKeyIndex,
    /// A slot did not verify against any key set
    SignatureInvalid,
    /// A chunk digest differs from the declared hash
    HashMismatch,
    /// A hash slot past the last used chunk is not zero
    StaleHashSlot,
    /// Flash past the end of the code is not erased
    FillerMismatch,
    /// Flash could not be read
    Flash(HalError),
}

impl From<VerifyError> for Error {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::InvalidMagic => Error::InvalidMagic,
            VerifyError::LengthOutOfRange => Error::InvalidLength,
            VerifyError::InvalidKeyIndex => Error::InvalidKeyIndex,
            VerifyError::DuplicateKeyIndex => Error::DuplicateKeyIndex,
            VerifyError::SignatureInvalid => Error::SignatureInvalid,
            VerifyError::HashMismatch | VerifyError::FillerMismatch => Error::HashMismatch,
            VerifyError::StaleHashSlot => Error::StaleHashSlot,
            VerifyError::Flash(e) => e.into(),
        }
    }
}

impl From<HalError> for VerifyError {
    fn from(e: HalError) -> Self {
        Self::Flash(e)
    }
}

// ============================================================================
// Filler-Padded Hashing
// ============================================================================

/// SHA-256 that can be finalized as if padded with erased flash
pub struct FillerHasher {
    hasher: Sha256,
    len: usize,
}

impl FillerHasher {
    /// Start a new digest
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            len: 0,
        }
    }

    /// Absorb data
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len();
    }

    /// Bytes absorbed so far
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if nothing has been absorbed
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pad with `0xFF` up to `width` bytes and finalize
    #[must_use]
    pub fn finalize_filled(mut self, width: usize) -> [u8; DIGEST_SIZE] {
        const FILL: [u8; READ_BLOCK] = [FLASH_FILLER; READ_BLOCK];
        let mut remaining = width.saturating_sub(self.len);
        while remaining > 0 {
            let n = remaining.min(READ_BLOCK);
            self.hasher.update(&FILL[..n]);
            remaining -= n;
        }
        self.hasher.finalize().into()
    }
}

impl Default for FillerHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of `data` padded with `0xFF` up to `width`
#[must_use]
pub fn filled_digest(data: &[u8], width: usize) -> [u8; DIGEST_SIZE] {
    let mut hasher = FillerHasher::new();
    hasher.update(data);
    hasher.finalize_filled(width)
}

/// Constant-time digest comparison
#[must_use]
pub fn digests_equal(a: &[u8; DIGEST_SIZE], b: &[u8; DIGEST_SIZE]) -> bool {
    a.ct_eq(b).into()
}

/// Hash `len` bytes of flash at `address` into `hasher`
fn hash_flash<F: FlashRead + ?Sized>(
    flash: &F,
    hasher: &mut FillerHasher,
    address: u32,
    len: usize,
) -> Result<(), VerifyError> {
    let mut block = [0u8; READ_BLOCK];
    let mut done = 0usize;
    while done < len {
        let n = (len - done).min(READ_BLOCK);
        flash.read(address + done as u32, &mut block[..n])?;
        hasher.update(&block[..n]);
        done += n;
    }
    Ok(())
}

/// Check that `len` bytes of flash at `address` read as erased
fn flash_is_filler<F: FlashRead + ?Sized>(
    flash: &F,
    address: u32,
    len: usize,
) -> Result<bool, VerifyError> {
    let mut block = [0u8; READ_BLOCK];
    let mut done = 0usize;
    while done < len {
        let n = (len - done).min(READ_BLOCK);
        flash.read(address + done as u32, &mut block[..n])?;
        if block[..n].iter().any(|&b| b != FLASH_FILLER) {
            return Ok(false);
        }
        done += n;
    }
    Ok(true)
}

// ============================================================================
// Presence
// ============================================================================

/// Installed firmware format probed by [`presence_check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareFormat {
    /// Header in front of the code at the firmware region start
    New,
    /// Metadata at the start of secret storage, code at the firmware region
    Legacy,
}

/// Cheap check for installed firmware: magic and length bounds only
pub fn presence_check<F: FlashRead + ?Sized>(
    flash: &F,
    layout: &MemoryLayout,
    format: FirmwareFormat,
) -> bool {
    let (magic_at, codelen_at, magic, min) = match format {
        FirmwareFormat::New => (
            layout.header_start(),
            layout.header_start() + 12,
            FIRMWARE_MAGIC_NEW,
            MIN_CODE_LEN,
        ),
        FirmwareFormat::Legacy => (
            layout.storage.start,
            layout.storage.start + LEGACY_CODELEN_OFFSET,
            FIRMWARE_MAGIC_LEGACY,
            MIN_LEGACY_CODE_LEN,
        ),
    };

    match (flash.read_u32(magic_at), flash.read_u32(codelen_at)) {
        (Ok(m), Ok(codelen)) => m == magic && codelen >= min && codelen <= layout.app_max_len(),
        _ => false,
    }
}

/// Read the installed new-format header
pub fn read_header<F: FlashRead + ?Sized>(
    flash: &F,
    layout: &MemoryLayout,
) -> Result<ImageHeader, VerifyError> {
    let mut raw = [0u8; FIRMWARE_HEADER_LEN];
    flash.read(layout.header_start(), &mut raw)?;
    Ok(ImageHeader::from_bytes(&raw))
}

// ============================================================================
// Signatures
// ============================================================================

/// SHA-256 of the header with signatures and key indices zeroed
#[must_use]
pub fn fingerprint(header: &ImageHeader) -> [u8; DIGEST_SIZE] {
    Sha256::digest(header.unsigned_bytes()).into()
}

/// Check one signature slot against an ordered list of key sets
///
/// Stops at the first key set whose key at `index` accepts the signature.
/// High-S signatures are normalized before verification.
pub fn verify_slot<'a, I>(
    keysets: I,
    index: u8,
    digest: &[u8; DIGEST_SIZE],
    signature: &[u8; SIGNATURE_SIZE],
) -> bool
where
    I: IntoIterator<Item = &'a KeySet>,
{
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    let sig = sig.normalize_s().unwrap_or(sig);

    keysets.into_iter().any(|set| {
        set.key(index)
            .and_then(|key| VerifyingKey::from_sec1_bytes(key).ok())
            .is_some_and(|vk| vk.verify_prehash(digest, &sig).is_ok())
    })
}

/// Key indices must be in 1..=5 and pairwise distinct
fn check_indices(indices: [u8; SIGNATURE_SLOTS]) -> Result<(), VerifyError> {
    if indices
        .iter()
        .any(|&i| i < 1 || usize::from(i) > KEYS_PER_SET)
    {
        return Err(VerifyError::InvalidKeyIndex);
    }
    if indices[0] == indices[1] || indices[0] == indices[2] || indices[1] == indices[2] {
        return Err(VerifyError::DuplicateKeyIndex);
    }
    Ok(())
}

/// Key set order for a signature check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyOrder {
    Forward,
    Reverse,
}

fn verify_triple(
    keysets: &[KeySet],
    order: KeyOrder,
    indices: [u8; SIGNATURE_SLOTS],
    signatures: &[[u8; SIGNATURE_SIZE]; SIGNATURE_SLOTS],
    digest: &[u8; DIGEST_SIZE],
) -> Result<(), VerifyError> {
    check_indices(indices)?;

    for (&index, signature) in indices.iter().zip(signatures) {
        let ok = match order {
            KeyOrder::Forward => verify_slot(keysets.iter(), index, digest, signature),
            KeyOrder::Reverse => verify_slot(keysets.iter().rev(), index, digest, signature),
        };
        if !ok {
            return Err(VerifyError::SignatureInvalid);
        }
    }
    Ok(())
}

/// Verify the three header signatures
///
/// Returns the fingerprint on success.
pub fn verify_signatures(
    header: &ImageHeader,
    keysets: &[KeySet],
) -> Result<[u8; DIGEST_SIZE], VerifyError> {
    let digest = fingerprint(header);
    let signatures = [
        header.slots[0].signature,
        header.slots[1].signature,
        header.slots[2].signature,
    ];
    verify_triple(keysets, KeyOrder::Forward, header.key_indices(), &signatures, &digest)?;
    Ok(digest)
}

/// Verify a legacy image: metadata in secret storage, digest over the code
///
/// Key sets are tried in reverse order.
pub fn verify_legacy_signatures<F: FlashRead + ?Sized>(
    flash: &F,
    layout: &MemoryLayout,
    keysets: &[KeySet],
) -> Result<(), VerifyError> {
    let meta = layout.storage.start;
    let codelen = flash.read_u32(meta + LEGACY_CODELEN_OFFSET)?;
    if codelen > layout.app_max_len() {
        return Err(VerifyError::LengthOutOfRange);
    }

    let mut indices = [0u8; SIGNATURE_SLOTS];
    flash.read(meta + LEGACY_SIGINDEX_OFFSET, &mut indices)?;

    let mut signatures = [[0u8; SIGNATURE_SIZE]; SIGNATURE_SLOTS];
    for (i, sig) in signatures.iter_mut().enumerate() {
        flash.read(meta + LEGACY_SIG_OFFSET * (i as u32 + 1), sig)?;
    }

    let mut hasher = Sha256::new();
    let mut block = [0u8; READ_BLOCK];
    let mut done = 0u32;
    while done < codelen {
        let n = (codelen - done).min(READ_BLOCK as u32);
        let buf = &mut block[..n as usize];
        flash.read(layout.legacy_app_start() + done, buf)?;
        hasher.update(&*buf);
        done += n;
    }
    let digest: [u8; DIGEST_SIZE] = hasher.finalize().into();

    verify_triple(keysets, KeyOrder::Reverse, indices, &signatures, &digest)
}

// ============================================================================
// Content Hashes
// ============================================================================

/// Number of 64 KiB chunks an image of `codelen` bytes spans, header included
#[must_use]
pub fn used_chunks(codelen: u32) -> usize {
    (FIRMWARE_HEADER_LEN + codelen as usize).div_ceil(FW_CHUNK_SIZE)
}

/// Every hash slot from `first_unused` on must be zero
pub fn check_unused_slots(header: &ImageHeader, first_unused: usize) -> Result<(), VerifyError> {
    let stale = header
        .hashes
        .iter()
        .skip(first_unused)
        .any(|h| h.iter().any(|&b| b != 0));
    if stale {
        Err(VerifyError::StaleHashSlot)
    } else {
        Ok(())
    }
}

/// Recompute and compare the content hash of every used chunk
///
/// Chunk 0 covers the code after the header (63 KiB); later chunks cover
/// 64 KiB starting at the header address plus `i * 64 KiB`. The last used
/// chunk is hashed as code plus `0xFF` filler, and the flash under the filler
/// must itself be erased.
pub fn verify_content_hashes<F: FlashRead + ?Sized>(
    flash: &F,
    layout: &MemoryLayout,
    header: &ImageHeader,
) -> Result<(), VerifyError> {
    if header.codelen > layout.app_max_len() {
        return Err(VerifyError::LengthOutOfRange);
    }

    let total = FIRMWARE_HEADER_LEN + header.codelen as usize;
    let used = used_chunks(header.codelen);
    if used > HASH_SLOTS {
        return Err(VerifyError::LengthOutOfRange);
    }
    check_unused_slots(header, used)?;

    for (i, expected) in header.hashes.iter().enumerate().take(used) {
        let chunk_start = i * FW_CHUNK_SIZE;
        let data_start = if i == 0 { FIRMWARE_HEADER_LEN } else { chunk_start };
        let width = FW_CHUNK_SIZE - (data_start - chunk_start);
        let occupied = total.min(chunk_start + FW_CHUNK_SIZE) - data_start;
        let address = layout.header_start() + data_start as u32;

        let mut hasher = FillerHasher::new();
        hash_flash(flash, &mut hasher, address, occupied)?;
        if !flash_is_filler(flash, address + occupied as u32, width - occupied)? {
            return Err(VerifyError::FillerMismatch);
        }
        if !digests_equal(&hasher.finalize_filled(width), expected) {
            return Err(VerifyError::HashMismatch);
        }
    }
    Ok(())
}

/// Full check of the installed new-format image
///
/// Returns the fingerprint when both signatures and hashes verify.
pub fn verify_installed<F: FlashRead + ?Sized>(
    flash: &F,
    layout: &MemoryLayout,
    keysets: &[KeySet],
) -> Result<[u8; DIGEST_SIZE], VerifyError> {
    if !presence_check(flash, layout, FirmwareFormat::New) {
        return Err(VerifyError::InvalidMagic);
    }
    let header = read_header(flash, layout)?;
    let fp = verify_signatures(&header, keysets)?;
    verify_content_hashes(flash, layout, &header)?;
    Ok(fp)
}
