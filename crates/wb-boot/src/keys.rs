// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Trusted firmware signing keys
//!
//! Two fixed sets of five uncompressed secp256k1 public keys. A signature
//! slot references a key by its 1-based index, and the slot verifies if the
//! key at that index in either set accepts the signature.
//!
//! The key sets are compile-time constants. Nothing in the bootloader can
//! add, replace or revoke a key.

use wb_common::constants::{KEYS_PER_SET, PUBLIC_KEY_SIZE};

/// An ordered set of five trusted public keys
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeySet {
    name: &'static str,
    keys: [[u8; PUBLIC_KEY_SIZE]; KEYS_PER_SET],
}

impl KeySet {
    /// Create a key set from uncompressed SEC1 keys
    #[must_use]
    pub const fn new(name: &'static str, keys: [[u8; PUBLIC_KEY_SIZE]; KEYS_PER_SET]) -> Self {
        Self { name, keys }
    }

    /// Key referenced by a 1-based signature slot index
    #[must_use]
    pub fn key(&self, index: u8) -> Option<&[u8; PUBLIC_KEY_SIZE]> {
        let slot = usize::from(index).checked_sub(1)?;
        self.keys.get(slot)
    }
}

impl core::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeySet").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Primary vendor key set
pub const PRIMARY_KEYSET: KeySet = KeySet::new("primary", [
    [
        0x04, 0xd5, 0x71, 0xb7, 0xf1, 0x48, 0xc5, 0xe4, 0x23, 0x2c, 0x38, 0x14, 0xf7,
        0x77, 0xd8, 0xfa, 0xea, 0xf1, 0xa8, 0x42, 0x16, 0xc7, 0x8d, 0x56, 0x9b, 0x71,
        0x04, 0x1f, 0xfc, 0x76, 0x8a, 0x5b, 0x2d, 0x81, 0x0f, 0xc3, 0xbb, 0x13, 0x4d,
        0xd0, 0x26, 0xb5, 0x7e, 0x65, 0x00, 0x52, 0x75, 0xae, 0xde, 0xf4, 0x3e, 0x15,
        0x5f, 0x48, 0xfc, 0x11, 0xa3, 0x2e, 0xc7, 0x90, 0xa9, 0x33, 0x12, 0xbd, 0x58,
    ],
    [
        0x04, 0x63, 0x27, 0x9c, 0x0c, 0x08, 0x66, 0xe5, 0x0c, 0x05, 0xc7, 0x99, 0xd3,
        0x2b, 0xd6, 0xba, 0xb0, 0x18, 0x8b, 0x6d, 0xe0, 0x65, 0x36, 0xd1, 0x10, 0x9d,
        0x2e, 0xd9, 0xce, 0x76, 0xcb, 0x33, 0x5c, 0x49, 0x0e, 0x55, 0xae, 0xe1, 0x0c,
        0xc9, 0x01, 0x21, 0x51, 0x32, 0xe8, 0x53, 0x09, 0x7d, 0x54, 0x32, 0xed, 0xa0,
        0x6b, 0x79, 0x20, 0x73, 0xbd, 0x77, 0x40, 0xc9, 0x4c, 0xe4, 0x51, 0x6c, 0xb1,
    ],
    [
        0x04, 0x43, 0xae, 0xdb, 0xb6, 0xf7, 0xe7, 0x1c, 0x56, 0x3f, 0x8e, 0xd2, 0xef,
        0x64, 0xec, 0x99, 0x81, 0x48, 0x25, 0x19, 0xe7, 0xef, 0x4f, 0x4a, 0xa9, 0x8b,
        0x27, 0x85, 0x4e, 0x8c, 0x49, 0x12, 0x6d, 0x49, 0x56, 0xd3, 0x00, 0xab, 0x45,
        0xfd, 0xc3, 0x4c, 0xd2, 0x6b, 0xc8, 0x71, 0x0d, 0xe0, 0xa3, 0x1d, 0xbd, 0xf6,
        0xde, 0x74, 0x35, 0xfd, 0x0b, 0x49, 0x2b, 0xe7, 0x0a, 0xc7, 0x5f, 0xde, 0x58,
    ],
    [
        0x04, 0x87, 0x7c, 0x39, 0xfd, 0x7c, 0x62, 0x23, 0x7e, 0x03, 0x82, 0x35, 0xe9,
        0xc0, 0x75, 0xda, 0xb2, 0x61, 0x63, 0x0f, 0x78, 0xee, 0xb8, 0xed, 0xb9, 0x24,
        0x87, 0x15, 0x9f, 0xff, 0xed, 0xfd, 0xf6, 0x04, 0x6c, 0x6f, 0x8b, 0x88, 0x1f,
        0xa4, 0x07, 0xc4, 0xa4, 0xce, 0x6c, 0x28, 0xde, 0x0b, 0x19, 0xc1, 0xf4, 0xe2,
        0x9f, 0x1f, 0xcb, 0xc5, 0xa5, 0x8f, 0xfd, 0x14, 0x32, 0xa3, 0xe0, 0x93, 0x8a,
    ],
    [
        0x04, 0x73, 0x84, 0xc5, 0x1a, 0xe8, 0x1a, 0xdd, 0x0a, 0x52, 0x3a, 0xdb, 0xb1,
        0x86, 0xc9, 0x1b, 0x90, 0x6f, 0xfb, 0x64, 0xc2, 0xc7, 0x65, 0x80, 0x2b, 0xf2,
        0x6d, 0xbd, 0x13, 0xbd, 0xf1, 0x2c, 0x31, 0x9e, 0x80, 0xc2, 0x21, 0x3a, 0x13,
        0x6c, 0x8e, 0xe0, 0x3d, 0x78, 0x74, 0xfd, 0x22, 0xb7, 0x0d, 0x68, 0xe7, 0xde,
        0xe4, 0x69, 0xde, 0xcf, 0xbb, 0xb5, 0x10, 0xee, 0x9a, 0x46, 0x0c, 0xda, 0x45,
    ],
]);

/// Secondary vendor key set
pub const SECONDARY_KEYSET: KeySet = KeySet::new("secondary", [
    [
        0x04, 0xad, 0x90, 0x35, 0xd6, 0x7a, 0xc4, 0x79, 0x5c, 0x91, 0x3c, 0x45, 0x2d,
        0x25, 0x15, 0x6f, 0x0b, 0x09, 0x4c, 0x34, 0xf6, 0x56, 0xa2, 0x49, 0xb9, 0x4d,
        0x8d, 0x66, 0x19, 0xab, 0x0d, 0x92, 0xb1, 0xe8, 0xbc, 0xc3, 0x28, 0xbd, 0xc8,
        0x33, 0xb9, 0xb5, 0x1c, 0xa3, 0x1b, 0xfd, 0x01, 0x36, 0x61, 0x51, 0x53, 0xf9,
        0x3a, 0xba, 0x46, 0xd0, 0x2a, 0xb5, 0xd9, 0x25, 0xf4, 0xf3, 0x64, 0xc6, 0x66,
    ],
    [
        0x04, 0x95, 0xb8, 0x3d, 0xa4, 0x42, 0xc6, 0x89, 0xbd, 0xa8, 0x2e, 0x9f, 0x95,
        0x43, 0x81, 0x1f, 0xec, 0x2f, 0x58, 0x33, 0x4f, 0x5c, 0x76, 0x36, 0x1f, 0x5a,
        0x49, 0xfb, 0xb6, 0x63, 0x4a, 0x81, 0x15, 0x2c, 0x6d, 0xa7, 0xb8, 0xa1, 0x78,
        0x2c, 0xca, 0xa9, 0x28, 0x7e, 0xc7, 0xa8, 0xef, 0xe9, 0xd8, 0xbb, 0xa7, 0xd9,
        0x01, 0x80, 0xf7, 0xb7, 0x19, 0xc0, 0x17, 0xd8, 0x04, 0xd6, 0x1c, 0x3d, 0x5d,
    ],
    [
        0x04, 0xe0, 0xd5, 0xef, 0x94, 0xcf, 0x95, 0x0b, 0x9f, 0x85, 0x5f, 0xb5, 0x52,
        0x67, 0x64, 0xdc, 0x28, 0xd2, 0xd9, 0x65, 0x82, 0xc1, 0xca, 0x1a, 0xd3, 0x9c,
        0xab, 0xab, 0x65, 0x3e, 0x61, 0x98, 0xf8, 0x0e, 0x64, 0x95, 0xe5, 0x36, 0xb8,
        0xbc, 0xe3, 0x78, 0x57, 0xda, 0xfc, 0x5a, 0x51, 0x95, 0x26, 0x24, 0xab, 0x08,
        0x3c, 0x33, 0x16, 0x8e, 0xe3, 0xed, 0x83, 0xe0, 0x36, 0xde, 0xfa, 0xb8, 0x5c,
    ],
    [
        0x04, 0xc9, 0xec, 0x74, 0x0c, 0xb3, 0x32, 0x81, 0x65, 0xdc, 0x3f, 0xdb, 0x93,
        0xa5, 0x4e, 0x70, 0x75, 0x56, 0x9b, 0x7a, 0x54, 0xcd, 0xee, 0xc0, 0x21, 0x1f,
        0xa9, 0xd9, 0x52, 0xc6, 0x64, 0x79, 0x60, 0xbd, 0x95, 0xf9, 0x94, 0xc8, 0x17,
        0x45, 0x88, 0x92, 0xd5, 0xdb, 0x6e, 0xb3, 0x4d, 0xa7, 0x6c, 0xe0, 0x3c, 0x9c,
        0x04, 0xa4, 0x32, 0x5c, 0x27, 0x52, 0x64, 0x75, 0x90, 0xb1, 0xa4, 0xf3, 0x65,
    ],
    [
        0x04, 0xd2, 0x08, 0xab, 0xa7, 0x9b, 0x6f, 0x60, 0xf1, 0x78, 0x60, 0x81, 0x67,
        0xdd, 0xb7, 0x77, 0x86, 0x0a, 0x81, 0x55, 0x02, 0x2e, 0x28, 0xf1, 0x20, 0xa4,
        0x16, 0x30, 0x86, 0x9a, 0x4e, 0x0f, 0x0d, 0x16, 0x98, 0xa4, 0x0e, 0xed, 0x2a,
        0xed, 0xf7, 0x48, 0x46, 0xe1, 0xe4, 0x01, 0xce, 0xe6, 0xfd, 0xb1, 0xe8, 0x11,
        0x16, 0xd1, 0x4c, 0xd2, 0x97, 0x12, 0x70, 0xf2, 0xcb, 0x0c, 0x56, 0x2c, 0x2e,
    ],
]);

/// Key sets in the order new-format headers try them
pub static DEFAULT_KEYSETS: [KeySet; 2] = [PRIMARY_KEYSET, SECONDARY_KEYSET];
