// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Wallet Bootloader Common Library
//!
//! Types shared by every crate in the bootloader workspace: the unified
//! error type, compile-time memory layout and timing configuration, image
//! and protocol constants, and the in-RAM diagnostic log.
//!
//! # Features
//!
//! - `std`: Enable standard library support (disabled by default for embedded)
//! - `defmt`: Mirror log records to defmt for on-target debugging
//!
//! # Security
//!
//! No heap allocations are performed. Nothing in this crate ever holds key
//! material or staged firmware plaintext.

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(feature = "std")]
extern crate std;

pub mod errors;
pub mod config;
pub mod constants;
pub mod log;

// Re-export commonly used items
pub use errors::{Error, ErrorKind, Result};
pub use config::{FlashRegion, FlashTiming, MemoryLayout, SystemConfig};
pub use log::{LogBuffer, LogLevel};
