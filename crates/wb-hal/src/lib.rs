// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Hardware Abstraction Layer for the wallet bootloader
//!
//! The boot and update logic never touches a register. It talks to the
//! hardware through three traits:
//!
//! - [`FlashController`]: sector erase and word program on the internal flash
//! - [`CompanionDebugPort`]: page programming of the companion radio chip
//! - [`SystemControl`]: reset and the RAM-clearing jump into firmware
//!
//! # Platforms
//!
//! - **STM32F2**: ARM Cortex-M3, 1 MiB internal flash (`stm32f2` feature)
//! - Host builds have no driver and use in-test fakes of the traits
//!
//! # Security
//!
//! - Every busy-wait is bounded and reports `FlashTimeout` when exceeded
//! - Drivers never retry a failed erase or program

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod sectors;
pub mod traits;

#[cfg(feature = "stm32f2")]
pub mod stm32f2;

pub use error::{HalError, HalResult};
pub use sectors::{FlashSector, STM32F2_SECTORS};
pub use traits::*;
