// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! STM32F205 platform support
//!
//! Register-level drivers for the internal flash controller and the core
//! system control block.

pub mod flash;
pub mod system;

pub use flash::Stm32f2Flash;
pub use system::{ButtonPin, Stm32f2System};
