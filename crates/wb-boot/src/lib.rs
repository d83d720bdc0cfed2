// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Wallet Secure Bootloader Library
//!
//! This crate provides the secure boot and firmware update core:
//!
//! - **Header / Keys**: Firmware header codec and the fixed vendor key sets
//! - **Verify**: Triple-signature and per-chunk content hash verification
//! - **Programmer / Companion**: Blocking flash erase and program, and page
//!   relay into the companion radio chip
//! - **Session**: Packet-driven update state machine
//! - **Relay**: Interrupt-fed transport over the companion link
//! - **Boot**: Power-on decision and jump into firmware

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(test)]
extern crate std;

pub mod boot;
pub mod companion;
pub mod header;
pub mod keys;
pub mod programmer;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod ui;
pub mod verify;

pub use boot::{decide, inspect_firmware, BootDecision, BootInputs, FirmwareVerdict, PacketSource};
pub use header::{ImageHeader, UpdateTarget};
pub use keys::{KeySet, DEFAULT_KEYSETS};
pub use programmer::FlashProgrammer;
pub use protocol::{Packet, Response, ResponseSink, TransportKind};
pub use session::{Flow, Peripherals, SessionState, UpdateSession};
pub use ui::{Prompt, UserInterface};
pub use verify::{fingerprint, verify_content_hashes, verify_signatures, VerifyError};
