// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Display and button collaborator

use wb_common::constants::DIGEST_SIZE;
use wb_common::{Error, ErrorKind};

/// Screens the bootloader asks the display to show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Confirm wiping storage and firmware
    WipeDevice,
    /// Wipe finished
    WipeSuccess,
    /// Wipe declined
    WipeFailed,
    /// Confirm replacing the installed firmware
    ConfirmMainUpdate,
    /// Confirm replacing the companion firmware
    ConfirmRadioUpdate,
    /// Erase declined
    UpdateCancelled,
    /// Malformed upload
    UpdateDataError,
    /// Image did not verify and was erased
    UpdateFailed,
    /// Update installed
    UpdateSuccess,
    /// Flash hardware fault
    FlashFault,
    /// Companion chip refused the image
    CompanionUpdateFailed,
    /// Installed firmware is not signed
    FirmwareUnofficial,
    /// Installed firmware content is corrupted
    FirmwareBroken,
    /// A previous companion update did not complete
    UpdateMandatory,
}

impl Prompt {
    /// Halt screen for a failed session
    #[must_use]
    pub const fn for_error(error: Error) -> Self {
        match error {
            Error::CompanionFlashFailed => Self::CompanionUpdateFailed,
            _ => match error.kind() {
                ErrorKind::Structural => Self::UpdateDataError,
                ErrorKind::SignatureInvalid | ErrorKind::HashMismatch => Self::UpdateFailed,
                ErrorKind::HardwareFault => Self::FlashFault,
                ErrorKind::UserCancelled => Self::UpdateCancelled,
            },
        }
    }
}

/// Display and physical buttons
pub trait UserInterface {
    /// Show a prompt
    fn show(&mut self, prompt: Prompt);

    /// Show update progress in permille
    fn progress(&mut self, permille: u16);

    /// Show the fingerprint of an unsigned image
    fn show_fingerprint(&mut self, fingerprint: &[u8; DIGEST_SIZE]);

    /// Poll the buttons once: `Some(true)` confirm, `Some(false)` decline
    fn poll_decision(&mut self) -> Option<bool>;

    /// Block until the user confirms or declines
    fn await_decision(&mut self) -> bool {
        loop {
            if let Some(decision) = self.poll_decision() {
                return decision;
            }
            core::hint::spin_loop();
        }
    }

    /// Show `prompt` and block until the confirm button is pressed
    fn acknowledge(&mut self, prompt: Prompt) {
        self.show(prompt);
        while !self.await_decision() {}
    }
}
