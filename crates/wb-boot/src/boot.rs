// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Cold Boot Decision
//!
//! Decides on every power-on whether the installed firmware runs.
//!
//! # Decision Order
//!
//! 1. A pending companion update refuses to boot until reset
//! 2. The override button or the session flag keeps the bootloader
//! 3. No firmware: update loop
//! 4. Firmware that fails its signature or content hash check: prompt,
//!    wait for acknowledgement, then update loop
//! 5. Otherwise clear RAM and jump
//!
//! The decision itself is a pure function of [`BootInputs`]; the runner
//! gathers the inputs from hardware and carries the decision out.

use crate::header::ImageHeader;
use crate::keys::KeySet;
use crate::protocol::ResponseSink;
use crate::session::{Flow, Peripherals, UpdateSession};
use crate::ui::{Prompt, UserInterface};
use crate::verify::{
    presence_check, read_header, verify_content_hashes, verify_signatures, FirmwareFormat,
};
use wb_common::config::{MemoryLayout, SystemConfig};
use wb_common::{log_error, log_info, log_warn};
use wb_hal::{CompanionDebugPort, FlashController, FlashRead, Handoff, SystemControl};

const MODULE: &str = "boot";

/// Result of checking the installed firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareVerdict {
    /// Not inspected because the bootloader was requested
    NotChecked,
    /// No new-format firmware present
    Absent,
    /// Signatures do not verify
    Unofficial,
    /// Signatures verify but content hashes do not
    Broken,
    /// Signatures and content hashes verify
    Valid,
}

/// Everything the boot decision depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootInputs {
    /// A previous companion update did not complete
    pub update_mandatory: bool,
    /// Override button held at power-on
    pub override_held: bool,
    /// Firmware asked for the bootloader through the RAM session flag
    pub session_flag_set: bool,
    /// Installed firmware check
    pub firmware: FirmwareVerdict,
}

impl BootInputs {
    /// Whether the bootloader was explicitly requested
    #[must_use]
    pub const fn stay_requested(&self) -> bool {
        self.override_held || self.session_flag_set
    }
}

/// What to do after power-on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDecision {
    /// Show the mandatory-update prompt, then reset
    RefuseMandatoryUpdate,
    /// Enter the update loop directly
    UpdateLoop,
    /// Show a prompt, wait for acknowledgement, then enter the update loop
    PromptThenUpdate(Prompt),
    /// Jump into the installed firmware
    Jump {
        /// Authenticity flag handed to the firmware
        signed: bool,
    },
}

/// Decide how to boot
#[must_use]
pub const fn decide(inputs: &BootInputs) -> BootDecision {
    if inputs.update_mandatory {
        return BootDecision::RefuseMandatoryUpdate;
    }
    if inputs.stay_requested() {
        return BootDecision::UpdateLoop;
    }
    match inputs.firmware {
        FirmwareVerdict::NotChecked | FirmwareVerdict::Absent => BootDecision::UpdateLoop,
        FirmwareVerdict::Unofficial => BootDecision::PromptThenUpdate(Prompt::FirmwareUnofficial),
        FirmwareVerdict::Broken => BootDecision::PromptThenUpdate(Prompt::FirmwareBroken),
        FirmwareVerdict::Valid => BootDecision::Jump { signed: true },
    }
}

/// Check the installed firmware: presence, then signatures, then content hashes
pub fn inspect_firmware<F: FlashRead + ?Sized>(
    flash: &F,
    layout: &MemoryLayout,
    keysets: &[KeySet],
) -> FirmwareVerdict {
    if !presence_check(flash, layout, FirmwareFormat::New) {
        return FirmwareVerdict::Absent;
    }
    let header: ImageHeader = match read_header(flash, layout) {
        Ok(h) => h,
        Err(_) => return FirmwareVerdict::Broken,
    };
    if verify_signatures(&header, keysets).is_err() {
        return FirmwareVerdict::Unofficial;
    }
    if verify_content_hashes(flash, layout, &header).is_err() {
        return FirmwareVerdict::Broken;
    }
    FirmwareVerdict::Valid
}

/// Read the boot inputs from hardware
///
/// The session flag is cleared once read so it applies to a single reset.
/// Firmware is only inspected when nothing else already decides the boot.
pub fn gather_inputs<Sys, F>(
    system: &mut Sys,
    flash: &F,
    config: &SystemConfig,
    keysets: &[KeySet],
    update_mandatory: bool,
) -> BootInputs
where
    Sys: SystemControl + ?Sized,
    F: FlashRead + ?Sized,
{
    let flag_addr = config.layout.session_flag_addr;
    let session_flag_set = system.read_session_flag(flag_addr) == config.boot.session_flag_value;
    if session_flag_set {
        system.clear_session_flag(flag_addr);
    }

    let mut inputs = BootInputs {
        update_mandatory,
        override_held: system.override_held(),
        session_flag_set,
        firmware: FirmwareVerdict::NotChecked,
    };
    if !inputs.update_mandatory && !inputs.stay_requested() {
        inputs.firmware = inspect_firmware(flash, &config.layout, keysets);
    }
    inputs
}

/// Source of host packets for the update loop
pub trait PacketSource {
    /// Deliver pending packets to the session
    ///
    /// Returns `Flow::Reset` as soon as the session asks for a reset.
    fn service<F, C, U, S>(
        &mut self,
        session: &mut UpdateSession<'_>,
        p: &mut Peripherals<F, C, U, S>,
    ) -> Flow
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink;
}

/// Run the boot decision; never returns
pub fn run<Sys, F, C, U, S, P>(
    system: &mut Sys,
    p: &mut Peripherals<F, C, U, S>,
    source: &mut P,
    config: &SystemConfig,
    keysets: &[KeySet],
    update_mandatory: bool,
) -> !
where
    Sys: SystemControl,
    F: FlashController,
    C: CompanionDebugPort,
    U: UserInterface,
    S: ResponseSink,
    P: PacketSource,
{
    let inputs = gather_inputs(system, &p.programmer, config, keysets, update_mandatory);
    let decision = decide(&inputs);
    log_info!(p.log, 0, MODULE, "{:?} -> {:?}", inputs, decision);

    match decision {
        BootDecision::RefuseMandatoryUpdate => {
            log_error!(p.log, 1, MODULE, "companion update incomplete");
            p.ui.acknowledge(Prompt::UpdateMandatory);
            system.reset()
        }
        BootDecision::Jump { signed } => {
            let clear_ram = config
                .boot
                .clear_ram_before_jump
                .then_some((config.layout.ram_start, config.layout.ram_end));
            system.jump_to_firmware(Handoff {
                vector_table: config.layout.app_start(),
                signed,
                clear_ram,
            })
        }
        BootDecision::PromptThenUpdate(prompt) => {
            log_warn!(p.log, 1, MODULE, "installed firmware rejected: {:?}", inputs.firmware);
            p.ui.acknowledge(prompt);
            update_loop(system, p, source, config, keysets)
        }
        BootDecision::UpdateLoop => update_loop(system, p, source, config, keysets),
    }
}

fn update_loop<Sys, F, C, U, S, P>(
    system: &mut Sys,
    p: &mut Peripherals<F, C, U, S>,
    source: &mut P,
    config: &SystemConfig,
    keysets: &[KeySet],
) -> !
where
    Sys: SystemControl,
    F: FlashController,
    C: CompanionDebugPort,
    U: UserInterface,
    S: ResponseSink,
    P: PacketSource,
{
    let mut session = UpdateSession::new(config, keysets);
    loop {
        if source.service(&mut session, p) == Flow::Reset {
            log_info!(p.log, 2, MODULE, "reset requested");
            system.reset();
        }
    }
}
