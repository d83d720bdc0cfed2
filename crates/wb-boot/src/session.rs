// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Streaming Firmware Update Session
//!
//! A finite-state machine driven by 64-byte host packets. It rebuilds an
//! image in RAM one 64 KiB chunk at a time and commits a chunk to flash only
//! after its SHA-256 matches the digest declared in the header. The header
//! signatures are checked once, after every chunk has landed.
//!
//! # States
//!
//! ```text
//! Ready ──Initialize──▶ Opened ──Erase*──▶ FlashStart ──Upload──▶ Flashing
//!                                                                   │
//!                          Ended ◀── (install | fail) ◀── Checking ◀┘
//! ```
//!
//! # Failure Handling
//!
//! Every error ends the session. Verification and hardware errors first
//! erase the update target (and secret storage for the main MCU), then a
//! prompt is shown and the caller is told to reset once the user
//! acknowledges it. Nothing resumes a failed session.
//!
//! # Security
//!
//! - Chunks are committed only after their content hash matches
//! - Unsigned images are shown by fingerprint and then erased, never booted
//! - Secret storage survives only when both the old and the new firmware
//!   verify, and must read back erased after a wipe
//! - Staging buffers are zeroed after every commit and on drop

use crate::companion::{flash_companion, permille};
use crate::header::{ImageHeader, UpdateTarget};
use crate::keys::KeySet;
use crate::programmer::FlashProgrammer;
use crate::protocol::{
    data_payload, parse_message_id, ButtonRequestKind, Features, MessageId, Packet, Response,
    ResponseSink, TransportKind, UploadBegin, BOOTLOADER_VERSION, VENDOR,
};
use crate::ui::{Prompt, UserInterface};
use crate::verify::{
    check_unused_slots, digests_equal, filled_digest, fingerprint, presence_check,
    verify_content_hashes, verify_installed, verify_legacy_signatures, verify_signatures,
    FirmwareFormat,
};
use wb_common::config::{FlashRegion, MemoryLayout, SystemConfig, UpdateConfig};
use wb_common::constants::{FIRMWARE_HEADER_LEN, FW_CHUNK_SIZE, HASH_SLOTS};
use wb_common::{log_debug, log_error, log_info, log_trace, log_warn};
use wb_common::{Error, LogBuffer};
use wb_hal::{CompanionDebugPort, FlashController};
use zeroize::{Zeroize, ZeroizeOnDrop};

const MODULE: &str = "session";

/// Update session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the host to open a session
    Ready,
    /// Session open, waiting for an erase request
    Opened,
    /// Target erased, waiting for upload begin
    FlashStart,
    /// Receiving image data
    Flashing,
    /// Image complete, signatures invalid, waiting for the host to acknowledge
    Checking,
    /// Terminal; only a reset leaves this state
    Ended,
}

/// What the caller should do after a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep feeding packets
    Continue,
    /// Reset the processor
    Reset,
}

/// Hardware and UI collaborators a session drives
pub struct Peripherals<F, C, U, S>
where
    F: FlashController,
    C: CompanionDebugPort,
    U: UserInterface,
    S: ResponseSink,
{
    /// Main flash
    pub programmer: FlashProgrammer<F>,
    /// Companion radio debug port
    pub companion: C,
    /// Display and buttons
    pub ui: U,
    /// Response channel to the host
    pub sink: S,
    /// Diagnostic log
    pub log: LogBuffer,
}

impl<F, C, U, S> Peripherals<F, C, U, S>
where
    F: FlashController,
    C: CompanionDebugPort,
    U: UserInterface,
    S: ResponseSink,
{
    /// Bundle the collaborators with an empty log
    pub fn new(programmer: FlashProgrammer<F>, companion: C, ui: U, sink: S) -> Self {
        Self {
            programmer,
            companion,
            ui,
            sink,
            log: LogBuffer::new(),
        }
    }

    /// Show a confirmation prompt and block for the user's decision
    ///
    /// On the relay link the host is told to wait first.
    fn confirm(&mut self, prompt: Prompt, kind: ButtonRequestKind) -> bool {
        self.ui.show(prompt);
        if self.sink.transport() == TransportKind::Relay {
            self.sink.send(Response::ButtonRequest(kind));
        }
        self.ui.await_decision()
    }
}

/// RAM staging for the header and the chunk being received
#[derive(Zeroize, ZeroizeOnDrop)]
struct Staging {
    header: [u8; FIRMWARE_HEADER_LEN],
    chunk: [u8; FW_CHUNK_SIZE],
}

impl Staging {
    const fn new() -> Self {
        Self {
            header: [0; FIRMWARE_HEADER_LEN],
            chunk: [0; FW_CHUNK_SIZE],
        }
    }
}

/// One firmware update session
///
/// All state is volatile; a reset discards it.
pub struct UpdateSession<'k> {
    state: SessionState,
    layout: MemoryLayout,
    update: UpdateConfig,
    keysets: &'k [KeySet],
    target: Option<UpdateTarget>,
    /// Image bytes received so far, header included
    pos: u32,
    /// Expected image length, header included
    len: u32,
    chunk_idx: u32,
    staging: Staging,
    /// Installed firmware verified when the target was erased
    old_was_signed: bool,
    tick: u32,
    anim: u8,
}

impl<'k> UpdateSession<'k> {
    /// Create a session in the `Ready` state
    #[must_use]
    pub fn new(config: &SystemConfig, keysets: &'k [KeySet]) -> Self {
        Self {
            state: SessionState::Ready,
            layout: config.layout,
            update: config.update,
            keysets,
            target: None,
            pos: 0,
            len: 0,
            chunk_idx: 0,
            staging: Staging::new(),
            old_was_signed: false,
            tick: 0,
            anim: 0,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Target erased for this session
    #[must_use]
    pub const fn target(&self) -> Option<UpdateTarget> {
        self.target
    }

    /// Image bytes received so far
    #[must_use]
    pub const fn received(&self) -> u32 {
        self.pos
    }

    /// Expected image length
    #[must_use]
    pub const fn expected_len(&self) -> u32 {
        self.len
    }

    /// Index of the chunk being received
    #[must_use]
    pub const fn chunk_index(&self) -> u32 {
        self.chunk_idx
    }

    /// Whether the firmware installed before the erase verified
    #[must_use]
    pub const fn old_was_signed(&self) -> bool {
        self.old_was_signed
    }

    /// Handle one inbound packet
    ///
    /// Runs to completion, including any blocking confirmation, flash
    /// operation or companion transfer the packet triggers.
    pub fn handle_packet<F, C, U, S>(
        &mut self,
        packet: &Packet,
        p: &mut Peripherals<F, C, U, S>,
    ) -> Flow
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        self.tick = self.tick.wrapping_add(1);

        let result = match self.state {
            SessionState::Ended => {
                log_trace!(p.log, self.tick, MODULE, "ignored after end");
                Ok(Flow::Continue)
            }
            SessionState::Ready | SessionState::Opened => self.handle_idle(packet, p),
            SessionState::FlashStart => self.handle_flash_start(packet, p),
            SessionState::Flashing => self.handle_data(packet, p),
            SessionState::Checking => self.handle_check(packet, p),
        };

        match result {
            Ok(flow) => flow,
            Err(e) => self.fail(e, p),
        }
    }

    // ========================================================================
    // Ready / Opened
    // ========================================================================

    fn handle_idle<F, C, U, S>(
        &mut self,
        packet: &Packet,
        p: &mut Peripherals<F, C, U, S>,
    ) -> Result<Flow, Error>
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        let Some(id) = parse_message_id(packet) else {
            log_trace!(p.log, self.tick, MODULE, "discarded unframed packet");
            return Ok(Flow::Continue);
        };

        match MessageId::from_u16(id) {
            Some(MessageId::Initialize) => {
                let features = self.features(p);
                p.sink.send(Response::Features(features));
                if self.state == SessionState::Ready {
                    log_info!(p.log, self.tick, MODULE, "Ready -> Opened");
                }
                self.state = SessionState::Opened;
            }
            Some(MessageId::GetFeatures) => {
                let features = self.features(p);
                p.sink.send(Response::Features(features));
            }
            Some(MessageId::Ping) => p.sink.send(Response::Success),
            Some(MessageId::ButtonAck) if p.sink.transport() == TransportKind::Relay => {
                let response = match p.ui.poll_decision() {
                    Some(true) => Response::Success,
                    _ => Response::ButtonRequest(ButtonRequestKind::Other),
                };
                p.sink.send(response);
            }
            Some(MessageId::WipeDevice) => return self.wipe_device(p),
            Some(MessageId::EraseMain) if self.state == SessionState::Opened => {
                return self.erase(UpdateTarget::MainMcu, p);
            }
            Some(MessageId::EraseRadio) if self.state == SessionState::Opened => {
                return self.erase(UpdateTarget::CompanionRadio, p);
            }
            _ => log_debug!(p.log, self.tick, MODULE, "ignored message {:#06x}", id),
        }
        Ok(Flow::Continue)
    }

    fn features<F, C, U, S>(&self, p: &Peripherals<F, C, U, S>) -> Features
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        Features {
            vendor: VENDOR,
            version: BOOTLOADER_VERSION,
            bootloader_mode: true,
            firmware_present: presence_check(&p.programmer, &self.layout, FirmwareFormat::New),
        }
    }

    fn wipe_device<F, C, U, S>(&mut self, p: &mut Peripherals<F, C, U, S>) -> Result<Flow, Error>
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        if !p.confirm(Prompt::WipeDevice, ButtonRequestKind::WipeDevice) {
            log_warn!(p.log, self.tick, MODULE, "wipe declined");
            self.state = SessionState::Ended;
            p.sink.send(Response::Failure(Error::UserCancelled.into()));
            p.ui.acknowledge(Prompt::WipeFailed);
            return Ok(Flow::Reset);
        }

        log_warn!(p.log, self.tick, MODULE, "wiping storage and firmware");
        p.programmer.erase_region(&self.layout.storage)?;
        p.programmer.erase_region(&self.layout.firmware)?;

        self.state = SessionState::Ended;
        p.sink.send(Response::Success);
        p.ui.acknowledge(Prompt::WipeSuccess);
        Ok(Flow::Reset)
    }

    fn erase<F, C, U, S>(
        &mut self,
        target: UpdateTarget,
        p: &mut Peripherals<F, C, U, S>,
    ) -> Result<Flow, Error>
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        let installed = presence_check(&p.programmer, &self.layout, FirmwareFormat::New);
        let proceed = match target {
            UpdateTarget::MainMcu if installed => {
                p.confirm(Prompt::ConfirmMainUpdate, ButtonRequestKind::FirmwareErase)
            }
            UpdateTarget::MainMcu => true,
            UpdateTarget::CompanionRadio => {
                p.confirm(Prompt::ConfirmRadioUpdate, ButtonRequestKind::FirmwareErase)
            }
        };
        if !proceed {
            return Err(Error::UserCancelled);
        }

        self.target = Some(target);
        match target {
            UpdateTarget::MainMcu => {
                self.old_was_signed = if installed {
                    verify_installed(&p.programmer, &self.layout, self.keysets).is_ok()
                } else if presence_check(&p.programmer, &self.layout, FirmwareFormat::Legacy) {
                    verify_legacy_signatures(&p.programmer, &self.layout, self.keysets).is_ok()
                } else {
                    false
                };
                log_info!(
                    p.log,
                    self.tick,
                    MODULE,
                    "erasing firmware (installed signed: {})",
                    self.old_was_signed
                );
                p.programmer.erase_region(&self.layout.firmware)?;
                p.programmer.erase_region(&self.layout.companion_staging)?;
            }
            UpdateTarget::CompanionRadio => {
                log_info!(p.log, self.tick, MODULE, "erasing companion staging");
                p.programmer.erase_region(&self.layout.companion_staging)?;
            }
        }

        p.sink.send(Response::Success);
        self.state = SessionState::FlashStart;
        log_info!(p.log, self.tick, MODULE, "Opened -> FlashStart");
        Ok(Flow::Continue)
    }

    // ========================================================================
    // FlashStart
    // ========================================================================

    fn handle_flash_start<F, C, U, S>(
        &mut self,
        packet: &Packet,
        p: &mut Peripherals<F, C, U, S>,
    ) -> Result<Flow, Error>
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        if parse_message_id(packet) != Some(MessageId::Upload as u16) {
            log_trace!(p.log, self.tick, MODULE, "waiting for upload");
            return Ok(Flow::Continue);
        }

        let begin = UploadBegin::parse(packet)?;
        if self.target != Some(begin.target) {
            return Err(Error::TargetMismatch);
        }
        let max = match begin.target {
            UpdateTarget::MainMcu => self.layout.app_max_len(),
            UpdateTarget::CompanionRadio => self.layout.companion_max_len(),
        };
        let header_len = FIRMWARE_HEADER_LEN as u32;
        if begin.flash_len <= header_len || begin.flash_len - header_len > max {
            return Err(Error::InvalidLength);
        }

        self.staging.zeroize();
        self.pos = 0;
        self.len = begin.flash_len;
        self.chunk_idx = 0;
        self.anim = 0;
        self.state = SessionState::Flashing;
        log_info!(
            p.log,
            self.tick,
            MODULE,
            "FlashStart -> Flashing ({:?}, {} bytes)",
            begin.target,
            begin.flash_len
        );

        self.absorb(UploadBegin::payload(packet), p)?;
        Ok(Flow::Continue)
    }

    // ========================================================================
    // Flashing
    // ========================================================================

    fn handle_data<F, C, U, S>(
        &mut self,
        packet: &Packet,
        p: &mut Peripherals<F, C, U, S>,
    ) -> Result<Flow, Error>
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        let data = data_payload(packet).ok_or(Error::InvalidFraming)?;

        if self.anim.checked_rem(self.update.progress_interval) == Some(4) {
            p.ui.progress(permille(self.pos, self.len));
        }
        self.anim = self.anim.wrapping_add(1);

        self.absorb(data, p)?;
        if self.pos < self.len {
            return Ok(Flow::Continue);
        }

        if self.pos as usize % FW_CHUNK_SIZE != 0 {
            self.commit_chunk(p)?;
        }

        let header = ImageHeader::from_bytes(&self.staging.header);
        check_unused_slots(&header, self.chunk_idx as usize)?;

        self.state = SessionState::Checking;
        log_info!(p.log, self.tick, MODULE, "Flashing -> Checking");

        match verify_signatures(&header, self.keysets) {
            Ok(fp) => {
                log_info!(p.log, self.tick, MODULE, "signatures valid, fingerprint {:02x?}", &fp[..4]);
                self.install(&header, p)
            }
            Err(e) => {
                log_warn!(p.log, self.tick, MODULE, "unsigned image: {:?}", e);
                p.sink
                    .send(Response::ButtonRequest(ButtonRequestKind::FirmwareCheck));
                Ok(Flow::Continue)
            }
        }
    }

    /// Append image bytes, committing each chunk as it completes
    fn absorb<F, C, U, S>(&mut self, data: &[u8], p: &mut Peripherals<F, C, U, S>) -> Result<(), Error>
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        let take = data.len().min((self.len - self.pos) as usize);
        for &byte in &data[..take] {
            let pos = self.pos as usize;
            if pos < FIRMWARE_HEADER_LEN {
                self.staging.header[pos] = byte;
            } else {
                self.staging.chunk[pos % FW_CHUNK_SIZE] = byte;
            }
            self.pos += 1;

            if self.pos as usize % FW_CHUNK_SIZE == 0 {
                self.commit_chunk(p)?;
            }
        }
        Ok(())
    }

    /// Hash the staged chunk and program it only if the header agrees
    fn commit_chunk<F, C, U, S>(&mut self, p: &mut Peripherals<F, C, U, S>) -> Result<(), Error>
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        let idx = self.chunk_idx as usize;
        if idx >= HASH_SLOTS {
            return Err(Error::InvalidLength);
        }
        let Some(target) = self.target else {
            return Err(Error::InvalidState);
        };

        let filled = (self.pos as usize - 1) % FW_CHUNK_SIZE + 1;
        let offset = if idx == 0 { FIRMWARE_HEADER_LEN } else { 0 };
        let data = &self.staging.chunk[offset..filled];

        let header = ImageHeader::from_bytes(&self.staging.header);
        let digest = filled_digest(data, FW_CHUNK_SIZE - offset);
        if !digests_equal(&digest, &header.hashes[idx]) {
            log_error!(p.log, self.tick, MODULE, "chunk {} hash mismatch", idx);
            return Err(Error::HashMismatch);
        }

        let base = self.chunk_base(target, idx as u32);
        p.programmer.program_bytes(base + offset as u32, data)?;
        log_debug!(p.log, self.tick, MODULE, "chunk {} committed ({} bytes)", idx, data.len());

        self.staging.chunk.zeroize();
        self.chunk_idx += 1;
        Ok(())
    }

    fn chunk_base(&self, target: UpdateTarget, index: u32) -> u32 {
        match target {
            UpdateTarget::MainMcu => self.layout.firmware_chunk_start(index),
            UpdateTarget::CompanionRadio => {
                self.layout.companion_staging.start + index * FW_CHUNK_SIZE as u32
            }
        }
    }

    // ========================================================================
    // Checking
    // ========================================================================

    fn handle_check<F, C, U, S>(
        &mut self,
        packet: &Packet,
        p: &mut Peripherals<F, C, U, S>,
    ) -> Result<Flow, Error>
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        if parse_message_id(packet) != Some(MessageId::ButtonAck as u16) {
            return Ok(Flow::Continue);
        }

        let header = ImageHeader::from_bytes(&self.staging.header);
        p.ui.show_fingerprint(&fingerprint(&header));
        p.ui.acknowledge(Prompt::FirmwareUnofficial);
        log_error!(p.log, self.tick, MODULE, "unsigned image acknowledged, discarding");
        Err(Error::SignatureInvalid)
    }

    /// Commit a fully verified image
    fn install<F, C, U, S>(
        &mut self,
        header: &ImageHeader,
        p: &mut Peripherals<F, C, U, S>,
    ) -> Result<Flow, Error>
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        match self.target {
            Some(UpdateTarget::MainMcu) => self.install_main(header, p),
            Some(UpdateTarget::CompanionRadio) => self.install_companion(p),
            None => Err(Error::InvalidState),
        }
    }

    fn install_main<F, C, U, S>(
        &mut self,
        header: &ImageHeader,
        p: &mut Peripherals<F, C, U, S>,
    ) -> Result<Flow, Error>
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        p.ui.progress(1000);

        if !self.old_was_signed {
            log_warn!(p.log, self.tick, MODULE, "previous firmware unsigned, wiping storage");
            wipe_verified(&mut p.programmer, &self.layout.storage)?;
        }

        p.programmer
            .program_bytes(self.layout.header_start(), &self.staging.header)?;
        verify_content_hashes(&p.programmer, &self.layout, header)?;
        self.staging.zeroize();

        self.state = SessionState::Ended;
        log_info!(p.log, self.tick, MODULE, "Checking -> Ended, firmware installed");
        p.sink.send(Response::Success);
        p.ui.acknowledge(Prompt::UpdateSuccess);
        Ok(Flow::Reset)
    }

    fn install_companion<F, C, U, S>(&mut self, p: &mut Peripherals<F, C, U, S>) -> Result<Flow, Error>
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        let staging = self.layout.companion_staging.start;
        p.programmer.program_bytes(staging, &self.staging.header)?;
        self.staging.zeroize();

        self.state = SessionState::Ended;
        p.sink.send(Response::Success);
        log_info!(p.log, self.tick, MODULE, "relaying companion image");

        let header_len = FIRMWARE_HEADER_LEN as u32;
        flash_companion(
            &p.programmer,
            &mut p.companion,
            staging + header_len,
            self.len - header_len,
            &self.update,
            |done| p.ui.progress(done),
        )?;

        p.companion.power_cycle();
        log_info!(p.log, self.tick, MODULE, "Checking -> Ended, companion updated");
        p.ui.acknowledge(Prompt::UpdateSuccess);
        Ok(Flow::Reset)
    }

    // ========================================================================
    // Failure
    // ========================================================================

    fn fail<F, C, U, S>(&mut self, error: Error, p: &mut Peripherals<F, C, U, S>) -> Flow
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        log_error!(p.log, self.tick, MODULE, "{:?} -> Ended: {}", self.state, error);

        if error.is_fatal() || self.has_committed() {
            self.erase_target(p);
        }
        self.staging.zeroize();
        self.state = SessionState::Ended;

        p.sink.send(Response::Failure(error.into()));
        p.ui.acknowledge(Prompt::for_error(error));
        Flow::Reset
    }

    /// Chunks of the current upload have already been written to flash
    fn has_committed(&self) -> bool {
        matches!(self.state, SessionState::Flashing | SessionState::Checking) && self.chunk_idx > 0
    }

    fn erase_target<F, C, U, S>(&mut self, p: &mut Peripherals<F, C, U, S>)
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        let regions = match self.target {
            Some(UpdateTarget::MainMcu) => [Some(self.layout.firmware), Some(self.layout.storage)],
            Some(UpdateTarget::CompanionRadio) => [Some(self.layout.companion_staging), None],
            None => [None, None],
        };
        for region in regions.iter().flatten() {
            if let Err(e) = p.programmer.erase_region(region) {
                log_error!(p.log, self.tick, MODULE, "erase of {:#010x} failed: {}", region.start, e);
            }
        }
    }
}

/// Erase `region` and confirm it reads back blank
fn wipe_verified<F: FlashController>(
    programmer: &mut FlashProgrammer<F>,
    region: &FlashRegion,
) -> Result<(), Error> {
    programmer.erase_region(region)?;
    if programmer.region_is_erased(region)? {
        Ok(())
    } else {
        Err(Error::EraseVerifyFailed)
    }
}
