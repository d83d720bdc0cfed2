// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Integration tests for wb-boot
//!
//! Verification, flash programming, the update session, the relay transport
//! and the boot decision, all driven against in-memory fakes of the flash
//! controller, companion debug port, display and host link. Images are
//! signed with deterministic test keys.

use std::collections::VecDeque;

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey};
use sha2::{Digest, Sha256};

use wb_boot::boot::{gather_inputs, inspect_firmware, run, PacketSource};
use wb_boot::header::{ImageHeader, UpdateTarget};
use wb_boot::keys::KeySet;
use wb_boot::programmer::FlashProgrammer;
use wb_boot::protocol::{
    ButtonRequestKind, FailureReason, MessageId, Packet, Response, ResponseSink, TransportKind,
};
use wb_boot::relay::{dispatch, feed, RelayFrame, RelayQueue, RelayReceiver};
use wb_boot::session::{Flow, Peripherals, SessionState, UpdateSession};
use wb_boot::ui::{Prompt, UserInterface};
use wb_boot::verify::{
    fingerprint, presence_check, verify_content_hashes, verify_legacy_signatures,
    verify_signatures, FirmwareFormat, VerifyError,
};
use wb_boot::{BootDecision, FirmwareVerdict};
use wb_common::config::{CompanionEraseMode, FlashTiming, MemoryLayout, SystemConfig};
use wb_common::constants::{FIRMWARE_MAGIC_COMPANION, FIRMWARE_MAGIC_LEGACY, FIRMWARE_MAGIC_NEW};
use wb_common::{Error, ErrorKind};
use wb_hal::{
    CompanionDebugPort, FlashController, FlashRead, FlashSector, FlashStatus, Handoff, HalError,
    HalResult, SystemControl, STM32F2_SECTORS,
};

// ============================================================================
// Constants
// ============================================================================

const FLASH_BASE: u32 = 0x0800_0000;
const FLASH_SIZE: usize = 1024 * 1024;
const HDR: usize = 1024;
const CHUNK: usize = 64 * 1024;

const TIMING: FlashTiming = FlashTiming {
    erase_poll_limit: 8,
    program_poll_limit: 8,
};

/// secp256k1 group order, big-endian
const CURVE_ORDER: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE,
    0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36, 0x41, 0x41,
];

fn layout() -> MemoryLayout {
    MemoryLayout::DEFAULT
}

fn config() -> SystemConfig {
    SystemConfig {
        timing: TIMING,
        ..SystemConfig::DEFAULT
    }
}

// ============================================================================
// Mock Flash
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Pending {
    Erase(u8),
    Program(u32, u32),
}

/// 1 MiB STM32F2-shaped flash in memory
struct MockFlash {
    mem: Vec<u8>,
    locked: bool,
    pending: Option<Pending>,
    /// A program at this address never completes
    hang_program_at: Option<u32>,
    programs: Vec<(u32, u32)>,
    erases: Vec<u8>,
}

impl MockFlash {
    fn new() -> Self {
        Self {
            mem: vec![0xFF; FLASH_SIZE],
            locked: true,
            pending: None,
            hang_program_at: None,
            programs: Vec::new(),
            erases: Vec::new(),
        }
    }

    fn offset(address: u32, len: usize) -> HalResult<usize> {
        let off = address
            .checked_sub(FLASH_BASE)
            .ok_or(HalError::FlashOutOfBounds)? as usize;
        if off + len > FLASH_SIZE {
            return Err(HalError::FlashOutOfBounds);
        }
        Ok(off)
    }

    /// Write bytes directly, bypassing the controller
    fn load(&mut self, address: u32, bytes: &[u8]) {
        let off = Self::offset(address, bytes.len()).unwrap();
        self.mem[off..off + bytes.len()].copy_from_slice(bytes);
    }

    fn bytes(&self, address: u32, len: usize) -> &[u8] {
        let off = Self::offset(address, len).unwrap();
        &self.mem[off..off + len]
    }

    fn programs_in(&self, start: u32, end: u32) -> usize {
        self.programs
            .iter()
            .filter(|(a, _)| *a >= start && *a < end)
            .count()
    }

    fn erase_count(&self, sector: u8) -> usize {
        self.erases.iter().filter(|&&s| s == sector).count()
    }
}

impl FlashRead for MockFlash {
    fn read(&self, address: u32, buffer: &mut [u8]) -> HalResult<()> {
        let off = Self::offset(address, buffer.len())?;
        buffer.copy_from_slice(&self.mem[off..off + buffer.len()]);
        Ok(())
    }
}

impl FlashController for MockFlash {
    fn sectors(&self) -> &[FlashSector] {
        &STM32F2_SECTORS
    }

    fn unlock(&mut self) -> HalResult<()> {
        self.locked = false;
        Ok(())
    }

    fn lock(&mut self) -> HalResult<()> {
        self.locked = true;
        Ok(())
    }

    fn begin_erase(&mut self, sector: u8) -> HalResult<()> {
        if self.locked {
            return Err(HalError::FlashLocked);
        }
        self.erases.push(sector);
        self.pending = Some(Pending::Erase(sector));
        Ok(())
    }

    fn begin_program(&mut self, address: u32, word: u32) -> HalResult<()> {
        if self.locked {
            return Err(HalError::FlashLocked);
        }
        Self::offset(address, 4)?;
        self.programs.push((address, word));
        self.pending = Some(Pending::Program(address, word));
        Ok(())
    }

    fn poll_status(&mut self) -> FlashStatus {
        match self.pending {
            None => FlashStatus::Ready,
            Some(Pending::Program(address, _)) if Some(address) == self.hang_program_at => {
                FlashStatus::Busy
            }
            Some(Pending::Erase(sector)) => {
                let s = STM32F2_SECTORS[usize::from(sector)];
                let off = (s.start - FLASH_BASE) as usize;
                self.mem[off..off + s.size as usize].fill(0xFF);
                self.pending = None;
                FlashStatus::Ready
            }
            Some(Pending::Program(address, word)) => {
                let off = (address - FLASH_BASE) as usize;
                for (dst, src) in self.mem[off..off + 4].iter_mut().zip(word.to_le_bytes()) {
                    *dst &= src;
                }
                self.pending = None;
                FlashStatus::Ready
            }
        }
    }

    fn end_operation(&mut self) {
        self.pending = None;
    }
}

// ============================================================================
// Mock Companion, UI, Sink, System
// ============================================================================

#[derive(Default)]
struct MockCompanion {
    inits: u32,
    pages: Vec<Vec<u8>>,
    modes: Vec<CompanionEraseMode>,
    fail_page: Option<usize>,
    checks: Vec<(u32, u32)>,
    power_cycles: u32,
}

impl CompanionDebugPort for MockCompanion {
    fn init(&mut self) -> HalResult<()> {
        self.inits += 1;
        Ok(())
    }

    fn download_page(&mut self, page: &[u8], erase: CompanionEraseMode) -> HalResult<()> {
        self.pages.push(page.to_vec());
        self.modes.push(erase);
        if Some(self.pages.len() - 1) == self.fail_page {
            return Err(HalError::CompanionDownloadFailed);
        }
        Ok(())
    }

    fn check_code(&mut self, address: u32, len: u32, _erase: CompanionEraseMode) -> HalResult<()> {
        self.checks.push((address, len));
        Ok(())
    }

    fn power_cycle(&mut self) {
        self.power_cycles += 1;
    }
}

/// Display fake; decisions default to "confirm" once the queue is empty
#[derive(Default)]
struct MockUi {
    decisions: VecDeque<bool>,
    prompts: Vec<Prompt>,
    progress: Vec<u16>,
    fingerprints: Vec<[u8; 32]>,
}

impl UserInterface for MockUi {
    fn show(&mut self, prompt: Prompt) {
        self.prompts.push(prompt);
    }

    fn progress(&mut self, permille: u16) {
        self.progress.push(permille);
    }

    fn show_fingerprint(&mut self, fingerprint: &[u8; 32]) {
        self.fingerprints.push(*fingerprint);
    }

    fn poll_decision(&mut self) -> Option<bool> {
        Some(self.decisions.pop_front().unwrap_or(true))
    }
}

struct RecordingSink {
    transport: TransportKind,
    responses: Vec<Response>,
}

impl RecordingSink {
    fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            responses: Vec::new(),
        }
    }

    fn last(&self) -> Option<Response> {
        self.responses.last().copied()
    }
}

impl ResponseSink for RecordingSink {
    fn send(&mut self, response: Response) {
        self.responses.push(response);
    }

    fn transport(&self) -> TransportKind {
        self.transport
    }
}

#[derive(Default)]
struct MockSystem {
    flag: u32,
    override_held: bool,
    flag_cleared: bool,
    jumped: Option<Handoff>,
    resets: u32,
}

impl SystemControl for MockSystem {
    fn read_session_flag(&self, _address: u32) -> u32 {
        self.flag
    }

    fn clear_session_flag(&mut self, _address: u32) {
        self.flag = 0;
        self.flag_cleared = true;
    }

    fn override_held(&self) -> bool {
        self.override_held
    }

    fn reset(&mut self) -> ! {
        self.resets += 1;
        panic!("reset");
    }

    fn jump_to_firmware(&mut self, handoff: Handoff) -> ! {
        self.jumped = Some(handoff);
        panic!("jump");
    }
}

/// Packet source replaying a script, then asking for a reset
struct ScriptedSource {
    packets: VecDeque<Packet>,
}

impl PacketSource for ScriptedSource {
    fn service<F, C, U, S>(
        &mut self,
        session: &mut UpdateSession<'_>,
        p: &mut Peripherals<F, C, U, S>,
    ) -> Flow
    where
        F: FlashController,
        C: CompanionDebugPort,
        U: UserInterface,
        S: ResponseSink,
    {
        match self.packets.pop_front() {
            Some(packet) => session.handle_packet(&packet, p),
            None => Flow::Reset,
        }
    }
}

type Rig = Peripherals<MockFlash, MockCompanion, MockUi, RecordingSink>;

fn rig() -> Rig {
    rig_on(TransportKind::Usb)
}

fn rig_on(transport: TransportKind) -> Rig {
    Peripherals::new(
        FlashProgrammer::new(MockFlash::new(), TIMING),
        MockCompanion::default(),
        MockUi::default(),
        RecordingSink::new(transport),
    )
}

// ============================================================================
// Keys and Images
// ============================================================================

fn signing_key(scalar: u8) -> SigningKey {
    let mut bytes = [0u8; 32];
    bytes[31] = scalar;
    SigningKey::from_slice(&bytes).unwrap()
}

fn public_key(key: &SigningKey) -> [u8; 65] {
    let point = key.verifying_key().to_encoded_point(false);
    let mut out = [0u8; 65];
    out.copy_from_slice(point.as_bytes());
    out
}

/// Two key sets: scalars 1..=5 and 11..=15
struct TestKeys {
    sets: [KeySet; 2],
    a: Vec<SigningKey>,
    b: Vec<SigningKey>,
}

fn test_keys() -> TestKeys {
    let a: Vec<SigningKey> = (1..=5).map(signing_key).collect();
    let b: Vec<SigningKey> = (11..=15).map(signing_key).collect();
    let set = |name: &'static str, keys: &[SigningKey]| {
        let mut pubs = [[0u8; 65]; 5];
        for (dst, key) in pubs.iter_mut().zip(keys) {
            *dst = public_key(key);
        }
        KeySet::new(name, pubs)
    };
    TestKeys {
        sets: [set("test-a", &a), set("test-b", &b)],
        a,
        b,
    }
}

fn sign(key: &SigningKey, digest: &[u8; 32]) -> [u8; 64] {
    let sig: Signature = key.sign_prehash(digest).unwrap();
    let mut out = [0u8; 64];
    out.copy_from_slice(&sig.to_bytes());
    out
}

/// Replace s with n - s
fn to_high_s(mut sig: [u8; 64]) -> [u8; 64] {
    let mut borrow = 0i16;
    for i in (0..32).rev() {
        let v = i16::from(CURVE_ORDER[i]) - i16::from(sig[32 + i]) - borrow;
        borrow = i16::from(v < 0);
        sig[32 + i] = (v + (borrow << 8)) as u8;
    }
    sig
}

fn code(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) + 7) as u8).collect()
}

/// Unsigned header with correct content hashes for `code`
fn raw_header(magic: u32, code: &[u8]) -> [u8; HDR] {
    let mut raw = [0u8; HDR];
    raw[0..4].copy_from_slice(&magic.to_le_bytes());
    raw[4..8].copy_from_slice(&(HDR as u32).to_le_bytes());
    raw[12..16].copy_from_slice(&(code.len() as u32).to_le_bytes());
    raw[16..20].copy_from_slice(&2u32.to_le_bytes());

    let mut image = vec![0u8; HDR];
    image.extend_from_slice(code);
    let used = image.len().div_ceil(CHUNK);
    for i in 0..used {
        let start = if i == 0 { HDR } else { i * CHUNK };
        let end = image.len().min((i + 1) * CHUNK);
        let mut padded = vec![0xFFu8; (i + 1) * CHUNK - start];
        padded[..end - start].copy_from_slice(&image[start..end]);
        let digest = Sha256::digest(&padded);
        raw[32 + i * 32..64 + i * 32].copy_from_slice(&digest);
    }
    raw
}

/// Sign a header with the given (index, key) slots
fn signed_header(raw: &[u8; HDR], slots: [(u8, &SigningKey); 3]) -> ImageHeader {
    let mut header = ImageHeader::from_bytes(raw);
    let fp = fingerprint(&header);
    for (slot, (index, key)) in header.slots.iter_mut().zip(slots) {
        slot.index = index;
        slot.signature = sign(key, &fp);
    }
    header
}

fn image(header: &ImageHeader, code: &[u8]) -> Vec<u8> {
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(code);
    out
}

fn signed_image(keys: &TestKeys, magic: u32, code: &[u8]) -> Vec<u8> {
    let raw = raw_header(magic, code);
    let header = signed_header(&raw, [(1, &keys.a[0]), (2, &keys.a[1]), (3, &keys.a[2])]);
    image(&header, code)
}

fn unsigned_image(magic: u32, code: &[u8]) -> Vec<u8> {
    let stranger = signing_key(42);
    let raw = raw_header(magic, code);
    let header = signed_header(&raw, [(1, &stranger), (2, &stranger), (3, &stranger)]);
    image(&header, code)
}

fn install(p: &mut Rig, image: &[u8]) {
    p.programmer
        .flash_mut()
        .load(layout().header_start(), image);
}

// ============================================================================
// Packets
// ============================================================================

fn message(id: MessageId) -> Packet {
    let mut p = [0u8; 64];
    p[..3].copy_from_slice(b"?##");
    p[3..5].copy_from_slice(&(id as u16).to_be_bytes());
    p
}

fn upload_packets(image: &[u8]) -> Vec<Packet> {
    let mut begin = message(MessageId::Upload);
    begin[5..9].copy_from_slice(&(image.len() as u32 + 4).to_be_bytes());
    begin[9] = 0x0A;
    begin[13..64].copy_from_slice(&image[..51]);

    let mut packets = vec![begin];
    for chunk in image[51..].chunks(63) {
        let mut p = [0u8; 64];
        p[0] = b'?';
        p[1..1 + chunk.len()].copy_from_slice(chunk);
        packets.push(p);
    }
    packets
}

/// Feed packets until one asks for a reset
fn feed_all(session: &mut UpdateSession<'_>, p: &mut Rig, packets: &[Packet]) -> Flow {
    for packet in packets {
        if session.handle_packet(packet, p) == Flow::Reset {
            return Flow::Reset;
        }
    }
    Flow::Continue
}

fn open_and_erase(session: &mut UpdateSession<'_>, p: &mut Rig, erase: MessageId) -> Flow {
    feed_all(session, p, &[message(MessageId::Initialize), message(erase)])
}

// ============================================================================
// Verification
// ============================================================================

mod verify_tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_signature_material() {
        let keys = test_keys();
        let raw = raw_header(FIRMWARE_MAGIC_NEW, &code(4096));
        let unsigned = ImageHeader::from_bytes(&raw);
        let signed = signed_header(&raw, [(5, &keys.a[4]), (4, &keys.a[3]), (1, &keys.a[0])]);
        assert_ne!(unsigned.to_bytes(), signed.to_bytes());
        assert_eq!(fingerprint(&unsigned), fingerprint(&signed));
    }

    #[test]
    fn test_signatures_from_one_set() {
        let keys = test_keys();
        let raw = raw_header(FIRMWARE_MAGIC_NEW, &code(4096));
        let header = signed_header(&raw, [(1, &keys.a[0]), (3, &keys.a[2]), (5, &keys.a[4])]);
        assert_eq!(verify_signatures(&header, &keys.sets), Ok(fingerprint(&header)));
    }

    #[test]
    fn test_slots_may_use_different_sets() {
        let keys = test_keys();
        let raw = raw_header(FIRMWARE_MAGIC_NEW, &code(4096));
        let header = signed_header(&raw, [(1, &keys.a[0]), (2, &keys.b[1]), (4, &keys.b[3])]);
        assert!(verify_signatures(&header, &keys.sets).is_ok());
    }

    #[test]
    fn test_duplicate_index_rejected_even_when_signatures_verify() {
        let keys = test_keys();
        let raw = raw_header(FIRMWARE_MAGIC_NEW, &code(4096));
        let header = signed_header(&raw, [(2, &keys.a[1]), (2, &keys.a[1]), (3, &keys.a[2])]);
        let err = verify_signatures(&header, &keys.sets).unwrap_err();
        assert_eq!(err, VerifyError::DuplicateKeyIndex);
        assert_eq!(Error::from(err).kind(), ErrorKind::SignatureInvalid);
    }

    #[test]
    fn test_duplicate_index_rejected_for_any_signature_bytes() {
        let keys = test_keys();
        let mut header = ImageHeader::from_bytes(&raw_header(FIRMWARE_MAGIC_NEW, &code(4096)));
        for (i, fill) in [0x00u8, 0x5A, 0xFF].into_iter().enumerate() {
            header.slots[0].index = 2;
            header.slots[1].index = 2;
            header.slots[2].index = 1 + i as u8 * 2;
            for slot in &mut header.slots {
                slot.signature = [fill; 64];
            }
            assert_eq!(
                verify_signatures(&header, &keys.sets),
                Err(VerifyError::DuplicateKeyIndex)
            );
        }
    }

    #[test]
    fn test_wrong_key_index_rejected() {
        let keys = test_keys();
        let raw = raw_header(FIRMWARE_MAGIC_NEW, &code(4096));
        // Signed by key 2 but claims key 4
        let header = signed_header(&raw, [(1, &keys.a[0]), (4, &keys.a[1]), (3, &keys.a[2])]);
        assert_eq!(
            verify_signatures(&header, &keys.sets),
            Err(VerifyError::SignatureInvalid)
        );
    }

    #[test]
    fn test_index_out_of_range_rejected() {
        let keys = test_keys();
        let raw = raw_header(FIRMWARE_MAGIC_NEW, &code(4096));
        let header = signed_header(&raw, [(0, &keys.a[0]), (2, &keys.a[1]), (3, &keys.a[2])]);
        assert_eq!(
            verify_signatures(&header, &keys.sets),
            Err(VerifyError::InvalidKeyIndex)
        );
        let header = signed_header(&raw, [(6, &keys.a[0]), (2, &keys.a[1]), (3, &keys.a[2])]);
        assert_eq!(
            verify_signatures(&header, &keys.sets),
            Err(VerifyError::InvalidKeyIndex)
        );
    }

    #[test]
    fn test_unknown_signer_rejected() {
        let keys = test_keys();
        let header = ImageHeader::from_bytes(
            unsigned_image(FIRMWARE_MAGIC_NEW, &code(4096))[..HDR]
                .try_into()
                .unwrap(),
        );
        assert_eq!(
            verify_signatures(&header, &keys.sets),
            Err(VerifyError::SignatureInvalid)
        );
    }

    #[test]
    fn test_high_s_signature_accepted() {
        let keys = test_keys();
        let raw = raw_header(FIRMWARE_MAGIC_NEW, &code(4096));
        let mut header = signed_header(&raw, [(1, &keys.a[0]), (2, &keys.a[1]), (3, &keys.a[2])]);
        header.slots[1].signature = to_high_s(header.slots[1].signature);
        assert!(verify_signatures(&header, &keys.sets).is_ok());
    }

    #[test]
    fn test_changed_header_field_breaks_signatures() {
        let keys = test_keys();
        let raw = raw_header(FIRMWARE_MAGIC_NEW, &code(4096));
        let mut header = signed_header(&raw, [(1, &keys.a[0]), (2, &keys.a[1]), (3, &keys.a[2])]);
        header.version += 1;
        assert_eq!(
            verify_signatures(&header, &keys.sets),
            Err(VerifyError::SignatureInvalid)
        );
    }

    #[test]
    fn test_min_code_len_passes_presence_and_hashes() {
        let keys = test_keys();
        let mut p = rig();
        let img = signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096));
        install(&mut p, &img);

        let flash = p.programmer.flash();
        assert!(presence_check(flash, &layout(), FirmwareFormat::New));
        let header = ImageHeader::from_bytes(img[..HDR].try_into().unwrap());
        assert_eq!(verify_content_hashes(flash, &layout(), &header), Ok(()));
    }

    #[test]
    fn test_presence_bounds() {
        let keys = test_keys();
        let mut p = rig();
        install(&mut p, &signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4092)));
        assert!(!presence_check(p.programmer.flash(), &layout(), FirmwareFormat::New));

        let mut p = rig();
        install(&mut p, &signed_image(&keys, FIRMWARE_MAGIC_COMPANION, &code(4096)));
        assert!(!presence_check(p.programmer.flash(), &layout(), FirmwareFormat::New));

        let p = rig();
        assert!(!presence_check(p.programmer.flash(), &layout(), FirmwareFormat::New));
    }

    #[test]
    fn test_stale_hash_slot_rejected() {
        let mut p = rig();
        let body = code(4096);
        let mut raw = raw_header(FIRMWARE_MAGIC_NEW, &body);
        raw[32 + 5 * 32] = 1;
        let header = ImageHeader::from_bytes(&raw);
        install(&mut p, &image(&header, &body));
        assert_eq!(
            verify_content_hashes(p.programmer.flash(), &layout(), &header),
            Err(VerifyError::StaleHashSlot)
        );
    }

    #[test]
    fn test_flash_past_code_must_read_erased() {
        let mut p = rig();
        let body = code(4096);
        let header = ImageHeader::from_bytes(&raw_header(FIRMWARE_MAGIC_NEW, &body));
        install(&mut p, &image(&header, &body));
        let after = layout().app_start() + 4096 + 10;
        p.programmer.flash_mut().load(after, &[0x00]);
        assert_eq!(
            verify_content_hashes(p.programmer.flash(), &layout(), &header),
            Err(VerifyError::FillerMismatch)
        );
    }

    #[test]
    fn test_corrupted_code_is_hash_mismatch() {
        let mut p = rig();
        let body = code(CHUNK + 4096);
        let header = ImageHeader::from_bytes(&raw_header(FIRMWARE_MAGIC_NEW, &body));
        install(&mut p, &image(&header, &body));
        assert_eq!(verify_content_hashes(p.programmer.flash(), &layout(), &header), Ok(()));

        // Second chunk
        let at = layout().firmware_chunk_start(1) + 100;
        let byte = p.programmer.flash().bytes(at, 1)[0];
        p.programmer.flash_mut().load(at, &[byte ^ 0x01]);
        assert_eq!(
            verify_content_hashes(p.programmer.flash(), &layout(), &header),
            Err(VerifyError::HashMismatch)
        );
    }

    #[test]
    fn test_legacy_signatures() {
        let keys = test_keys();
        let mut p = rig();
        let body = code(8192);
        let digest: [u8; 32] = Sha256::digest(&body).into();

        let mut meta = vec![0u8; 0x100];
        meta[0..4].copy_from_slice(&FIRMWARE_MAGIC_LEGACY.to_le_bytes());
        meta[4..8].copy_from_slice(&(body.len() as u32).to_le_bytes());
        meta[8..11].copy_from_slice(&[2, 4, 5]);
        meta[0x40..0x80].copy_from_slice(&sign(&keys.b[1], &digest));
        meta[0x80..0xC0].copy_from_slice(&sign(&keys.b[3], &digest));
        meta[0xC0..0x100].copy_from_slice(&sign(&keys.a[4], &digest));

        let flash = p.programmer.flash_mut();
        flash.load(layout().storage.start, &meta);
        flash.load(layout().legacy_app_start(), &body);

        let flash = p.programmer.flash();
        assert!(presence_check(flash, &layout(), FirmwareFormat::Legacy));
        assert!(!presence_check(flash, &layout(), FirmwareFormat::New));
        assert_eq!(verify_legacy_signatures(flash, &layout(), &keys.sets), Ok(()));

        p.programmer.flash_mut().load(layout().legacy_app_start() + 5, &[0x00]);
        assert_eq!(
            verify_legacy_signatures(p.programmer.flash(), &layout(), &keys.sets),
            Err(VerifyError::SignatureInvalid)
        );
    }
}

// ============================================================================
// Flash Programmer
// ============================================================================

mod programmer_tests {
    use super::*;

    fn programmer() -> FlashProgrammer<MockFlash> {
        FlashProgrammer::new(MockFlash::new(), TIMING)
    }

    #[test]
    fn test_erase_region_covers_every_sector() {
        let mut prog = programmer();
        prog.flash_mut().load(0x0808_0000, &[0u8; 16]);
        assert_eq!(prog.erase_region(&layout().firmware), Ok(()));
        assert_eq!(prog.flash().erases, vec![4, 5, 6, 7, 8]);
        assert!(prog.flash().locked);
        assert_eq!(prog.region_is_erased(&layout().firmware), Ok(true));
    }

    #[test]
    fn test_erase_region_must_be_sector_aligned() {
        let mut prog = programmer();
        let partial = wb_common::FlashRegion::new(0x0801_0000, 0x1000);
        assert_eq!(prog.erase_region(&partial), Err(HalError::InvalidParameter));

        let outside = wb_common::FlashRegion::new(0x2000_0000, 0x1000);
        assert_eq!(prog.erase_region(&outside), Err(HalError::FlashOutOfBounds));
        assert!(prog.flash().erases.is_empty());
    }

    #[test]
    fn test_program_bytes_little_endian() {
        let mut prog = programmer();
        assert_eq!(prog.program_bytes(0x0801_0400, &[1, 2, 3, 4, 5, 6, 7, 8]), Ok(()));
        assert_eq!(
            prog.flash().programs,
            vec![(0x0801_0400, 0x0403_0201), (0x0801_0404, 0x0807_0605)]
        );
        assert_eq!(prog.flash().bytes(0x0801_0400, 8), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(prog.flash().locked);
    }

    #[test]
    fn test_program_bytes_requires_whole_words() {
        let mut prog = programmer();
        assert_eq!(
            prog.program_bytes(0x0801_0400, &[1, 2, 3]),
            Err(HalError::InvalidParameter)
        );
        assert!(prog.flash().programs.is_empty());
    }

    #[test]
    fn test_program_words() {
        let mut prog = programmer();
        assert_eq!(prog.program_words(0x0802_0000, &[0xDEAD_BEEF, 0x0102_0304]), Ok(()));
        assert_eq!(prog.read_u32(0x0802_0004), Ok(0x0102_0304));
    }

    #[test]
    fn test_program_timeout_locks_and_stops() {
        let mut prog = programmer();
        prog.flash_mut().hang_program_at = Some(0x0801_0404);
        assert_eq!(
            prog.program_words(0x0801_0400, &[1, 2, 3]),
            Err(HalError::FlashTimeout)
        );
        assert_eq!(prog.flash().programs.len(), 2);
        assert!(prog.flash().locked);
    }

    #[test]
    fn test_readback_mismatch_detected() {
        let mut prog = programmer();
        prog.flash_mut().load(0x0801_0400, &[0x00; 4]);
        assert_eq!(
            prog.program_words(0x0801_0400, &[0xFFFF_FFFF]),
            Err(HalError::FlashVerifyFailed)
        );
    }

    #[test]
    fn test_region_is_erased() {
        let mut prog = programmer();
        assert_eq!(prog.region_is_erased(&layout().storage), Ok(true));
        prog.flash_mut().load(layout().storage.end() - 1, &[0x7F]);
        assert_eq!(prog.region_is_erased(&layout().storage), Ok(false));
    }
}

// ============================================================================
// Companion Flashing
// ============================================================================

mod companion_tests {
    use super::*;
    use wb_boot::companion::flash_companion;
    use wb_common::config::UpdateConfig;

    #[test]
    fn test_pages_streamed_with_zero_padded_tail() {
        let mut flash = MockFlash::new();
        let body = code(2 * 4096 + 100);
        let addr = layout().companion_staging.start + 1024;
        flash.load(addr, &body);

        let mut port = MockCompanion::default();
        let mut progress = Vec::new();
        let result = flash_companion(
            &flash,
            &mut port,
            addr,
            body.len() as u32,
            &UpdateConfig::DEFAULT,
            |pm| progress.push(pm),
        );
        assert_eq!(result, Ok(()));

        assert_eq!(port.inits, 1);
        assert_eq!(port.pages.len(), 3);
        assert!(port.pages.iter().all(|pg| pg.len() == 4096));
        assert_eq!(&port.pages[0][..], &body[..4096]);
        assert_eq!(&port.pages[2][..100], &body[8192..]);
        assert!(port.pages[2][100..].iter().all(|&b| b == 0));
        assert!(port.modes.iter().all(|&m| m == CompanionEraseMode::All));
        assert_eq!(port.checks, vec![(addr, body.len() as u32)]);
        assert_eq!(progress.last(), Some(&1000));
    }

    #[test]
    fn test_failed_page_stops_transfer() {
        let mut flash = MockFlash::new();
        let addr = layout().companion_staging.start + 1024;
        flash.load(addr, &code(4 * 4096));

        let mut port = MockCompanion {
            fail_page: Some(1),
            ..MockCompanion::default()
        };
        let result = flash_companion(
            &flash,
            &mut port,
            addr,
            4 * 4096,
            &UpdateConfig::DEFAULT,
            |_| {},
        );
        assert_eq!(result, Err(Error::CompanionFlashFailed));
        assert_eq!(port.pages.len(), 2);
        assert!(port.checks.is_empty());
    }
}

// ============================================================================
// Update Session
// ============================================================================

mod session_tests {
    use super::*;

    #[test]
    fn test_initialize_opens_session() {
        let keys = test_keys();
        let mut p = rig();
        let mut session = UpdateSession::new(&config(), &keys.sets);
        assert_eq!(session.state(), SessionState::Ready);

        session.handle_packet(&message(MessageId::GetFeatures), &mut p);
        assert_eq!(session.state(), SessionState::Ready);

        session.handle_packet(&message(MessageId::Initialize), &mut p);
        assert_eq!(session.state(), SessionState::Opened);

        session.handle_packet(&message(MessageId::Ping), &mut p);
        match p.sink.responses[..] {
            [Response::Features(a), Response::Features(b), Response::Success] => {
                assert!(a.bootloader_mode && !a.firmware_present);
                assert_eq!(a, b);
            }
            ref other => panic!("unexpected responses {other:?}"),
        }
    }

    #[test]
    fn test_features_report_installed_firmware() {
        let keys = test_keys();
        let mut p = rig();
        install(&mut p, &signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096)));
        let mut session = UpdateSession::new(&config(), &keys.sets);
        session.handle_packet(&message(MessageId::Initialize), &mut p);
        assert!(matches!(
            p.sink.last(),
            Some(Response::Features(f)) if f.firmware_present
        ));
    }

    #[test]
    fn test_unframed_and_unknown_packets_ignored() {
        let keys = test_keys();
        let mut p = rig();
        let mut session = UpdateSession::new(&config(), &keys.sets);

        let mut garbage = message(MessageId::Ping);
        garbage[2] = b'!';
        session.handle_packet(&garbage, &mut p);
        let mut unknown = message(MessageId::Ping);
        unknown[4] = 0x42;
        session.handle_packet(&unknown, &mut p);

        assert!(p.sink.responses.is_empty());
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_erase_requires_open_session() {
        let keys = test_keys();
        let mut p = rig();
        let mut session = UpdateSession::new(&config(), &keys.sets);
        session.handle_packet(&message(MessageId::EraseMain), &mut p);
        assert_eq!(session.state(), SessionState::Ready);
        assert!(p.programmer.flash().erases.is_empty());
    }

    #[test]
    fn test_erase_without_firmware_needs_no_confirmation() {
        let keys = test_keys();
        let mut p = rig();
        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);

        assert_eq!(session.state(), SessionState::FlashStart);
        assert_eq!(session.target(), Some(UpdateTarget::MainMcu));
        assert!(!session.old_was_signed());
        assert!(p.ui.prompts.is_empty());
        assert_eq!(p.programmer.flash().erases, vec![4, 5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(p.sink.last(), Some(Response::Success));
    }

    #[test]
    fn test_declined_erase_cancels_session() {
        let keys = test_keys();
        let mut p = rig();
        install(&mut p, &signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096)));
        p.ui.decisions.push_back(false);

        let mut session = UpdateSession::new(&config(), &keys.sets);
        let flow = open_and_erase(&mut session, &mut p, MessageId::EraseMain);

        assert_eq!(flow, Flow::Reset);
        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(p.ui.prompts, vec![Prompt::ConfirmMainUpdate, Prompt::UpdateCancelled]);
        assert_eq!(
            p.sink.last(),
            Some(Response::Failure(FailureReason::ActionCancelled))
        );
        assert!(p.programmer.flash().erases.is_empty());
        assert!(presence_check(p.programmer.flash(), &layout(), FirmwareFormat::New));
    }

    #[test]
    fn test_relay_link_gets_button_request_before_confirmation() {
        let keys = test_keys();
        let mut p = rig_on(TransportKind::Relay);
        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseRadio);

        assert_eq!(p.ui.prompts, vec![Prompt::ConfirmRadioUpdate]);
        assert_eq!(
            p.sink.responses[1..],
            [
                Response::ButtonRequest(ButtonRequestKind::FirmwareErase),
                Response::Success
            ]
        );
        assert_eq!(p.programmer.flash().erases, vec![9, 10, 11]);
    }

    #[test]
    fn test_relay_button_ack_reports_state() {
        let keys = test_keys();
        let mut p = rig_on(TransportKind::Relay);
        let mut session = UpdateSession::new(&config(), &keys.sets);
        p.ui.decisions.push_back(false);

        session.handle_packet(&message(MessageId::ButtonAck), &mut p);
        session.handle_packet(&message(MessageId::ButtonAck), &mut p);
        assert_eq!(
            p.sink.responses,
            vec![
                Response::ButtonRequest(ButtonRequestKind::Other),
                Response::Success
            ]
        );
    }

    #[test]
    fn test_update_commits_chunks_at_boundaries() {
        let keys = test_keys();
        let mut p = rig();
        let body = code(CHUNK - HDR + 64);
        let img = signed_image(&keys, FIRMWARE_MAGIC_NEW, &body);
        let packets = upload_packets(&img);

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);

        let mut first_commit = None;
        let mut flow = Flow::Continue;
        for packet in &packets {
            let before = session.received();
            flow = session.handle_packet(packet, &mut p);
            if first_commit.is_none() && !p.programmer.flash().programs.is_empty() {
                first_commit = Some((before, p.programmer.flash().programs.clone()));
            }
        }

        let (before, committed) = first_commit.unwrap();
        assert!((before as usize) < CHUNK);
        assert_eq!(committed.len(), (CHUNK - HDR) / 4);
        assert_eq!(committed.first().unwrap().0, layout().app_start());
        assert_eq!(committed.last().unwrap().0, layout().firmware_chunk_start(1) - 4);

        let flash = p.programmer.flash();
        let chunk1 = layout().firmware_chunk_start(1);
        assert_eq!(flash.programs_in(chunk1, chunk1 + CHUNK as u32), 16);
        assert_eq!(flash.programs_in(layout().header_start(), layout().app_start()), HDR / 4);
        assert_eq!(flash.programs.len(), (CHUNK - HDR) / 4 + 16 + HDR / 4);

        assert_eq!(flow, Flow::Reset);
        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(p.sink.last(), Some(Response::Success));
        assert_eq!(p.ui.prompts.last(), Some(&Prompt::UpdateSuccess));
        assert_eq!(p.ui.progress.last(), Some(&1000));
        assert_eq!(
            inspect_firmware(p.programmer.flash(), &layout(), &keys.sets),
            FirmwareVerdict::Valid
        );
        assert_eq!(p.programmer.flash().bytes(layout().header_start(), img.len()), &img[..]);
    }

    #[test]
    fn test_corrupted_chunk_never_reaches_flash() {
        let keys = test_keys();
        let mut p = rig();
        let mut img = signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(CHUNK + 2048));
        img[HDR + 2000] ^= 0x80;

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);
        p.programmer.flash_mut().load(layout().storage.start, b"secret");

        let flow = feed_all(&mut session, &mut p, &upload_packets(&img));
        assert_eq!(flow, Flow::Reset);
        assert_eq!(session.state(), SessionState::Ended);

        let flash = p.programmer.flash();
        assert!(flash.programs.is_empty());
        assert_eq!(flash.erase_count(4), 2);
        assert_eq!(flash.erase_count(2), 1);
        assert_eq!(flash.erase_count(3), 1);
        assert_eq!(
            p.sink.last(),
            Some(Response::Failure(FailureReason::FirmwareError))
        );
        assert_eq!(p.ui.prompts.last(), Some(&Prompt::UpdateFailed));
        assert_eq!(p.programmer.region_is_erased(&layout().storage), Ok(true));
    }

    #[test]
    fn test_ended_session_ignores_packets() {
        let keys = test_keys();
        let mut p = rig();
        let mut img = signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096));
        img[HDR + 1] ^= 1;
        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);
        feed_all(&mut session, &mut p, &upload_packets(&img));
        assert_eq!(session.state(), SessionState::Ended);

        let sent = p.sink.responses.len();
        let flow = session.handle_packet(&message(MessageId::Initialize), &mut p);
        assert_eq!(flow, Flow::Continue);
        assert_eq!(p.sink.responses.len(), sent);
        assert_eq!(session.state(), SessionState::Ended);
    }

    #[test]
    fn test_unsigned_image_shown_then_erased() {
        let keys = test_keys();
        let mut p = rig();
        let img = unsigned_image(FIRMWARE_MAGIC_NEW, &code(4096));

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);
        let flow = feed_all(&mut session, &mut p, &upload_packets(&img));

        assert_eq!(flow, Flow::Continue);
        assert_eq!(session.state(), SessionState::Checking);
        assert_eq!(
            p.sink.last(),
            Some(Response::ButtonRequest(ButtonRequestKind::FirmwareCheck))
        );
        assert_eq!(
            p.programmer.flash().programs_in(layout().header_start(), layout().app_start()),
            0
        );

        // Nothing but ButtonAck moves the session on
        session.handle_packet(&message(MessageId::Ping), &mut p);
        assert_eq!(session.state(), SessionState::Checking);

        let flow = session.handle_packet(&message(MessageId::ButtonAck), &mut p);
        assert_eq!(flow, Flow::Reset);

        let header = ImageHeader::from_bytes(img[..HDR].try_into().unwrap());
        assert_eq!(p.ui.fingerprints, vec![fingerprint(&header)]);
        assert_eq!(
            p.ui.prompts[p.ui.prompts.len() - 2..],
            [Prompt::FirmwareUnofficial, Prompt::UpdateFailed]
        );
        assert_eq!(
            p.sink.last(),
            Some(Response::Failure(FailureReason::FirmwareError))
        );
        assert_eq!(p.programmer.region_is_erased(&layout().firmware), Ok(true));
        assert_eq!(p.programmer.region_is_erased(&layout().storage), Ok(true));
    }

    #[test]
    fn test_secrets_kept_when_old_and_new_are_signed() {
        let keys = test_keys();
        let mut p = rig();
        install(&mut p, &signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096)));
        p.programmer.flash_mut().load(layout().storage.start, b"secret");

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);
        assert!(session.old_was_signed());
        assert_eq!(p.ui.prompts, vec![Prompt::ConfirmMainUpdate]);

        let img = signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(8192));
        assert_eq!(feed_all(&mut session, &mut p, &upload_packets(&img)), Flow::Reset);

        let flash = p.programmer.flash();
        assert_eq!(flash.erase_count(2), 0);
        assert_eq!(flash.bytes(layout().storage.start, 6), b"secret");
        assert_eq!(p.sink.last(), Some(Response::Success));
    }

    #[test]
    fn test_secrets_wiped_when_old_firmware_unsigned() {
        let keys = test_keys();
        let mut p = rig();
        install(&mut p, &unsigned_image(FIRMWARE_MAGIC_NEW, &code(4096)));
        p.programmer.flash_mut().load(layout().storage.start, b"secret");

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);
        assert!(!session.old_was_signed());

        let img = signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096));
        assert_eq!(feed_all(&mut session, &mut p, &upload_packets(&img)), Flow::Reset);

        assert_eq!(p.programmer.flash().erases[8..], [2, 3]);
        assert_eq!(p.programmer.region_is_erased(&layout().storage), Ok(true));
        assert_eq!(p.sink.last(), Some(Response::Success));
    }

    #[test]
    fn test_target_must_match_erase() {
        let keys = test_keys();
        let mut p = rig();
        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseRadio);

        let img = signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096));
        let flow = session.handle_packet(&upload_packets(&img)[0], &mut p);
        assert_eq!(flow, Flow::Reset);
        assert_eq!(p.sink.last(), Some(Response::Failure(FailureReason::DataError)));
        assert_eq!(p.ui.prompts.last(), Some(&Prompt::UpdateDataError));
    }

    #[test]
    fn test_upload_length_bounds() {
        let keys = test_keys();
        for declared in [HDR as u32 + 4, layout().app_max_len() + HDR as u32 + 8] {
            let mut p = rig();
            let mut session = UpdateSession::new(&config(), &keys.sets);
            open_and_erase(&mut session, &mut p, MessageId::EraseMain);

            let mut begin = upload_packets(&signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096)))[0];
            begin[5..9].copy_from_slice(&declared.to_be_bytes());
            assert_eq!(session.handle_packet(&begin, &mut p), Flow::Reset);
            assert_eq!(p.sink.last(), Some(Response::Failure(FailureReason::DataError)));
        }
    }

    #[test]
    fn test_data_packet_needs_continuation_byte() {
        let keys = test_keys();
        let mut p = rig();
        let img = signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096));
        let mut packets = upload_packets(&img);
        packets[3][0] = b'#';

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);
        assert_eq!(feed_all(&mut session, &mut p, &packets), Flow::Reset);
        assert_eq!(p.sink.last(), Some(Response::Failure(FailureReason::DataError)));
        assert_eq!(p.ui.prompts.last(), Some(&Prompt::UpdateDataError));
    }

    #[test]
    fn test_framing_error_after_commit_erases_target() {
        let keys = test_keys();
        let mut p = rig();
        p.programmer.flash_mut().load(layout().storage.start, b"secret");
        let img = signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(CHUNK + 4096));
        let mut packets = upload_packets(&img);
        let late = packets.len() - 2;
        packets[late][0] = b'#';

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);
        assert_eq!(feed_all(&mut session, &mut p, &packets), Flow::Reset);

        assert_eq!(session.chunk_index(), 1);
        assert_eq!(p.sink.last(), Some(Response::Failure(FailureReason::DataError)));
        assert_eq!(p.programmer.region_is_erased(&layout().firmware), Ok(true));
        assert_eq!(p.programmer.region_is_erased(&layout().storage), Ok(true));
    }

    #[test]
    fn test_stale_slot_in_stream_is_fatal() {
        let keys = test_keys();
        let mut p = rig();
        let body = code(4096);
        let mut raw = raw_header(FIRMWARE_MAGIC_NEW, &body);
        raw[32 + 15 * 32 + 31] = 0x01;
        let header = signed_header(&raw, [(1, &keys.a[0]), (2, &keys.a[1]), (3, &keys.a[2])]);
        let img = image(&header, &body);

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);
        assert_eq!(feed_all(&mut session, &mut p, &upload_packets(&img)), Flow::Reset);

        assert_eq!(
            p.sink.last(),
            Some(Response::Failure(FailureReason::FirmwareError))
        );
        assert_eq!(p.programmer.region_is_erased(&layout().firmware), Ok(true));
    }

    #[test]
    fn test_program_timeout_is_fatal() {
        let keys = test_keys();
        let mut p = rig();
        p.programmer.flash_mut().hang_program_at = Some(layout().app_start() + 8);
        let img = signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096));

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);
        assert_eq!(feed_all(&mut session, &mut p, &upload_packets(&img)), Flow::Reset);

        let flash = p.programmer.flash();
        assert_eq!(flash.programs.len(), 3);
        assert!(flash.locked);
        assert_eq!(flash.erase_count(2), 1);
        assert_eq!(p.ui.prompts.last(), Some(&Prompt::FlashFault));
        assert_eq!(
            p.sink.last(),
            Some(Response::Failure(FailureReason::ProcessError))
        );
        assert_eq!(session.state(), SessionState::Ended);
    }

    #[test]
    fn test_progress_reported_while_flashing() {
        let keys = test_keys();
        let mut p = rig();
        let img = signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(16 * 1024));
        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseMain);
        feed_all(&mut session, &mut p, &upload_packets(&img));

        let progress = &p.ui.progress;
        assert!(progress.len() > 2);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&1000));
    }

    #[test]
    fn test_wipe_device_confirmed() {
        let keys = test_keys();
        let mut p = rig();
        install(&mut p, &signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096)));
        let mut session = UpdateSession::new(&config(), &keys.sets);

        let flow = session.handle_packet(&message(MessageId::WipeDevice), &mut p);
        assert_eq!(flow, Flow::Reset);
        assert_eq!(p.ui.prompts, vec![Prompt::WipeDevice, Prompt::WipeSuccess]);
        assert_eq!(p.sink.last(), Some(Response::Success));
        assert_eq!(p.programmer.flash().erases, vec![2, 3, 4, 5, 6, 7, 8]);
        assert!(!presence_check(p.programmer.flash(), &layout(), FirmwareFormat::New));
    }

    #[test]
    fn test_wipe_device_declined() {
        let keys = test_keys();
        let mut p = rig();
        p.ui.decisions.push_back(false);
        let mut session = UpdateSession::new(&config(), &keys.sets);

        let flow = session.handle_packet(&message(MessageId::WipeDevice), &mut p);
        assert_eq!(flow, Flow::Reset);
        assert_eq!(p.ui.prompts, vec![Prompt::WipeDevice, Prompt::WipeFailed]);
        assert_eq!(
            p.sink.last(),
            Some(Response::Failure(FailureReason::ActionCancelled))
        );
        assert!(p.programmer.flash().erases.is_empty());
    }

    #[test]
    fn test_companion_update() {
        let keys = test_keys();
        let mut p = rig();
        let body = code(2 * 4096 + 100);
        let img = signed_image(&keys, FIRMWARE_MAGIC_COMPANION, &body);

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseRadio);
        assert_eq!(feed_all(&mut session, &mut p, &upload_packets(&img)), Flow::Reset);

        let staging = layout().companion_staging.start;
        assert_eq!(p.programmer.flash().bytes(staging, img.len()), &img[..]);
        assert_eq!(p.companion.pages.len(), 3);
        assert_eq!(&p.companion.pages[2][..100], &body[8192..]);
        assert!(p.companion.pages[2][100..].iter().all(|&b| b == 0));
        assert_eq!(p.companion.checks, vec![(staging + 1024, body.len() as u32)]);
        assert_eq!(p.companion.power_cycles, 1);
        assert_eq!(p.sink.last(), Some(Response::Success));
        assert_eq!(p.ui.prompts.last(), Some(&Prompt::UpdateSuccess));
        assert_eq!(p.programmer.flash().programs_in(FLASH_BASE, staging), 0);
    }

    #[test]
    fn test_companion_page_failure_is_fatal() {
        let keys = test_keys();
        let mut p = rig();
        p.companion.fail_page = Some(0);
        let img = signed_image(&keys, FIRMWARE_MAGIC_COMPANION, &code(3 * 4096));

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseRadio);
        assert_eq!(feed_all(&mut session, &mut p, &upload_packets(&img)), Flow::Reset);

        assert_eq!(p.companion.pages.len(), 1);
        assert!(p.companion.checks.is_empty());
        assert_eq!(p.companion.power_cycles, 0);
        assert_eq!(
            p.sink.responses[p.sink.responses.len() - 2..],
            [Response::Success, Response::Failure(FailureReason::ProcessError)]
        );
        assert_eq!(p.ui.prompts.last(), Some(&Prompt::CompanionUpdateFailed));
        assert_eq!(p.programmer.region_is_erased(&layout().companion_staging), Ok(true));
    }

    #[test]
    fn test_unsigned_companion_image_never_relayed() {
        let keys = test_keys();
        let mut p = rig();
        let img = unsigned_image(FIRMWARE_MAGIC_COMPANION, &code(4096));

        let mut session = UpdateSession::new(&config(), &keys.sets);
        open_and_erase(&mut session, &mut p, MessageId::EraseRadio);
        feed_all(&mut session, &mut p, &upload_packets(&img));
        assert_eq!(session.state(), SessionState::Checking);

        let flow = session.handle_packet(&message(MessageId::ButtonAck), &mut p);
        assert_eq!(flow, Flow::Reset);
        assert_eq!(p.companion.inits, 0);
        assert!(p.companion.pages.is_empty());
        assert_eq!(p.programmer.region_is_erased(&layout().companion_staging), Ok(true));
    }
}

// ============================================================================
// Relay Transport
// ============================================================================

mod relay_tests {
    use super::*;

    fn frame(tag: u8, data: &[u8]) -> RelayFrame {
        let mut out = heapless::Vec::new();
        out.extend_from_slice(data).unwrap();
        RelayFrame { tag, data: out }
    }

    fn wire(tag: u8, data: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&((data.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(&[0x12, 0x34]);
        out
    }

    #[test]
    fn test_two_packets_dispatched_in_order() {
        let keys = test_keys();
        let mut p = rig_on(TransportKind::Relay);
        let mut session = UpdateSession::new(&config(), &keys.sets);

        let mut data = message(MessageId::Initialize).to_vec();
        data.extend_from_slice(&message(MessageId::Ping));
        let flow = dispatch(&frame(0x46, &data), &mut session, &mut p);

        assert_eq!(flow, Flow::Continue);
        assert_eq!(session.state(), SessionState::Opened);
        assert!(matches!(
            p.sink.responses[..],
            [Response::Features(_), Response::Success]
        ));
    }

    #[test]
    fn test_short_tail_packet_zero_padded() {
        let keys = test_keys();
        let mut p = rig_on(TransportKind::Relay);
        let mut session = UpdateSession::new(&config(), &keys.sets);

        let mut data = message(MessageId::Ping).to_vec();
        data.extend_from_slice(&message(MessageId::Ping)[..5]);
        dispatch(&frame(0x46, &data), &mut session, &mut p);
        assert_eq!(p.sink.responses, vec![Response::Success, Response::Success]);
    }

    #[test]
    fn test_large_payload_acknowledged() {
        let keys = test_keys();
        let mut p = rig_on(TransportKind::Relay);
        let mut session = UpdateSession::new(&config(), &keys.sets);

        let data: Vec<u8> = (0..16).flat_map(|_| message(MessageId::Ping)).collect();
        dispatch(&frame(0x46, &data), &mut session, &mut p);
        assert_eq!(p.sink.responses.len(), 17);
    }

    #[test]
    fn test_non_packet_payload_gets_status_word() {
        let keys = test_keys();
        let mut p = rig_on(TransportKind::Relay);
        let mut session = UpdateSession::new(&config(), &keys.sets);

        dispatch(&frame(0x46, &[0x00, 0x01]), &mut session, &mut p);
        assert_eq!(p.sink.responses, vec![Response::RelayStatus(0x6000)]);
    }

    #[test]
    fn test_display_and_handshake_left_to_link() {
        let keys = test_keys();
        let mut p = rig_on(TransportKind::Relay);
        let mut session = UpdateSession::new(&config(), &keys.sets);

        let ping = message(MessageId::Ping);
        dispatch(&frame(0x44, &ping), &mut session, &mut p);
        dispatch(&frame(0x55, &ping), &mut session, &mut p);
        assert!(p.sink.responses.is_empty());
    }

    #[test]
    fn test_receiver_feeds_session_from_queue() {
        let keys = test_keys();
        let mut p = rig_on(TransportKind::Relay);
        let mut session = UpdateSession::new(&config(), &keys.sets);

        let mut queue = RelayQueue::new();
        let (mut producer, consumer) = queue.split();
        let mut rx = RelayReceiver::new(consumer);

        let bytes = wire(0x46, &message(MessageId::Initialize));
        feed(&mut producer, &bytes[..10]);
        assert_eq!(rx.service(&mut session, &mut p), Flow::Continue);
        assert_eq!(session.state(), SessionState::Ready);

        feed(&mut producer, &bytes[10..]);
        assert_eq!(rx.service(&mut session, &mut p), Flow::Continue);
        assert_eq!(session.state(), SessionState::Opened);
    }
}

// ============================================================================
// Boot Decision
// ============================================================================

mod boot_tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn boot(sys: &mut MockSystem, p: &mut Rig, keys: &TestKeys, packets: Vec<Packet>, mandatory: bool) {
        let mut source = ScriptedSource {
            packets: packets.into(),
        };
        let result = catch_unwind(AssertUnwindSafe(|| {
            run(sys, p, &mut source, &config(), &keys.sets, mandatory);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_inspect_firmware_verdicts() {
        let keys = test_keys();

        let p = rig();
        assert_eq!(inspect_firmware(p.programmer.flash(), &layout(), &keys.sets), FirmwareVerdict::Absent);

        let mut p = rig();
        install(&mut p, &signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096)));
        assert_eq!(inspect_firmware(p.programmer.flash(), &layout(), &keys.sets), FirmwareVerdict::Valid);

        p.programmer.flash_mut().load(layout().app_start() + 16, &[0x00]);
        assert_eq!(inspect_firmware(p.programmer.flash(), &layout(), &keys.sets), FirmwareVerdict::Broken);

        let mut p = rig();
        install(&mut p, &unsigned_image(FIRMWARE_MAGIC_NEW, &code(4096)));
        assert_eq!(inspect_firmware(p.programmer.flash(), &layout(), &keys.sets), FirmwareVerdict::Unofficial);
    }

    #[test]
    fn test_session_flag_is_one_shot_and_skips_inspection() {
        let keys = test_keys();
        let p = rig();
        let mut sys = MockSystem {
            flag: 0x55AA_55AA,
            ..MockSystem::default()
        };
        let inputs = gather_inputs(&mut sys, p.programmer.flash(), &config(), &keys.sets, false);
        assert!(inputs.session_flag_set);
        assert!(sys.flag_cleared);
        assert_eq!(inputs.firmware, FirmwareVerdict::NotChecked);
        assert_eq!(wb_boot::decide(&inputs), BootDecision::UpdateLoop);

        let again = gather_inputs(&mut sys, p.programmer.flash(), &config(), &keys.sets, false);
        assert!(!again.session_flag_set);
        assert_eq!(again.firmware, FirmwareVerdict::Absent);
    }

    #[test]
    fn test_valid_firmware_jumps_with_ram_cleared() {
        let keys = test_keys();
        let mut p = rig();
        install(&mut p, &signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096)));
        let mut sys = MockSystem::default();

        boot(&mut sys, &mut p, &keys, Vec::new(), false);
        assert_eq!(
            sys.jumped,
            Some(Handoff {
                vector_table: layout().app_start(),
                signed: true,
                clear_ram: Some((layout().ram_start, layout().ram_end)),
            })
        );
        assert_eq!(sys.resets, 0);
        assert!(p.ui.prompts.is_empty());
    }

    #[test]
    fn test_override_button_enters_update_loop() {
        let keys = test_keys();
        let mut p = rig();
        install(&mut p, &signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096)));
        let mut sys = MockSystem {
            override_held: true,
            ..MockSystem::default()
        };

        boot(&mut sys, &mut p, &keys, vec![message(MessageId::Initialize)], false);
        assert_eq!(sys.jumped, None);
        assert_eq!(sys.resets, 1);
        assert!(matches!(p.sink.responses[..], [Response::Features(_)]));
    }

    #[test]
    fn test_broken_firmware_prompts_before_update_loop() {
        let keys = test_keys();
        let mut p = rig();
        install(&mut p, &signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096)));
        p.programmer.flash_mut().load(layout().app_start(), &[0x00]);
        let mut sys = MockSystem::default();

        boot(&mut sys, &mut p, &keys, vec![message(MessageId::Ping)], false);
        assert_eq!(sys.jumped, None);
        assert_eq!(p.ui.prompts, vec![Prompt::FirmwareBroken]);
        assert_eq!(p.sink.responses, vec![Response::Success]);
        assert_eq!(sys.resets, 1);
    }

    #[test]
    fn test_unofficial_firmware_never_runs() {
        let keys = test_keys();
        let mut p = rig();
        install(&mut p, &unsigned_image(FIRMWARE_MAGIC_NEW, &code(4096)));
        let mut sys = MockSystem::default();

        boot(&mut sys, &mut p, &keys, Vec::new(), false);
        assert_eq!(sys.jumped, None);
        assert_eq!(p.ui.prompts, vec![Prompt::FirmwareUnofficial]);
    }

    #[test]
    fn test_mandatory_update_refuses_to_boot() {
        let keys = test_keys();
        let mut p = rig();
        install(&mut p, &signed_image(&keys, FIRMWARE_MAGIC_NEW, &code(4096)));
        let mut sys = MockSystem::default();

        boot(&mut sys, &mut p, &keys, Vec::new(), true);
        assert_eq!(sys.jumped, None);
        assert_eq!(sys.resets, 1);
        assert_eq!(p.ui.prompts, vec![Prompt::UpdateMandatory]);
    }
}
