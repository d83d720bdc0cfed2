// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Host packet protocol
//!
//! Every inbound unit is a 64-byte packet. Message packets start with the
//! sentinel `"?##"` followed by a big-endian message id; image data packets
//! start with a single `'?'` followed by 63 raw bytes.
//!
//! ```text
//! Message packet:  '?' '#' '#' | id (2, BE) | payload (59)
//! Upload begin:    '?' '#' '#' | 0x0007 | len (4, BE) | 0x0A | ... | image[0..51] at 13
//! Data packet:     '?' | image bytes (63)
//! ```
//!
//! Outbound responses are handed to a [`ResponseSink`]; their wire encoding
//! belongs to the transport.

use crate::header::UpdateTarget;
use wb_common::constants::{PACKET_SIZE, UPLOAD_LENGTH_OVERHEAD, UPLOAD_PAYLOAD_OFFSET};
use wb_common::Error;

/// One inbound packet
pub type Packet = [u8; PACKET_SIZE];

/// Leading bytes of a message packet
pub const PACKET_SENTINEL: &[u8; 3] = b"?##";

/// Leading byte of a data packet
pub const CONTINUATION: u8 = b'?';

/// Fixed tag byte in the upload-begin packet
pub const UPLOAD_TAG: u8 = 0x0A;

/// Vendor string reported in features
pub const VENDOR: &str = "qbitel";

/// Bootloader version reported in features
pub const BOOTLOADER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Message ids understood by the bootloader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageId {
    /// Open a session and report features
    Initialize = 0x0000,
    /// Liveness check
    Ping = 0x0001,
    /// Erase the companion staging area
    EraseRadio = 0x0002,
    /// Erase storage and firmware
    WipeDevice = 0x0005,
    /// Erase the main firmware region
    EraseMain = 0x0006,
    /// Upload begin
    Upload = 0x0007,
    /// Host acknowledges a button request
    ButtonAck = 0x001B,
    /// Report features without opening a session
    GetFeatures = 0x0037,
}

impl MessageId {
    /// Decode a raw id
    #[must_use]
    pub const fn from_u16(id: u16) -> Option<Self> {
        match id {
            0x0000 => Some(Self::Initialize),
            0x0001 => Some(Self::Ping),
            0x0002 => Some(Self::EraseRadio),
            0x0005 => Some(Self::WipeDevice),
            0x0006 => Some(Self::EraseMain),
            0x0007 => Some(Self::Upload),
            0x001B => Some(Self::ButtonAck),
            0x0037 => Some(Self::GetFeatures),
            _ => None,
        }
    }
}

/// Raw message id of a message packet, `None` without the sentinel
#[must_use]
pub fn parse_message_id(packet: &Packet) -> Option<u16> {
    if packet[..3] != PACKET_SENTINEL[..] {
        return None;
    }
    Some(u16::from_be_bytes([packet[3], packet[4]]))
}

/// Decoded upload-begin packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadBegin {
    /// Total image length including the header
    pub flash_len: u32,
    /// Image magic
    pub magic: u32,
    /// Target selected by the magic
    pub target: UpdateTarget,
}

impl UploadBegin {
    /// Decode the length, tag and magic
    ///
    /// Range checks against the target region are left to the session.
    pub fn parse(packet: &Packet) -> Result<Self, Error> {
        if packet[9] != UPLOAD_TAG {
            return Err(Error::InvalidFraming);
        }

        let declared = u32::from_be_bytes([packet[5], packet[6], packet[7], packet[8]]);
        let flash_len = declared
            .checked_sub(UPLOAD_LENGTH_OVERHEAD)
            .ok_or(Error::InvalidLength)?;
        if flash_len % 4 != 0 {
            return Err(Error::InvalidLength);
        }

        let at = UPLOAD_PAYLOAD_OFFSET;
        let magic = u32::from_le_bytes([packet[at], packet[at + 1], packet[at + 2], packet[at + 3]]);
        let target = UpdateTarget::from_magic(magic).ok_or(Error::InvalidMagic)?;

        Ok(Self {
            flash_len,
            magic,
            target,
        })
    }

    /// Image bytes carried by the upload-begin packet
    #[must_use]
    pub fn payload(packet: &Packet) -> &[u8] {
        &packet[UPLOAD_PAYLOAD_OFFSET..]
    }
}

/// Image bytes carried by a data packet, `None` without the continuation byte
#[must_use]
pub fn data_payload(packet: &Packet) -> Option<&[u8]> {
    if packet[0] == CONTINUATION {
        Some(&packet[1..])
    } else {
        None
    }
}

/// Device capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Vendor name
    pub vendor: &'static str,
    /// Bootloader version
    pub version: &'static str,
    /// Always set while the bootloader is running
    pub bootloader_mode: bool,
    /// A new-format firmware passes the presence check
    pub firmware_present: bool,
}

/// Failure reason carried in a failure response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The user declined
    ActionCancelled,
    /// Malformed packet or image
    DataError,
    /// Image did not verify
    FirmwareError,
    /// Flash or companion hardware failed
    ProcessError,
}

impl From<Error> for FailureReason {
    fn from(e: Error) -> Self {
        use wb_common::ErrorKind;
        match e.kind() {
            ErrorKind::Structural => Self::DataError,
            ErrorKind::SignatureInvalid | ErrorKind::HashMismatch => Self::FirmwareError,
            ErrorKind::HardwareFault => Self::ProcessError,
            ErrorKind::UserCancelled => Self::ActionCancelled,
        }
    }
}

/// What the host is asked to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonRequestKind {
    /// Generic confirmation
    Other,
    /// Wipe confirmation
    WipeDevice,
    /// Firmware erase confirmation
    FirmwareErase,
    /// Unsigned firmware fingerprint check
    FirmwareCheck,
}

/// Outbound response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Device capabilities
    Features(Features),
    /// Request completed
    Success,
    /// Request failed
    Failure(FailureReason),
    /// Waiting for a physical button press
    ButtonRequest(ButtonRequestKind),
    /// Raw relay status word
    RelayStatus(u16),
}

/// Transport a session is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// USB HID, host blocks while the user confirms
    Usb,
    /// Companion relay link, host must be told to wait
    Relay,
}

/// Response encoder and sender
pub trait ResponseSink {
    /// Encode and send a response
    fn send(&mut self, response: Response);

    /// Transport this sink writes to
    fn transport(&self) -> TransportKind;
}
