// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Companion relay transport
//!
//! When the host talks through the companion radio, bytes arrive from a
//! receive interrupt into a single-producer single-consumer queue. The main
//! loop drains the queue, reassembles relay frames and feeds the 64-byte
//! packets they carry to the update session.
//!
//! Frame layout:
//! ```text
//! tag (1) | len (2, BE) | data (len - 2) | crc (2)
//! ```

use crate::boot::PacketSource;
use crate::protocol::{Packet, Response, ResponseSink, CONTINUATION};
use crate::session::{Flow, Peripherals, UpdateSession};
use crate::ui::UserInterface;
use heapless::spsc::{Consumer, Producer, Queue};
use heapless::Vec;
use wb_common::constants::{PACKET_SIZE, RELAY_MAX_FRAME, RELAY_QUEUE_SIZE};
use wb_common::{log_debug, log_trace, log_warn};
use wb_hal::{CompanionDebugPort, FlashController};

const MODULE: &str = "relay";

/// Tag + length prefix
const FRAME_HEAD_LEN: usize = 3;

/// Trailing CRC, counted in the length field
const CRC_LEN: usize = 2;

/// Payloads this long are acknowledged after dispatch
const ACK_THRESHOLD: usize = 0x400;

/// Status word for payloads that are not packet data
const STATUS_NOT_PACKET: u16 = 0x6000;

/// Byte queue shared between the receive interrupt and the main loop
pub type RelayQueue = Queue<u8, RELAY_QUEUE_SIZE>;

/// Interrupt side of the queue
pub type RelayProducer<'q> = Producer<'q, u8, RELAY_QUEUE_SIZE>;

/// Main-loop side of the queue
pub type RelayConsumer<'q> = Consumer<'q, u8, RELAY_QUEUE_SIZE>;

/// Relay frame tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelayTag {
    /// Display relay, handled by the display collaborator
    Display = 0x44,
    /// Host packet relay
    Packet = 0x46,
    /// Companion handshake, handled by the link collaborator
    Handshake = 0x55,
}

impl RelayTag {
    /// Decode a tag byte
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x44 => Some(Self::Display),
            0x46 => Some(Self::Packet),
            0x55 => Some(Self::Handshake),
            _ => None,
        }
    }
}

/// Push received bytes from the interrupt handler
///
/// Returns how many bytes were queued; the rest are dropped.
pub fn feed(producer: &mut RelayProducer<'_>, bytes: &[u8]) -> usize {
    bytes
        .iter()
        .take_while(|&&b| producer.enqueue(b).is_ok())
        .count()
}

/// One complete relay frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    /// Raw tag byte
    pub tag: u8,
    /// Frame data without the CRC
    pub data: Vec<u8, RELAY_MAX_FRAME>,
}

/// Frame reassembly from the relay byte queue
pub struct RelayReceiver<'q> {
    consumer: RelayConsumer<'q>,
    buf: Vec<u8, RELAY_MAX_FRAME>,
    dropped: u32,
}

impl<'q> RelayReceiver<'q> {
    /// Create a receiver draining `consumer`
    #[must_use]
    pub fn new(consumer: RelayConsumer<'q>) -> Self {
        Self {
            consumer,
            buf: Vec::new(),
            dropped: 0,
        }
    }

    /// Number of malformed frames discarded
    #[must_use]
    pub const fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Drain queued bytes until a frame completes or the queue is empty
    pub fn poll(&mut self) -> Option<RelayFrame> {
        while let Some(byte) = self.consumer.dequeue() {
            if self.buf.push(byte).is_err() {
                self.discard();
                continue;
            }
            if self.buf.len() < FRAME_HEAD_LEN {
                continue;
            }

            let len = usize::from(u16::from_be_bytes([self.buf[1], self.buf[2]]));
            if len < CRC_LEN || FRAME_HEAD_LEN + len > RELAY_MAX_FRAME {
                self.discard();
                continue;
            }
            if self.buf.len() == FRAME_HEAD_LEN + len {
                let mut data = Vec::new();
                // Capacity is checked against RELAY_MAX_FRAME above
                let _ = data.extend_from_slice(&self.buf[FRAME_HEAD_LEN..FRAME_HEAD_LEN + len - CRC_LEN]);
                let frame = RelayFrame {
                    tag: self.buf[0],
                    data,
                };
                self.buf.clear();
                return Some(frame);
            }
        }
        None
    }

    fn discard(&mut self) {
        self.buf.clear();
        self.dropped = self.dropped.saturating_add(1);
    }
}

impl PacketSource for RelayReceiver<'_> {
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
        while let Some(frame) = self.poll() {
            if dispatch(&frame, session, p) == Flow::Reset {
                return Flow::Reset;
            }
        }
        Flow::Continue
    }
}

/// Dispatch a relay frame
///
/// Packet relay frames whose data starts with `'?'` are split into 64-byte
/// packets, the last zero padded, and fed to the session in order.
pub fn dispatch<F, C, U, S>(
    frame: &RelayFrame,
    session: &mut UpdateSession<'_>,
    p: &mut Peripherals<F, C, U, S>,
) -> Flow
where
    F: FlashController,
    C: CompanionDebugPort,
    U: UserInterface,
    S: ResponseSink,
{
    match RelayTag::from_u8(frame.tag) {
        Some(RelayTag::Packet) => {}
        Some(tag) => {
            log_trace!(p.log, 0, MODULE, "{:?} frame left to the link", tag);
            return Flow::Continue;
        }
        None => {
            log_warn!(p.log, 0, MODULE, "unknown tag {:#04x}", frame.tag);
            return Flow::Continue;
        }
    }

    if frame.data.first() != Some(&CONTINUATION) {
        p.sink.send(Response::RelayStatus(STATUS_NOT_PACKET));
        return Flow::Continue;
    }

    log_debug!(p.log, 0, MODULE, "{} bytes of packets", frame.data.len());
    for chunk in frame.data.chunks(PACKET_SIZE) {
        let mut packet: Packet = [0; PACKET_SIZE];
        packet[..chunk.len()].copy_from_slice(chunk);
        if session.handle_packet(&packet, p) == Flow::Reset {
            return Flow::Reset;
        }
    }

    if frame.data.len() >= ACK_THRESHOLD {
        p.sink.send(Response::Success);
    }
    Flow::Continue
}
