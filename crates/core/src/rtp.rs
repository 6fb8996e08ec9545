// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The RTP surface shared with the surrounding worker.
//!
//! Packet parsing, RTCP and transport concerns live outside this
//! subsystem; [`RtpPacket`] is the already-parsed contract type the worker
//! hands in and receives back through an [`RtpPacketsCollector`].

use std::collections::HashSet;
use std::sync::Arc;

use crate::pool::Buffer;
use crate::types::MimeType;

/// Identifier of a consumer as assigned by the worker.
pub type ConsumerId = u64;

/// Parsed RTP packet contract type.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub ssrc: u32,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload_type: u8,
    pub marker: bool,
    pub payload: Arc<Buffer>,
    /// Single-byte Opus payloads are DTX; flagged on translated packets so
    /// downstream forwarding can elide them.
    pub dtx: bool,
    /// True for packets produced by the translation pipeline.
    pub translated: bool,
    rejected_consumers: HashSet<ConsumerId>,
}

impl RtpPacket {
    pub fn new(
        ssrc: u32,
        sequence_number: u16,
        timestamp: u32,
        payload_type: u8,
        marker: bool,
        payload: Arc<Buffer>,
    ) -> Self {
        Self {
            ssrc,
            sequence_number,
            timestamp,
            payload_type,
            marker,
            payload,
            dtx: false,
            translated: false,
            rejected_consumers: HashSet::new(),
        }
    }

    /// Consumers that must not receive this packet.
    pub const fn rejected_consumers(&self) -> &HashSet<ConsumerId> {
        &self.rejected_consumers
    }

    pub fn is_rejected_for(&self, consumer: ConsumerId) -> bool {
        self.rejected_consumers.contains(&consumer)
    }

    pub fn set_rejected_consumers(&mut self, consumers: HashSet<ConsumerId>) {
        self.rejected_consumers = consumers;
    }

    pub fn reject_consumers(&mut self, consumers: impl IntoIterator<Item = ConsumerId>) {
        self.rejected_consumers.extend(consumers);
    }
}

/// Output device for packets leaving the subsystem.
///
/// The SFU must drop the delivered packet for exactly the consumers in
/// [`RtpPacket::rejected_consumers`].
pub trait RtpPacketsCollector: Send + Sync {
    fn add_packet(&self, packet: RtpPacket);
}

/// Timestamp/sequence progression of one RTP stream.
///
/// The delta is updated only when a strictly later timestamp is observed,
/// so duplicated or reordered timestamps never shrink it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtpPacketsTimeline {
    last_timestamp: u32,
    last_seq: u16,
    timestamp_delta: u32,
}

impl RtpPacketsTimeline {
    pub fn copy_packet_info_from(&mut self, packet: &RtpPacket) {
        self.last_seq = packet.sequence_number;
        self.set_timestamp(packet.timestamp);
    }

    pub fn set_timestamp(&mut self, timestamp: u32) {
        if self.last_timestamp != timestamp {
            if self.last_timestamp != 0 && timestamp > self.last_timestamp {
                self.timestamp_delta = timestamp - self.last_timestamp;
            }
            self.last_timestamp = timestamp;
        }
    }

    pub fn set_seq_number(&mut self, seq: u16) {
        self.last_seq = seq;
    }

    pub const fn timestamp(&self) -> u32 {
        self.last_timestamp
    }

    pub const fn seq_number(&self) -> u16 {
        self.last_seq
    }

    pub const fn timestamp_delta(&self) -> u32 {
        self.timestamp_delta
    }

    pub const fn next_timestamp(&self) -> u32 {
        self.last_timestamp.wrapping_add(self.timestamp_delta)
    }

    /// Advance and return the next sequence number.
    pub fn advance_seq_number(&mut self) -> u16 {
        self.last_seq = self.last_seq.wrapping_add(1);
        self.last_seq
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A translated frame recovered from the service, ready to be stitched
/// onto a consumer-facing timeline.
///
/// The timestamp offset is measured in RTP ticks from the start of the
/// media fragment this packet came from.
#[derive(Debug, Clone)]
pub struct RtpTranslatedPacket {
    timestamp_offset: u32,
    packet: RtpPacket,
}

impl RtpTranslatedPacket {
    pub fn new(mime: MimeType, timestamp_offset: u32, payload: Arc<Buffer>) -> Self {
        let mut packet = RtpPacket::new(0, 0, 0, 0, false, payload);
        packet.translated = true;
        // Opus DTX: libopus emits a lone TOC byte for silence
        if matches!(mime, MimeType::Audio(crate::types::AudioCodec::Opus)) {
            packet.dtx = packet.payload.len() == 1;
        }
        Self { timestamp_offset, packet }
    }

    pub const fn timestamp_offset(&self) -> u32 {
        self.timestamp_offset
    }

    pub fn set_ssrc(&mut self, ssrc: u32) {
        self.packet.ssrc = ssrc;
    }

    pub fn set_payload_type(&mut self, payload_type: u8) {
        self.packet.payload_type = payload_type;
    }

    pub fn set_marker(&mut self, marker: bool) {
        self.packet.marker = marker;
    }

    /// Take the inner packet for timeline rewrite and delivery.
    pub fn take(self) -> RtpPacket {
        self.packet
    }
}
