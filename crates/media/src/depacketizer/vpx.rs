// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! VP8/VP9 RTP depacketizer.
//!
//! Packets of one access unit share a timestamp; payloads accumulate until
//! the RTP marker closes the unit. Duplicate sequence numbers within a
//! unit overwrite their slot, gaps drop the unit. For VP8 key frames the
//! uncompressed data chunk carries the frame resolution.

use std::collections::BTreeMap;
use std::sync::Arc;

use lingokit_core::types::VideoCodec;
use lingokit_core::{BufferPool, MediaFrame, MimeType, RtpPacket, RtpTimestamp, VideoFrameConfig};

struct Assembly {
    timestamp: u32,
    first_seq: u16,
    // offset from first_seq -> descriptor-stripped payload
    parts: BTreeMap<u16, Vec<u8>>,
    key_frame: bool,
}

pub struct VpxDepacketizer {
    codec: VideoCodec,
    clock_rate: u32,
    pool: BufferPool,
    assembly: Option<Assembly>,
    config: Option<VideoFrameConfig>,
}

impl VpxDepacketizer {
    pub fn new(codec: VideoCodec, clock_rate: u32, pool: BufferPool) -> Self {
        debug_assert!(matches!(codec, VideoCodec::Vp8 | VideoCodec::Vp9));
        Self { codec, clock_rate, pool, assembly: None, config: None }
    }

    pub const fn mime(&self) -> MimeType {
        MimeType::Video(self.codec)
    }

    pub const fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn config(&self) -> Option<VideoFrameConfig> {
        self.config.clone()
    }

    pub fn add_packet(
        &mut self,
        packet: &RtpPacket,
        _deep_copy: bool,
        config_changed: &mut bool,
    ) -> Option<MediaFrame> {
        let Some(unit) = split_payload(self.codec, packet.payload.as_slice()) else {
            tracing::debug!(ssrc = packet.ssrc, seq = packet.sequence_number,
                "dropping packet with malformed {:?} payload descriptor", self.codec);
            return None;
        };

        // a new timestamp before the marker abandons the previous unit
        if self.assembly.as_ref().is_some_and(|assembly| assembly.timestamp != packet.timestamp) {
            tracing::trace!(ssrc = packet.ssrc, "incomplete access unit dropped");
            self.assembly = None;
        }

        let assembly = self.assembly.get_or_insert_with(|| Assembly {
            timestamp: packet.timestamp,
            first_seq: packet.sequence_number,
            parts: BTreeMap::new(),
            key_frame: false,
        });
        if unit.frame_start {
            assembly.first_seq = packet.sequence_number;
            assembly.key_frame = unit.key_frame;
        }
        let slot = packet.sequence_number.wrapping_sub(assembly.first_seq);
        assembly.parts.insert(slot, unit.payload.to_vec());

        if unit.frame_start && unit.key_frame && self.codec == VideoCodec::Vp8 {
            self.update_config(unit.payload, config_changed);
        }

        if !packet.marker {
            return None;
        }
        let assembly = self.assembly.take()?;
        self.finish_unit(&assembly)
    }

    fn finish_unit(&self, assembly: &Assembly) -> Option<MediaFrame> {
        let parts = &assembly.parts;
        let contiguous = parts
            .keys()
            .last()
            .is_some_and(|&last| usize::from(last) + 1 == parts.len());
        if !contiguous {
            tracing::debug!("dropping access unit with missing packets");
            return None;
        }
        let total: usize = parts.values().map(Vec::len).sum();
        if total == 0 {
            return None;
        }
        let mut payload = self.pool.allocate(total);
        let mut written = 0usize;
        for part in parts.values() {
            payload.as_mut_slice()[written..written + part.len()].copy_from_slice(part);
            written += part.len();
        }
        Some(MediaFrame::video(
            self.mime(),
            assembly.key_frame,
            RtpTimestamp::new(assembly.timestamp, self.clock_rate),
            Arc::new(payload),
            self.config.clone(),
        ))
    }

    fn update_config(&mut self, key_frame_payload: &[u8], config_changed: &mut bool) {
        let Some((width, height)) = parse_vp8_resolution(key_frame_payload) else { return };
        let known = self
            .config
            .as_ref()
            .is_some_and(|config| config.width == width && config.height == height);
        if !known {
            self.config = Some(VideoFrameConfig {
                width,
                height,
                frame_rate: 30.0,
                codec_specific: None,
            });
            *config_changed = true;
        }
    }
}

struct PayloadUnit<'a> {
    payload: &'a [u8],
    frame_start: bool,
    key_frame: bool,
}

// Strip the RTP payload descriptor, returning the codec payload plus
// frame-boundary flags. RFC 7741 (VP8) / draft-ietf-payload-vp9.
fn split_payload(codec: VideoCodec, data: &[u8]) -> Option<PayloadUnit<'_>> {
    match codec {
        VideoCodec::Vp8 => split_vp8(data),
        VideoCodec::Vp9 => split_vp9(data),
        VideoCodec::H264 | VideoCodec::H265 => None,
    }
}

fn split_vp8(data: &[u8]) -> Option<PayloadUnit<'_>> {
    let first = *data.first()?;
    let mut offset = 1usize;
    let frame_start = first & 0x10 != 0 && first & 0x07 == 0;
    if first & 0x80 != 0 {
        let extension = *data.get(offset)?;
        offset += 1;
        if extension & 0x80 != 0 {
            // picture id, one or two bytes
            let picture = *data.get(offset)?;
            offset += if picture & 0x80 != 0 { 2 } else { 1 };
        }
        if extension & 0x40 != 0 {
            offset += 1; // TL0PICIDX
        }
        if extension & 0x30 != 0 {
            offset += 1; // TID/KEYIDX
        }
    }
    let payload = data.get(offset..)?;
    let key_frame = frame_start && payload.first().is_some_and(|&byte| byte & 0x01 == 0);
    (!payload.is_empty()).then_some(PayloadUnit { payload, frame_start, key_frame })
}

fn split_vp9(data: &[u8]) -> Option<PayloadUnit<'_>> {
    let first = *data.first()?;
    let mut offset = 1usize;
    if first & 0x80 != 0 {
        // picture id, one or two bytes
        let picture = *data.get(offset)?;
        offset += if picture & 0x80 != 0 { 2 } else { 1 };
    }
    if first & 0x20 != 0 {
        offset += 1; // layer indices
    }
    let payload = data.get(offset..)?;
    let frame_start = first & 0x08 != 0;
    let key_frame = frame_start && first & 0x40 == 0;
    (!payload.is_empty()).then_some(PayloadUnit { payload, frame_start, key_frame })
}

// VP8 uncompressed data chunk of a key frame: 3-byte frame tag, the
// 0x9d 0x01 0x2a start code, then 14-bit width and height.
fn parse_vp8_resolution(payload: &[u8]) -> Option<(u16, u16)> {
    if payload.len() < 10 || payload[3..6] != [0x9D, 0x01, 0x2A] {
        return None;
    }
    let width = u16::from_le_bytes([payload[6], payload[7]]) & 0x3FFF;
    let height = u16::from_le_bytes([payload[8], payload[9]]) & 0x3FFF;
    (width > 0 && height > 0).then_some((width, height))
}
