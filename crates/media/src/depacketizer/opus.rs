// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Opus RTP depacketizer.
//!
//! Opus packets map one-to-one onto media frames; the interesting work is
//! the TOC byte, which encodes the operating mode, bandwidth, frame size
//! and channel layout (RFC 6716, section 3.1).

use std::sync::Arc;

use lingokit_core::types::AudioCodec;
use lingokit_core::{AudioFrameConfig, BufferPool, MediaFrame, MimeType, RtpPacket, RtpTimestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpusMode {
    SilkOnly,
    Hybrid,
    CeltOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpusBandwidth {
    Narrowband,
    MediumBand,
    WideBand,
    SuperWideBand,
    FullBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpusFrameSize {
    Ms2_5,
    Ms5,
    Ms10,
    Ms20,
    Ms40,
    Ms60,
}

impl OpusFrameSize {
    pub const fn as_micros(self) -> u64 {
        match self {
            Self::Ms2_5 => 2_500,
            Self::Ms5 => 5_000,
            Self::Ms10 => 10_000,
            Self::Ms20 => 20_000,
            Self::Ms40 => 40_000,
            Self::Ms60 => 60_000,
        }
    }
}

/// Decoded TOC byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusToc {
    pub mode: OpusMode,
    pub bandwidth: OpusBandwidth,
    pub frame_size: OpusFrameSize,
    pub stereo: bool,
    /// Frame-packing code, 0..=3.
    pub code: u8,
}

// RFC 6716 section 3.1, configs 0..=31.
const PRESETS: [(OpusMode, OpusBandwidth, OpusFrameSize); 32] = {
    use OpusBandwidth as B;
    use OpusFrameSize as F;
    use OpusMode as M;
    [
        (M::SilkOnly, B::Narrowband, F::Ms10),
        (M::SilkOnly, B::Narrowband, F::Ms20),
        (M::SilkOnly, B::Narrowband, F::Ms40),
        (M::SilkOnly, B::Narrowband, F::Ms60),
        (M::SilkOnly, B::MediumBand, F::Ms10),
        (M::SilkOnly, B::MediumBand, F::Ms20),
        (M::SilkOnly, B::MediumBand, F::Ms40),
        (M::SilkOnly, B::MediumBand, F::Ms60),
        (M::SilkOnly, B::WideBand, F::Ms10),
        (M::SilkOnly, B::WideBand, F::Ms20),
        (M::SilkOnly, B::WideBand, F::Ms40),
        (M::SilkOnly, B::WideBand, F::Ms60),
        (M::Hybrid, B::SuperWideBand, F::Ms10),
        (M::Hybrid, B::SuperWideBand, F::Ms20),
        (M::Hybrid, B::FullBand, F::Ms10),
        (M::Hybrid, B::FullBand, F::Ms20),
        (M::CeltOnly, B::Narrowband, F::Ms2_5),
        (M::CeltOnly, B::Narrowband, F::Ms5),
        (M::CeltOnly, B::Narrowband, F::Ms10),
        (M::CeltOnly, B::Narrowband, F::Ms20),
        (M::CeltOnly, B::WideBand, F::Ms2_5),
        (M::CeltOnly, B::WideBand, F::Ms5),
        (M::CeltOnly, B::WideBand, F::Ms10),
        (M::CeltOnly, B::WideBand, F::Ms20),
        (M::CeltOnly, B::SuperWideBand, F::Ms2_5),
        (M::CeltOnly, B::SuperWideBand, F::Ms5),
        (M::CeltOnly, B::SuperWideBand, F::Ms10),
        (M::CeltOnly, B::SuperWideBand, F::Ms20),
        (M::CeltOnly, B::FullBand, F::Ms2_5),
        (M::CeltOnly, B::FullBand, F::Ms5),
        (M::CeltOnly, B::FullBand, F::Ms10),
        (M::CeltOnly, B::FullBand, F::Ms20),
    ]
};

/// Decode a TOC byte.
pub const fn parse_toc(toc: u8) -> OpusToc {
    let (mode, bandwidth, frame_size) = PRESETS[(toc >> 3) as usize];
    OpusToc { mode, bandwidth, frame_size, stereo: toc & 0x04 != 0, code: toc & 0x03 }
}

/// Whether `payload` is a DTX packet (a lone TOC byte).
pub const fn is_dtx(payload: &[u8]) -> bool {
    payload.len() == 1
}

pub struct OpusDepacketizer {
    clock_rate: u32,
    pool: BufferPool,
    config: Option<AudioFrameConfig>,
}

impl OpusDepacketizer {
    pub fn new(clock_rate: u32, pool: BufferPool) -> Self {
        Self { clock_rate, pool, config: None }
    }

    pub const fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn config(&self) -> Option<AudioFrameConfig> {
        self.config.clone()
    }

    pub fn add_packet(
        &mut self,
        packet: &RtpPacket,
        deep_copy: bool,
        config_changed: &mut bool,
    ) -> Option<MediaFrame> {
        let payload = packet.payload.as_slice();
        if payload.is_empty() {
            tracing::debug!(ssrc = packet.ssrc, "dropping empty Opus payload");
            return None;
        }
        let toc = parse_toc(payload[0]);
        let channels = if toc.stereo { 2 } else { 1 };
        if self.config.as_ref().map(|config| config.channels) != Some(channels) {
            self.config =
                Some(AudioFrameConfig { channels, bits_per_sample: 16, codec_specific: None });
            *config_changed = true;
        }
        let payload = if deep_copy {
            Arc::new(self.pool.allocate_copy(payload))
        } else {
            packet.payload.clone()
        };
        Some(MediaFrame::audio(
            MimeType::Audio(AudioCodec::Opus),
            RtpTimestamp::new(packet.timestamp, self.clock_rate),
            payload,
            self.config.clone(),
        ))
    }
}
