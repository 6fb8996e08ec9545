// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! RTP payload to [`MediaFrame`] assembly.
//!
//! The codec set is finite and known, so dispatch is a tagged enum over
//! the per-codec implementations rather than a trait object.

pub mod opus;
pub mod vpx;

use lingokit_core::types::{AudioCodec, VideoCodec};
use lingokit_core::{AudioFrameConfig, BufferPool, MediaFrame, MimeType, RtpPacket, VideoFrameConfig};

pub use opus::{parse_toc, OpusDepacketizer, OpusFrameSize, OpusToc};
pub use vpx::VpxDepacketizer;

/// Per-stream depacketizer state.
pub enum Depacketizer {
    Opus(OpusDepacketizer),
    Vpx(VpxDepacketizer),
}

impl Depacketizer {
    /// Build a depacketizer for `mime`, or `None` for codecs the pipeline
    /// cannot assemble.
    pub fn new(mime: MimeType, clock_rate: u32, pool: BufferPool) -> Option<Self> {
        match mime {
            MimeType::Audio(AudioCodec::Opus) => {
                Some(Self::Opus(OpusDepacketizer::new(clock_rate, pool)))
            },
            MimeType::Video(codec @ (VideoCodec::Vp8 | VideoCodec::Vp9)) => {
                Some(Self::Vpx(VpxDepacketizer::new(codec, clock_rate, pool)))
            },
            MimeType::Audio(AudioCodec::Pcma | AudioCodec::Pcmu)
            | MimeType::Video(VideoCodec::H264 | VideoCodec::H265) => None,
        }
    }

    pub const fn mime(&self) -> MimeType {
        match self {
            Self::Opus(_) => MimeType::Audio(AudioCodec::Opus),
            Self::Vpx(vpx) => vpx.mime(),
        }
    }

    pub const fn clock_rate(&self) -> u32 {
        match self {
            Self::Opus(opus) => opus.clock_rate(),
            Self::Vpx(vpx) => vpx.clock_rate(),
        }
    }

    /// Feed one RTP packet.
    ///
    /// Returns a frame when one is completed by this packet.
    /// `config_changed` is raised when the codec configuration became
    /// known or changed; the caller pushes the fresh config downstream.
    /// `deep_copy` forces the payload into a pool-owned copy for frames
    /// that outlive the packet.
    pub fn add_packet(
        &mut self,
        packet: &RtpPacket,
        deep_copy: bool,
        config_changed: &mut bool,
    ) -> Option<MediaFrame> {
        match self {
            Self::Opus(opus) => opus.add_packet(packet, deep_copy, config_changed),
            Self::Vpx(vpx) => vpx.add_packet(packet, deep_copy, config_changed),
        }
    }

    pub fn audio_config(&self) -> Option<AudioFrameConfig> {
        match self {
            Self::Opus(opus) => opus.config(),
            Self::Vpx(_) => None,
        }
    }

    pub fn video_config(&self) -> Option<VideoFrameConfig> {
        match self {
            Self::Opus(_) => None,
            Self::Vpx(vpx) => vpx.config(),
        }
    }
}
