// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Frame-level data types that flow between the depacketizers, the
//! container writers and the packets player.

use std::sync::Arc;

use crate::pool::Buffer;

/// Audio codecs the pipeline can carry (passthrough, no transcoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Opus,
    Pcma,
    Pcmu,
}

/// Video codecs the pipeline can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    Vp8,
    Vp9,
    H264,
    H265,
}

/// Codec identity of a stream.
///
/// Codec dispatch is a single table: every mapping below routes audio and
/// video through the same explicit match, there is no shared fallthrough
/// path between the two kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MimeType {
    Audio(AudioCodec),
    Video(VideoCodec),
}

impl MimeType {
    pub const fn is_audio(self) -> bool {
        matches!(self, Self::Audio(_))
    }

    /// Matroska codec id for this codec.
    pub const fn matroska_codec_id(self) -> &'static str {
        match self {
            Self::Audio(AudioCodec::Opus) => "A_OPUS",
            Self::Audio(AudioCodec::Pcma | AudioCodec::Pcmu) => "A_PCM/FLOAT/IEEE",
            Self::Video(VideoCodec::Vp8) => "V_VP8",
            Self::Video(VideoCodec::Vp9) => "V_VP9",
            Self::Video(VideoCodec::H264) => "V_MPEG4/ISO/AVC",
            Self::Video(VideoCodec::H265) => "V_MPEGH/ISO/HEVC",
        }
    }

    /// Reverse lookup from a Matroska codec id.
    ///
    /// `A_PCM/FLOAT/IEEE` is shared by both G.711 variants and resolves to
    /// PCMA.
    pub fn from_matroska_codec_id(codec_id: &str) -> Option<Self> {
        match codec_id {
            "A_OPUS" => Some(Self::Audio(AudioCodec::Opus)),
            "A_PCM/FLOAT/IEEE" => Some(Self::Audio(AudioCodec::Pcma)),
            "V_VP8" => Some(Self::Video(VideoCodec::Vp8)),
            "V_VP9" => Some(Self::Video(VideoCodec::Vp9)),
            "V_MPEG4/ISO/AVC" => Some(Self::Video(VideoCodec::H264)),
            "V_MPEGH/ISO/HEVC" => Some(Self::Video(VideoCodec::H265)),
            _ => None,
        }
    }
}

impl std::fmt::Display for MimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Audio(AudioCodec::Opus) => "audio/opus",
            Self::Audio(AudioCodec::Pcma) => "audio/PCMA",
            Self::Audio(AudioCodec::Pcmu) => "audio/PCMU",
            Self::Video(VideoCodec::Vp8) => "video/VP8",
            Self::Video(VideoCodec::Vp9) => "video/VP9",
            Self::Video(VideoCodec::H264) => "video/H264",
            Self::Video(VideoCodec::H265) => "video/H265",
        };
        f.write_str(text)
    }
}

/// An RTP timestamp value bound to its clock rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpTimestamp {
    ticks: u32,
    clock_rate: u32,
}

impl RtpTimestamp {
    pub const fn new(ticks: u32, clock_rate: u32) -> Self {
        Self { ticks, clock_rate }
    }

    pub const fn ticks(self) -> u32 {
        self.ticks
    }

    pub const fn clock_rate(self) -> u32 {
        self.clock_rate
    }

    /// Position on the container timeline in nanoseconds.
    pub const fn as_nanos(self) -> u64 {
        if self.clock_rate == 0 {
            return 0;
        }
        (self.ticks as u64).saturating_mul(1_000_000_000) / self.clock_rate as u64
    }

    /// RTP ticks for a nanosecond position at `clock_rate`.
    #[allow(clippy::cast_possible_truncation)] // tick values wrap by contract
    pub const fn ticks_from_nanos(nanos: u64, clock_rate: u32) -> u32 {
        (nanos.saturating_mul(clock_rate as u64) / 1_000_000_000) as u32
    }
}

/// Per-stream audio settings parsed by a depacketizer or a demuxer.
///
/// Equality is structural, including the codec-specific bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioFrameConfig {
    pub channels: u8,
    pub bits_per_sample: u8,
    pub codec_specific: Option<Arc<Buffer>>,
}

/// Per-stream video settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFrameConfig {
    pub width: u16,
    pub height: u16,
    pub frame_rate: f64,
    pub codec_specific: Option<Arc<Buffer>>,
}

impl VideoFrameConfig {
    pub fn has_resolution(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Immutable media unit produced by a depacketizer (or recovered by the
/// container demuxer).
///
/// The payload is shared: fan-out along the pipeline clones the `Arc`, not
/// the bytes.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub mime: MimeType,
    /// Vacuously true for audio.
    pub key_frame: bool,
    pub timestamp: RtpTimestamp,
    pub payload: Arc<Buffer>,
    pub audio_config: Option<AudioFrameConfig>,
    pub video_config: Option<VideoFrameConfig>,
}

impl MediaFrame {
    pub fn audio(
        mime: MimeType,
        timestamp: RtpTimestamp,
        payload: Arc<Buffer>,
        config: Option<AudioFrameConfig>,
    ) -> Self {
        debug_assert!(mime.is_audio());
        Self { mime, key_frame: true, timestamp, payload, audio_config: config, video_config: None }
    }

    pub fn video(
        mime: MimeType,
        key_frame: bool,
        timestamp: RtpTimestamp,
        payload: Arc<Buffer>,
        config: Option<VideoFrameConfig>,
    ) -> Self {
        debug_assert!(!mime.is_audio());
        Self { mime, key_frame, timestamp, payload, audio_config: None, video_config: config }
    }

    pub const fn is_audio(&self) -> bool {
        self.mime.is_audio()
    }
}
