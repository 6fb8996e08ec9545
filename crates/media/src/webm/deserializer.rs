// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Pull parser for translated WebM fragments.
//!
//! Each fragment arriving from the service is a self-contained byte
//! stream: EBML header, Segment, tracks, clusters. The parser runs over
//! an in-memory unseekable source and yields frames in decode order with
//! their offset from the start of the fragment.

use std::io::Cursor;

use lingokit_core::error::{LingoKitError, Result};
use lingokit_core::types::AudioCodec;
use lingokit_core::{AudioFrameConfig, Buffer, MimeType};
use symphonia::core::codecs::CODEC_TYPE_OPUS;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Track};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions, ReadOnlySource};
use symphonia::core::units::TimeBase;
use symphonia::default::formats::MkvReader;

/// Metadata of one readable track in a fragment.
#[derive(Debug, Clone)]
pub struct WebmTrackInfo {
    pub track_id: u32,
    pub mime: MimeType,
    pub sample_rate: Option<u32>,
    pub audio_config: Option<AudioFrameConfig>,
    time_base: Option<TimeBase>,
}

/// One frame recovered from a fragment.
#[derive(Debug)]
pub struct DeserializedFrame {
    pub payload: Vec<u8>,
    /// Offset from the first frame of the fragment.
    pub timestamp_offset_ns: u64,
}

/// Parser state over one media fragment.
pub struct WebmDeserializer {
    reader: MkvReader,
    tracks: Vec<WebmTrackInfo>,
    first_timestamp_ns: Option<u64>,
}

impl WebmDeserializer {
    /// Probe the fragment header and enumerate supported tracks.
    pub fn parse(media: &[u8]) -> Result<Self> {
        let source = ReadOnlySource::new(Cursor::new(media.to_vec()));
        let stream =
            MediaSourceStream::new(Box::new(source), MediaSourceStreamOptions::default());
        let reader = MkvReader::try_new(stream, &FormatOptions::default())
            .map_err(|e| LingoKitError::Container(format!("failed to open WebM fragment: {e}")))?;
        let tracks: Vec<_> = reader.tracks().iter().filter_map(map_track).collect();
        if tracks.is_empty() {
            return Err(LingoKitError::Container(
                "fragment contains no supported tracks".to_string(),
            ));
        }
        Ok(Self { reader, tracks, first_timestamp_ns: None })
    }

    pub fn tracks(&self) -> &[WebmTrackInfo] {
        &self.tracks
    }

    /// Pick the track matching `mime`, falling back to the first one.
    pub fn select_track(&self, mime: MimeType) -> Option<&WebmTrackInfo> {
        self.tracks.iter().find(|track| track.mime == mime).or_else(|| self.tracks.first())
    }

    /// Next frame of `track_id` in decode order; `None` at end of
    /// fragment. Mid-stream parse errors surface as container errors.
    pub fn next_frame(&mut self, track_id: u32) -> Result<Option<DeserializedFrame>> {
        let time_base = self
            .tracks
            .iter()
            .find(|track| track.track_id == track_id)
            .and_then(|track| track.time_base);
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None)
                },
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => {
                    return Err(LingoKitError::Container(format!(
                        "failed to read WebM fragment: {e}"
                    )))
                },
            };
            if packet.track_id() != track_id {
                continue;
            }
            let timestamp_ns = ticks_to_nanos(packet.ts(), time_base);
            let base = *self.first_timestamp_ns.get_or_insert(timestamp_ns);
            return Ok(Some(DeserializedFrame {
                payload: Vec::from(packet.data),
                timestamp_offset_ns: timestamp_ns.saturating_sub(base),
            }));
        }
    }
}

fn ticks_to_nanos(ts: u64, time_base: Option<TimeBase>) -> u64 {
    // Matroska block times default to milliseconds
    let time_base = time_base.unwrap_or_else(|| TimeBase::new(1, 1000));
    let time = time_base.calc_time(ts);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let frac_ns = (time.frac * 1_000_000_000.0) as u64;
    time.seconds.saturating_mul(1_000_000_000).saturating_add(frac_ns)
}

fn map_track(track: &Track) -> Option<WebmTrackInfo> {
    let params = &track.codec_params;
    let mime = if params.codec == CODEC_TYPE_OPUS {
        MimeType::Audio(AudioCodec::Opus)
    } else {
        tracing::warn!(track_id = track.id, codec = ?params.codec,
            "skipping WebM track with unsupported codec");
        return None;
    };
    let audio_config = mime.is_audio().then(|| {
        let channels = params.channels.map_or(0, |channels| channels.count());
        #[allow(clippy::cast_possible_truncation)]
        let channels = channels.min(usize::from(u8::MAX)) as u8;
        #[allow(clippy::cast_possible_truncation)]
        let bits_per_sample =
            params.bits_per_sample.unwrap_or(0).min(u32::from(u8::MAX)) as u8;
        AudioFrameConfig {
            channels,
            bits_per_sample,
            codec_specific: params
                .extra_data
                .as_ref()
                .map(|extra| std::sync::Arc::new(Buffer::from_vec(extra.to_vec()))),
        }
    });
    Some(WebmTrackInfo {
        track_id: track.id,
        mime,
        sample_rate: params.sample_rate,
        audio_config,
        time_base: params.time_base,
    })
}
