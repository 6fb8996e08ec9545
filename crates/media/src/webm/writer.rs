// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Live-mode WebM muxer writing into an in-memory stream buffer.
//!
//! The writer declares its single track up-front and then only appends
//! frames; live mode means forward-only output with no cues and no
//! duration, so every accepted frame can be drained to the sink
//! immediately. A sink attached to a fresh writer receives a full EBML
//! header before the first SimpleBlock.

use std::io::{Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use lingokit_core::error::{LingoKitError, Result};
use lingokit_core::types::{AudioCodec, VideoCodec};
use lingokit_core::{AudioFrameConfig, Buffer, MimeType, VideoFrameConfig};
use webm::mux::{AudioCodecId, Segment, SegmentBuilder, SegmentMode, VideoCodecId, Writer};

use crate::sink::MediaSink;

/// Opus codec lookahead at 48kHz in samples (typical libopus default).
///
/// Written to the OpusHead `pre_skip` field so decoders can trim encoder
/// delay.
const OPUS_PRESKIP_SAMPLES: u16 = 312;

// OpusHead layout: https://wiki.xiph.org/OggOpus#ID_Header
// Matroska CodecPrivate uses the same bytes as Ogg.
fn opus_head_codec_private(sample_rate: u32, channels: u8) -> Result<[u8; 19]> {
    if !(channels == 1 || channels == 2) {
        return Err(LingoKitError::Codec(format!(
            "Unsupported channel count for OpusHead mapping family 0: {channels}"
        )));
    }
    let mut head = [0u8; 19];
    head[0..8].copy_from_slice(b"OpusHead");
    head[8] = 1; // version
    head[9] = channels;
    head[10..12].copy_from_slice(&OPUS_PRESKIP_SAMPLES.to_le_bytes());
    head[12..16].copy_from_slice(&sample_rate.to_le_bytes());
    head[16..18].copy_from_slice(&0i16.to_le_bytes()); // output gain
    head[18] = 0; // channel mapping family 0 (mono/stereo)
    Ok(head)
}

#[derive(Default)]
struct StreamBufferState {
    data: Vec<u8>,
    base_offset: usize,
}

/// Append-only shared buffer behind the muxer.
///
/// Bytes are drained by moving the backing vector out, so long sessions
/// stay memory-bounded; the writer never seeks backwards in live mode.
#[derive(Clone, Default)]
struct SharedStreamBuffer {
    inner: Arc<Mutex<StreamBufferState>>,
}

impl SharedStreamBuffer {
    fn take_data(&self) -> Option<Vec<u8>> {
        let Ok(mut state) = self.inner.lock() else { return None };
        if state.data.is_empty() {
            return None;
        }
        let drained = std::mem::take(&mut state.data);
        state.base_offset += drained.len();
        Some(drained)
    }
}

impl Write for SharedStreamBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| std::io::Error::other("stream buffer mutex poisoned"))?;
        state.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for SharedStreamBuffer {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let state = self
            .inner
            .lock()
            .map_err(|_| std::io::Error::other("stream buffer mutex poisoned"))?;
        let end = (state.base_offset + state.data.len()) as u64;
        match pos {
            // position queries only; the live writer is forward-only
            SeekFrom::Current(0) | SeekFrom::End(0) => Ok(end),
            SeekFrom::Start(offset) if offset == end => Ok(end),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "stream buffer is forward-only",
            )),
        }
    }
}

enum TrackHandle {
    Audio(webm::mux::AudioTrack),
    Video(webm::mux::VideoTrack),
}

/// Single-track live WebM writer bound to one [`MediaSink`].
pub struct WebmWriter {
    segment: Option<Segment<SharedStreamBuffer>>,
    track: TrackHandle,
    shared: SharedStreamBuffer,
    sink: Arc<dyn MediaSink>,
    sender_id: u64,
    last_timestamp_ns: Option<u64>,
    started: bool,
}

impl WebmWriter {
    /// Build an audio writer. The track settings come from `config`; a
    /// missing codec-private blob is synthesized for Opus.
    pub fn audio(
        sink: Arc<dyn MediaSink>,
        sender_id: u64,
        mime: MimeType,
        sample_rate: u32,
        config: &AudioFrameConfig,
    ) -> Result<Self> {
        let MimeType::Audio(codec) = mime else {
            return Err(LingoKitError::Container(format!("{mime} is not an audio codec")));
        };
        let codec_id = match codec {
            AudioCodec::Opus => AudioCodecId::Opus,
            AudioCodec::Pcma | AudioCodec::Pcmu => {
                return Err(LingoKitError::Container(format!(
                    "{mime} has no WebM mapping in the mux backend"
                )))
            },
        };
        let channels = u32::from(config.channels.max(1));

        let shared = SharedStreamBuffer::default();
        let writer = Writer::new_non_seek(shared.clone());
        let builder = SegmentBuilder::new(writer)
            .map_err(|e| LingoKitError::Container(format!("failed to create segment: {e}")))?
            .set_mode(SegmentMode::Live)
            .map_err(|e| LingoKitError::Container(format!("failed to set live mode: {e}")))?;
        let (builder, track) = builder
            .add_audio_track(sample_rate, channels, codec_id, None)
            .map_err(|e| LingoKitError::Container(format!("failed to add audio track: {e}")))?;

        let synthesized;
        let codec_private: Option<&[u8]> = match config.codec_specific.as_ref() {
            Some(specific) => Some(specific.as_slice()),
            None if codec == AudioCodec::Opus => {
                synthesized = opus_head_codec_private(sample_rate, config.channels.max(1))?;
                Some(&synthesized)
            },
            None => None,
        };
        let builder = match codec_private {
            Some(private) => builder.set_codec_private(track, private).map_err(|e| {
                LingoKitError::Container(format!("failed to set codec private: {e}"))
            })?,
            None => builder,
        };

        Ok(Self {
            segment: Some(builder.build()),
            track: TrackHandle::Audio(track),
            shared,
            sink,
            sender_id,
            last_timestamp_ns: None,
            started: false,
        })
    }

    /// Build a video writer for VP8/VP9.
    pub fn video(
        sink: Arc<dyn MediaSink>,
        sender_id: u64,
        mime: MimeType,
        config: &VideoFrameConfig,
    ) -> Result<Self> {
        let MimeType::Video(codec) = mime else {
            return Err(LingoKitError::Container(format!("{mime} is not a video codec")));
        };
        let codec_id = match codec {
            VideoCodec::Vp8 => VideoCodecId::VP8,
            VideoCodec::Vp9 => VideoCodecId::VP9,
            VideoCodec::H264 | VideoCodec::H265 => {
                return Err(LingoKitError::Container(format!(
                    "{mime} has no WebM mapping in the mux backend"
                )))
            },
        };
        if !config.has_resolution() {
            return Err(LingoKitError::Container(
                "video track needs a resolution before muxing".to_string(),
            ));
        }

        let shared = SharedStreamBuffer::default();
        let writer = Writer::new_non_seek(shared.clone());
        let builder = SegmentBuilder::new(writer)
            .map_err(|e| LingoKitError::Container(format!("failed to create segment: {e}")))?
            .set_mode(SegmentMode::Live)
            .map_err(|e| LingoKitError::Container(format!("failed to set live mode: {e}")))?;
        let (builder, track) = builder
            .add_video_track(u32::from(config.width), u32::from(config.height), codec_id, None)
            .map_err(|e| LingoKitError::Container(format!("failed to add video track: {e}")))?;
        let builder = match config.codec_specific.as_ref() {
            Some(specific) => {
                builder.set_codec_private(track, specific.as_slice()).map_err(|e| {
                    LingoKitError::Container(format!("failed to set codec private: {e}"))
                })?
            },
            None => builder,
        };

        Ok(Self {
            segment: Some(builder.build()),
            track: TrackHandle::Video(track),
            shared,
            sink,
            sender_id,
            last_timestamp_ns: None,
            started: false,
        })
    }

    /// Append one frame at the given container timestamp.
    ///
    /// Returns `Ok(false)` when the frame is older than the last accepted
    /// timestamp for the track (dropped, stream continues).
    pub fn add_frame(&mut self, payload: &[u8], timestamp_ns: u64, key_frame: bool) -> Result<bool> {
        if self.last_timestamp_ns.is_some_and(|last| timestamp_ns < last) {
            tracing::debug!(
                sender_id = self.sender_id,
                timestamp_ns,
                "dropping out-of-order container frame"
            );
            return Ok(false);
        }
        let Some(segment) = self.segment.as_mut() else {
            return Err(LingoKitError::Container("writer already finalized".to_string()));
        };
        let result = match self.track {
            // audio frames are always key frames
            TrackHandle::Audio(track) => segment.add_frame(track, payload, timestamp_ns, true),
            TrackHandle::Video(track) => segment.add_frame(track, payload, timestamp_ns, key_frame),
        };
        result
            .map_err(|e| LingoKitError::Container(format!("failed to add frame to segment: {e}")))?;
        self.last_timestamp_ns = Some(timestamp_ns);
        self.drain_to_sink();
        Ok(true)
    }

    /// Flush the segment trailer and notify the sink.
    ///
    /// Called automatically on drop; safe to call twice.
    pub fn finalize(&mut self) {
        if let Some(segment) = self.segment.take() {
            if segment.finalize(None).is_err() {
                tracing::warn!(sender_id = self.sender_id, "failed to finalize WebM segment");
            }
            self.drain_to_sink();
            if self.started {
                self.sink.end_media_writing(self.sender_id);
            }
        }
    }

    fn drain_to_sink(&mut self) {
        if let Some(bytes) = self.shared.take_data() {
            if !self.started {
                self.sink.start_media_writing(self.sender_id);
                self.started = true;
            }
            self.sink.write_media_payload(self.sender_id, Arc::new(Buffer::from_vec(bytes)));
        }
    }
}

impl Drop for WebmWriter {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        started: Mutex<Vec<u64>>,
        ended: Mutex<Vec<u64>>,
        bytes: Mutex<Vec<u8>>,
    }

    impl MediaSink for CollectingSink {
        fn start_media_writing(&self, sender_id: u64) {
            self.started.lock().unwrap().push(sender_id);
        }

        fn write_media_payload(&self, _sender_id: u64, payload: Arc<Buffer>) {
            self.bytes.lock().unwrap().extend_from_slice(payload.as_slice());
        }

        fn end_media_writing(&self, sender_id: u64) {
            self.ended.lock().unwrap().push(sender_id);
        }
    }

    fn opus_writer(sink: Arc<CollectingSink>) -> WebmWriter {
        let config = AudioFrameConfig { channels: 2, bits_per_sample: 16, codec_specific: None };
        WebmWriter::audio(
            sink,
            7,
            MimeType::Audio(AudioCodec::Opus),
            48_000,
            &config,
        )
        .unwrap()
    }

    #[test]
    fn stream_starts_with_ebml_header() {
        let sink = Arc::new(CollectingSink::default());
        let mut writer = opus_writer(sink.clone());
        assert!(writer.add_frame(&[0xFC, 0x01], 0, true).unwrap());
        writer.finalize();

        let bytes = sink.bytes.lock().unwrap();
        // EBML magic
        assert_eq!(&bytes[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        assert_eq!(*sink.started.lock().unwrap(), [7]);
        assert_eq!(*sink.ended.lock().unwrap(), [7]);
    }

    #[test]
    fn out_of_order_frames_are_dropped() {
        let sink = Arc::new(CollectingSink::default());
        let mut writer = opus_writer(sink);
        assert!(writer.add_frame(&[0xFC, 0x01], 20_000_000, true).unwrap());
        assert!(!writer.add_frame(&[0xFC, 0x02], 10_000_000, true).unwrap());
        assert!(writer.add_frame(&[0xFC, 0x03], 20_000_000, true).unwrap());
    }

    #[test]
    fn pcm_codecs_are_rejected_by_the_backend() {
        let sink: Arc<dyn MediaSink> = Arc::new(CollectingSink::default());
        let config = AudioFrameConfig::default();
        let result =
            WebmWriter::audio(sink, 1, MimeType::Audio(AudioCodec::Pcma), 8_000, &config);
        assert!(result.is_err());
    }

    #[test]
    fn opus_head_is_well_formed() {
        let head = opus_head_codec_private(48_000, 2).unwrap();
        assert_eq!(&head[..8], b"OpusHead");
        assert_eq!(head[9], 2);
        assert!(opus_head_codec_private(48_000, 3).is_err());
    }
}
