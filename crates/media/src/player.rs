// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Plays translated container fragments back out as timed RTP packets.
//!
//! Fragments for one `(ssrc, source)` pair are serialized through the
//! player's timer thread, one buffer at a time: every fragment is fully
//! demuxed in decode order before the next one starts. Each fragment gets
//! a process-unique media id bracketed by started/finished callbacks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use lingokit_core::{
    Buffer, MediaTimer, MimeType, RtpTimestamp, RtpTranslatedPacket, TimerCallback,
};

use crate::webm::deserializer::WebmDeserializer;

static NEXT_MEDIA_ID: AtomicU64 = AtomicU64::new(1);

/// Receiver of playback progress for one stream.
pub trait PlayerCallback: Send + Sync {
    fn on_play_started(&self, media_id: u64, source_id: u64, ssrc: u32);

    /// One call per decoded frame, in decode order, carrying the offset
    /// timestamp from the start of this media fragment.
    fn on_play(&self, media_id: u64, source_id: u64, packet: RtpTranslatedPacket);

    fn on_play_finished(&self, media_id: u64, source_id: u64, ssrc: u32);
}

struct PendingMedia {
    source_id: u64,
    media_id: u64,
    media: Arc<Buffer>,
}

struct StreamQueue {
    ssrc: u32,
    clock_rate: u32,
    payload_type: u8,
    mime: MimeType,
    callback: Weak<dyn PlayerCallback>,
    pending: Mutex<VecDeque<PendingMedia>>,
}

impl StreamQueue {
    fn play_media(&self, entry: &PendingMedia) {
        let Some(callback) = self.callback.upgrade() else { return };
        let media_id = entry.media_id;
        let source_id = entry.source_id;

        let mut deserializer = match WebmDeserializer::parse(entry.media.as_slice()) {
            Ok(deserializer) => deserializer,
            Err(e) => {
                tracing::warn!(ssrc = self.ssrc, media_id, error = %e,
                    "failed to parse translated fragment");
                // the fragment is finished as far as the consumers side is
                // concerned; the stream itself stays alive
                callback.on_play_finished(media_id, source_id, self.ssrc);
                return;
            },
        };
        let Some(track) = deserializer.select_track(self.mime) else {
            callback.on_play_finished(media_id, source_id, self.ssrc);
            return;
        };
        let track_id = track.track_id;
        let track_mime = track.mime;

        callback.on_play_started(media_id, source_id, self.ssrc);
        loop {
            match deserializer.next_frame(track_id) {
                Ok(Some(frame)) => {
                    let offset =
                        RtpTimestamp::ticks_from_nanos(frame.timestamp_offset_ns, self.clock_rate);
                    let mut packet = RtpTranslatedPacket::new(
                        track_mime,
                        offset,
                        Arc::new(Buffer::from_vec(frame.payload)),
                    );
                    packet.set_ssrc(self.ssrc);
                    packet.set_payload_type(self.payload_type);
                    callback.on_play(media_id, source_id, packet);
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(ssrc = self.ssrc, media_id, error = %e,
                        "translated fragment ended with a parse error");
                    break;
                },
            }
        }
        callback.on_play_finished(media_id, source_id, self.ssrc);
    }
}

impl TimerCallback for StreamQueue {
    fn on_timer(&self, _timer_id: u64) {
        loop {
            let entry = {
                let Ok(mut pending) = self.pending.lock() else { return };
                pending.pop_front()
            };
            let Some(entry) = entry else { break };
            self.play_media(&entry);
        }
    }
}

/// Per-worker playback scheduler for translated fragments.
pub struct RtpPacketsPlayer {
    timer: Arc<MediaTimer>,
    streams: Mutex<HashMap<u32, Arc<StreamQueue>>>,
}

impl Default for RtpPacketsPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RtpPacketsPlayer {
    pub fn new() -> Self {
        Self {
            timer: Arc::new(MediaTimer::new("rtp-player")),
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// The timer shared with collaborators that need the same thread
    /// (file endpoints, pool GC).
    pub fn timer(&self) -> Arc<MediaTimer> {
        self.timer.clone()
    }

    /// Register a playback stream for `ssrc`.
    pub fn add_stream(
        &self,
        ssrc: u32,
        clock_rate: u32,
        payload_type: u8,
        mime: MimeType,
        callback: Weak<dyn PlayerCallback>,
    ) {
        if !mime.is_audio() {
            tracing::warn!(ssrc, %mime, "packet playback supports audio streams only");
            return;
        }
        let Ok(mut streams) = self.streams.lock() else { return };
        streams.entry(ssrc).or_insert_with(|| {
            Arc::new(StreamQueue {
                ssrc,
                clock_rate,
                payload_type,
                mime,
                callback,
                pending: Mutex::new(VecDeque::new()),
            })
        });
    }

    pub fn remove_stream(&self, ssrc: u32) {
        if let Ok(mut streams) = self.streams.lock() {
            streams.remove(&ssrc);
        }
    }

    /// Queue a translated fragment received from `source_id` (endpoint id)
    /// for playback on `ssrc`. Returns the assigned media id, or 0 when the
    /// stream is unknown or the fragment is empty.
    pub fn play(&self, ssrc: u32, source_id: u64, media: Arc<Buffer>) -> u64 {
        if media.is_empty() {
            return 0;
        }
        let stream = {
            let Ok(streams) = self.streams.lock() else { return 0 };
            streams.get(&ssrc).cloned()
        };
        let Some(stream) = stream else {
            tracing::debug!(ssrc, "dropping fragment for unknown stream");
            return 0;
        };
        let media_id = NEXT_MEDIA_ID.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut pending) = stream.pending.lock() {
            pending.push_back(PendingMedia { source_id, media_id, media });
        }
        // hop onto the timer thread; fragments play there one at a time
        self.timer.singleshot_callback(Duration::ZERO, stream);
        media_id
    }

    /// Drop any queued fragments from `source_id` for `ssrc`.
    pub fn stop(&self, ssrc: u32, source_id: u64) {
        let stream = {
            let Ok(streams) = self.streams.lock() else { return };
            streams.get(&ssrc).cloned()
        };
        if let Some(stream) = stream {
            if let Ok(mut pending) = stream.pending.lock() {
                pending.retain(|entry| entry.source_id != source_id);
            }
        }
    }
}
