// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Fan-out of one producer's frame stream to container sinks.
//!
//! Every sink owns its own muxer, created lazily on the sink's first
//! frame, so a sink joining mid-stream receives a complete EBML header
//! and can decode from its first byte. Frames are handed to the shared
//! [`FrameWriterQueue`] so RTP ingress never blocks on muxing.

pub use crate::sink::MediaSink;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lingokit_core::{AudioFrameConfig, MediaFrame, MimeType, VideoFrameConfig};

use crate::webm::writer::WebmWriter;
use crate::writer_queue::{FrameWriterQueue, QueuedMediaWriter};

static NEXT_SERIALIZER_ID: AtomicU64 = AtomicU64::new(1);

/// Serializes one producer stream into per-sink WebM byte streams.
#[derive(Clone)]
pub struct MediaFrameSerializer {
    inner: Arc<SerializerInner>,
}

struct SinkWriter {
    muxer: Option<WebmWriter>,
    active_audio: Option<AudioFrameConfig>,
    active_video: Option<VideoFrameConfig>,
    pending_audio: Option<AudioFrameConfig>,
    pending_video: Option<VideoFrameConfig>,
    last_timestamp: Option<u32>,
    offset_ns: u64,
}

struct SinkEntry {
    sink: Arc<dyn MediaSink>,
    writer: SinkWriter,
}

struct SerializerInner {
    id: u64,
    mime: MimeType,
    clock_rate: u32,
    paused: AtomicBool,
    audio_config: Mutex<Option<AudioFrameConfig>>,
    video_config: Mutex<Option<VideoFrameConfig>>,
    entries: Mutex<Vec<SinkEntry>>,
    sink_count: AtomicUsize,
    queue: FrameWriterQueue,
}

impl MediaFrameSerializer {
    /// Create a serializer writing through the process-wide queue.
    pub fn new(mime: MimeType, clock_rate: u32) -> Self {
        Self::with_queue(mime, clock_rate, FrameWriterQueue::global().clone())
    }

    /// Create a serializer bound to a specific queue (used by tests).
    pub fn with_queue(mime: MimeType, clock_rate: u32, queue: FrameWriterQueue) -> Self {
        Self {
            inner: Arc::new(SerializerInner {
                id: NEXT_SERIALIZER_ID.fetch_add(1, Ordering::Relaxed),
                mime,
                clock_rate,
                paused: AtomicBool::new(false),
                audio_config: Mutex::new(None),
                video_config: Mutex::new(None),
                entries: Mutex::new(Vec::new()),
                sink_count: AtomicUsize::new(0),
                queue,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn mime(&self) -> MimeType {
        self.inner.mime
    }

    pub fn clock_rate(&self) -> u32 {
        self.inner.clock_rate
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    pub fn has_sinks(&self) -> bool {
        self.inner.sink_count.load(Ordering::Acquire) > 0
    }

    /// Attach a sink. Returns false when the same sink is already
    /// attached. The first sink starts the writer queue registration.
    pub fn add_sink(&self, sink: Arc<dyn MediaSink>) -> bool {
        let first = {
            let Ok(mut entries) = self.inner.entries.lock() else { return false };
            if entries.iter().any(|entry| Arc::ptr_eq(&entry.sink, &sink)) {
                return false;
            }
            let pending_audio = self.inner.audio_config.lock().ok().and_then(|c| c.clone());
            let pending_video = self.inner.video_config.lock().ok().and_then(|c| c.clone());
            entries.push(SinkEntry {
                sink,
                writer: SinkWriter {
                    muxer: None,
                    active_audio: None,
                    active_video: None,
                    pending_audio,
                    pending_video,
                    last_timestamp: None,
                    offset_ns: 0,
                },
            });
            self.inner.sink_count.store(entries.len(), Ordering::Release);
            entries.len() == 1
        };
        if first {
            let writer: Arc<dyn QueuedMediaWriter> = self.inner.clone();
            self.inner.queue.register(&writer);
        }
        true
    }

    /// Detach a sink, finalizing its container stream.
    pub fn remove_sink(&self, sink: &Arc<dyn MediaSink>) -> bool {
        let (removed, empty) = {
            let Ok(mut entries) = self.inner.entries.lock() else { return false };
            let before = entries.len();
            entries.retain(|entry| !Arc::ptr_eq(&entry.sink, sink));
            self.inner.sink_count.store(entries.len(), Ordering::Release);
            (entries.len() != before, entries.is_empty())
        };
        if removed && empty {
            self.inner.queue.unregister(self.inner.id);
        }
        removed
    }

    pub fn remove_all_sinks(&self) {
        let had_sinks = {
            let Ok(mut entries) = self.inner.entries.lock() else { return };
            let had_sinks = !entries.is_empty();
            entries.clear();
            self.inner.sink_count.store(0, Ordering::Release);
            had_sinks
        };
        if had_sinks {
            self.inner.queue.unregister(self.inner.id);
        }
    }

    /// Push a fresh audio config; applied to each sink before its next
    /// frame.
    pub fn set_audio_config(&self, config: AudioFrameConfig) {
        if let Ok(mut stored) = self.inner.audio_config.lock() {
            *stored = Some(config.clone());
        }
        if let Ok(mut entries) = self.inner.entries.lock() {
            for entry in entries.iter_mut() {
                entry.writer.pending_audio = Some(config.clone());
            }
        }
    }

    pub fn set_video_config(&self, config: VideoFrameConfig) {
        if let Ok(mut stored) = self.inner.video_config.lock() {
            *stored = Some(config.clone());
        }
        if let Ok(mut entries) = self.inner.entries.lock() {
            for entry in entries.iter_mut() {
                entry.writer.pending_video = Some(config.clone());
            }
        }
    }

    /// Enqueue a frame for all sinks. A paused or sink-less serializer
    /// treats this as a no-op (and emits no catch-up frames on resume).
    pub fn write(&self, frame: MediaFrame) -> bool {
        if self.is_paused() || !self.has_sinks() {
            return false;
        }
        self.inner.queue.write(self.inner.id, frame)
    }
}

impl Drop for MediaFrameSerializer {
    fn drop(&mut self) {
        // last clone going away unregisters from the queue
        if Arc::strong_count(&self.inner) == 1 {
            self.inner.queue.unregister(self.inner.id);
        }
    }
}

impl QueuedMediaWriter for SerializerInner {
    fn id(&self) -> u64 {
        self.id
    }

    fn write_queued_frame(&self, frame: MediaFrame) {
        if self.paused.load(Ordering::Acquire) {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else { return };
        for entry in entries.iter_mut() {
            entry.writer.write(&frame, &entry.sink, self);
        }
    }
}

impl SinkWriter {
    fn write(&mut self, frame: &MediaFrame, sink: &Arc<dyn MediaSink>, owner: &SerializerInner) {
        let ticks = frame.timestamp.ticks();
        match self.last_timestamp {
            Some(last) if ticks < last => {
                tracing::trace!(serializer = owner.id, ticks, "skipping late frame");
                return;
            },
            Some(last) if ticks > last => {
                let delta = u64::from(ticks - last);
                self.offset_ns += delta.saturating_mul(1_000_000_000)
                    / u64::from(owner.clock_rate.max(1));
                self.last_timestamp = Some(ticks);
            },
            Some(_) => {},
            None => self.last_timestamp = Some(ticks),
        }

        self.apply_pending_config(frame, sink, owner);
        let Some(muxer) = self.muxer.as_mut() else { return };
        match muxer.add_frame(frame.payload.as_slice(), self.offset_ns, frame.key_frame) {
            Ok(true) => {},
            Ok(false) => {
                tracing::trace!(serializer = owner.id, "muxer dropped an out-of-order frame");
            },
            Err(e) => {
                tracing::warn!(serializer = owner.id, error = %e, "muxer rejected a frame");
            },
        }
    }

    fn apply_pending_config(
        &mut self,
        frame: &MediaFrame,
        sink: &Arc<dyn MediaSink>,
        owner: &SerializerInner,
    ) {
        if owner.mime.is_audio() {
            let incoming = self
                .pending_audio
                .take()
                .or_else(|| frame.audio_config.clone())
                .or_else(|| self.active_audio.clone())
                .unwrap_or_default();
            if self.muxer.is_some() && self.active_audio.as_ref() == Some(&incoming) {
                return;
            }
            if self.muxer.is_some() {
                // settings changed mid-stream: finish the segment and start
                // a fresh one so the sink sees a consistent header
                tracing::debug!(serializer = owner.id, "audio config changed, restarting segment");
                self.muxer = None;
            }
            match WebmWriter::audio(sink.clone(), owner.id, owner.mime, owner.clock_rate, &incoming)
            {
                Ok(muxer) => {
                    self.muxer = Some(muxer);
                    self.active_audio = Some(incoming);
                },
                Err(e) => {
                    tracing::warn!(serializer = owner.id, error = %e, "cannot start WebM segment");
                },
            }
        } else {
            let incoming = self
                .pending_video
                .take()
                .or_else(|| frame.video_config.clone())
                .or_else(|| self.active_video.clone())
                .unwrap_or_default();
            if self.muxer.is_some() && self.active_video.as_ref() == Some(&incoming) {
                return;
            }
            if !incoming.has_resolution() {
                // cannot declare a video track yet; wait for a key frame
                return;
            }
            if self.muxer.is_some() {
                tracing::debug!(serializer = owner.id, "video config changed, restarting segment");
                self.muxer = None;
            }
            match WebmWriter::video(sink.clone(), owner.id, owner.mime, &incoming) {
                Ok(muxer) => {
                    self.muxer = Some(muxer);
                    self.active_video = Some(incoming);
                },
                Err(e) => {
                    tracing::warn!(serializer = owner.id, error = %e, "cannot start WebM segment");
                },
            }
        }
    }
}
