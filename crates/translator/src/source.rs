// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-SSRC pipeline glue: depacketizer, serializer, consumer matching
//! and the playback path for translated fragments.

use std::sync::{Arc, Mutex, Weak};

use lingokit_core::{
    Buffer, BufferPool, MimeType, RtpPacket, RtpPacketsCollector, RtpTranslatedPacket,
};
use lingokit_media::depacketizer::Depacketizer;
use lingokit_media::{FileSink, MediaFrameSerializer, MediaSink, PlayerCallback, RtpPacketsPlayer};

use crate::consumers::{ConsumersManager, ConsumerTranslator};
use crate::endpoint::{EndpointSink, TranslatorEndPointFactory};
use crate::language::Language;

/// Environment variable pointing at a directory for producer media dumps.
pub const MEDIA_DUMP_PATH_ENV: &str = "LINGOKIT_MEDIA_DUMP_PATH";

/// Translation pipeline of one (original SSRC, mapped SSRC) pair.
pub struct TranslatorSource {
    original_ssrc: u32,
    mapped_ssrc: u32,
    payload_type: u8,
    serializer: MediaFrameSerializer,
    depacketizer: Mutex<Depacketizer>,
    consumers: ConsumersManager,
    player: Arc<RtpPacketsPlayer>,
    output: Arc<dyn RtpPacketsCollector>,
    dump_sink: Mutex<Option<Arc<dyn MediaSink>>>,
}

impl TranslatorSource {
    /// Create the source, or `None` when the codec has no depacketizer.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        mime: MimeType,
        clock_rate: u32,
        original_ssrc: u32,
        mapped_ssrc: u32,
        payload_type: u8,
        factory: Arc<dyn TranslatorEndPointFactory>,
        player: Arc<RtpPacketsPlayer>,
        output: Arc<dyn RtpPacketsCollector>,
        producer_id: &str,
        pool: BufferPool,
    ) -> Option<Arc<Self>> {
        debug_assert!(clock_rate > 0, "clock rate must be greater than zero");
        debug_assert!(original_ssrc > 0, "original SSRC must be greater than zero");
        debug_assert!(mapped_ssrc > 0, "mapped SSRC must be greater than zero");
        let Some(depacketizer) = Depacketizer::new(mime, clock_rate, pool) else {
            tracing::error!(%mime, ssrc = original_ssrc, "no depacketizer for this stream");
            return None;
        };
        let serializer = MediaFrameSerializer::new(mime, clock_rate);
        let source = Arc::new_cyclic(|weak: &Weak<Self>| {
            let sink: Weak<dyn EndpointSink> = weak.clone();
            Self {
                original_ssrc,
                mapped_ssrc,
                payload_type,
                serializer: serializer.clone(),
                depacketizer: Mutex::new(depacketizer),
                consumers: ConsumersManager::new(factory, serializer, sink, mapped_ssrc),
                player,
                output,
                dump_sink: Mutex::new(None),
            }
        });
        source.attach_dump_sink(producer_id);
        Some(source)
    }

    pub const fn original_ssrc(&self) -> u32 {
        self.original_ssrc
    }

    pub const fn mapped_ssrc(&self) -> u32 {
        self.mapped_ssrc
    }

    pub const fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn mime(&self) -> MimeType {
        self.serializer.mime()
    }

    pub fn clock_rate(&self) -> u32 {
        self.serializer.clock_rate()
    }

    /// Feed one original producer packet: depacketize toward the service
    /// and dispatch toward the consumers.
    pub fn add_original_rtp_packet(&self, packet: &mut RtpPacket) {
        if self.serializer.has_sinks() {
            let mut config_changed = false;
            let frame = self.depacketizer.lock().ok().and_then(|mut depacketizer| {
                // the serializer hands frames to a background thread, so
                // the payload must not alias the packet's buffer
                depacketizer.add_packet(packet, true, &mut config_changed)
            });
            if let Some(frame) = frame {
                if config_changed {
                    self.push_config();
                }
                self.serializer.write(frame);
            }
        }
        self.consumers.dispatch_original_packet(packet, Some(self.output.as_ref()));
    }

    pub fn set_paused(&self, paused: bool) {
        self.serializer.set_paused(paused);
    }

    pub fn set_input_language(&self, language: Language) {
        self.consumers.set_input_language(language);
    }

    pub fn add_consumer(self: &Arc<Self>, consumer: &Arc<ConsumerTranslator>) {
        if self.consumers.consumers_count() == 0 {
            // first consumer: open the playback stream
            let callback: Weak<dyn PlayerCallback> = {
                let as_dyn: Arc<dyn PlayerCallback> = self.clone();
                let weak = Arc::downgrade(&as_dyn);
                drop(as_dyn);
                weak
            };
            self.player.add_stream(
                self.original_ssrc,
                self.clock_rate(),
                self.payload_type,
                self.mime(),
                callback,
            );
        }
        self.consumers.add_consumer(consumer);
    }

    pub fn update_consumer(&self, consumer: &Arc<ConsumerTranslator>) {
        self.consumers.update_consumer(consumer);
    }

    pub fn remove_consumer(&self, consumer: &Arc<ConsumerTranslator>) {
        self.consumers.remove_consumer(consumer);
        if self.consumers.consumers_count() == 0 {
            self.player.remove_stream(self.original_ssrc);
        }
    }

    pub fn consumers_count(&self) -> usize {
        self.consumers.consumers_count()
    }

    pub fn endpoints_count(&self) -> usize {
        self.consumers.endpoints_count()
    }

    fn push_config(&self) {
        let (audio, video) = self
            .depacketizer
            .lock()
            .map_or((None, None), |depacketizer| {
                (depacketizer.audio_config(), depacketizer.video_config())
            });
        if let Some(config) = audio {
            self.serializer.set_audio_config(config);
        } else if let Some(config) = video {
            self.serializer.set_video_config(config);
        }
    }

    fn attach_dump_sink(&self, producer_id: &str) {
        let Ok(directory) = std::env::var(MEDIA_DUMP_PATH_ENV) else { return };
        if directory.is_empty() {
            return;
        }
        let path = std::path::Path::new(&directory)
            .join(format!("{producer_id}_{}.webm", self.original_ssrc));
        match FileSink::create(&path) {
            Ok(sink) => {
                let sink: Arc<dyn MediaSink> = sink;
                self.serializer.add_sink(sink.clone());
                if let Ok(mut slot) = self.dump_sink.lock() {
                    *slot = Some(sink);
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e,
                    "failed to open producer media dump");
            },
        }
    }
}

impl EndpointSink for TranslatorSource {
    fn on_connection_changed(&self, endpoint_id: u64, connected: bool) {
        self.consumers.notify_connected(endpoint_id, connected);
        if !connected {
            // drop any translations still queued from that endpoint
            self.player.stop(self.original_ssrc, endpoint_id);
        }
    }

    fn on_translation(&self, endpoint_id: u64, media: Arc<Buffer>) {
        self.player.play(self.original_ssrc, endpoint_id, media);
    }
}

impl PlayerCallback for TranslatorSource {
    fn on_play_started(&self, media_id: u64, source_id: u64, _ssrc: u32) {
        self.consumers.begin_packets_sending(media_id, source_id);
    }

    fn on_play(&self, media_id: u64, source_id: u64, packet: RtpTranslatedPacket) {
        self.consumers.send_packet(media_id, source_id, packet, Some(self.output.as_ref()));
    }

    fn on_play_finished(&self, media_id: u64, source_id: u64, _ssrc: u32) {
        self.consumers.end_packets_sending(media_id, source_id);
    }
}

impl Drop for TranslatorSource {
    fn drop(&mut self) {
        self.player.remove_stream(self.original_ssrc);
        self.serializer.remove_all_sinks();
    }
}
