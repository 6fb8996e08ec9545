// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-producer translation control plane.
//!
//! One translator serves one audio producer: it owns a source per
//! original SSRC, routes producer packets (accepting mangled/mapped
//! SSRCs), propagates pause and language changes, and keeps the shared
//! consumer registry in sync with all sources.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use lingokit_core::{BufferPool, ConsumerId, MimeType, RtpPacket, RtpPacketsCollector};
use lingokit_media::RtpPacketsPlayer;

use crate::consumers::ConsumerTranslator;
use crate::endpoint::{
    FileEndPoint, FileEndPointConfig, StubEndPoint, TranslatorEndPoint, TranslatorEndPointFactory,
    WebsocketEndPoint,
};
use crate::language::{Language, Voice};
use crate::source::TranslatorSource;
use crate::websocket::WebsocketConfig;

/// Which transport new endpoints are built on.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointProvider {
    /// The fleet translation service (`wss://host:port/record`).
    WebSocket {
        uri: String,
        user: Option<String>,
        password: Option<String>,
        user_agent: Option<String>,
    },
    /// Replay a pre-recorded fixture instead of a live service.
    File { path: PathBuf, fixture_len: Duration, connect_delay: Duration },
    /// Accept everything, translate nothing.
    Stub,
}

/// Deployment policy for a translator's endpoints.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TranslatorConfig {
    pub provider: EndpointProvider,
    /// Cap the fleet at one live connection per translator; additional
    /// endpoints become stubs until the live one goes away.
    #[serde(default)]
    pub single_connection: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self { provider: EndpointProvider::Stub, single_connection: false }
    }
}

pub(crate) struct EndpointFactory {
    config: TranslatorConfig,
    producer_id: String,
    player: Arc<RtpPacketsPlayer>,
    // the one live (non-stub) endpoint under the single-connection policy
    live_endpoint: Mutex<Weak<dyn TranslatorEndPoint>>,
}

impl EndpointFactory {
    fn new(config: TranslatorConfig, producer_id: String, player: Arc<RtpPacketsPlayer>) -> Self {
        Self {
            config,
            producer_id,
            player,
            live_endpoint: Mutex::new(Weak::<StubEndPoint>::new()),
        }
    }

    fn live_endpoint_exists(&self) -> bool {
        self.live_endpoint.lock().is_ok_and(|weak| weak.upgrade().is_some())
    }

    fn remember_live(&self, endpoint: &Arc<dyn TranslatorEndPoint>) {
        if let Ok(mut slot) = self.live_endpoint.lock() {
            *slot = Arc::downgrade(endpoint);
        }
    }

    fn stub(&self) -> Arc<dyn TranslatorEndPoint> {
        StubEndPoint::new(self.producer_id.clone())
    }
}

impl TranslatorEndPointFactory for EndpointFactory {
    fn create_endpoint(&self) -> Option<Arc<dyn TranslatorEndPoint>> {
        if self.config.single_connection && self.live_endpoint_exists() {
            return Some(self.stub());
        }
        let endpoint: Arc<dyn TranslatorEndPoint> = match &self.config.provider {
            EndpointProvider::WebSocket { uri, user, password, user_agent } => {
                WebsocketEndPoint::new(
                    WebsocketConfig {
                        uri: uri.clone(),
                        user: user.clone(),
                        password: password.clone(),
                        user_agent: user_agent.clone(),
                        extra_headers: Vec::new(),
                    },
                    self.producer_id.clone(),
                )
            },
            EndpointProvider::File { path, fixture_len, connect_delay } => {
                let endpoint = FileEndPoint::new(
                    FileEndPointConfig {
                        path: path.clone(),
                        fixture_len: *fixture_len,
                        connect_delay: *connect_delay,
                    },
                    self.producer_id.clone(),
                    self.player.timer(),
                );
                if !endpoint.is_valid() {
                    // unreadable fixture: degrade to a stub so consumer
                    // bookkeeping keeps working
                    return Some(self.stub());
                }
                endpoint
            },
            EndpointProvider::Stub => self.stub(),
        };
        if self.config.single_connection && !endpoint.is_stub() {
            self.remember_live(&endpoint);
        }
        Some(endpoint)
    }
}

/// Translation control plane of one audio producer.
pub struct Translator {
    producer_id: String,
    factory: Arc<EndpointFactory>,
    player: Arc<RtpPacketsPlayer>,
    output: Arc<dyn RtpPacketsCollector>,
    pool: BufferPool,
    producer_paused: AtomicBool,
    producer_language: Mutex<Language>,
    consumers: Mutex<HashMap<ConsumerId, Arc<ConsumerTranslator>>>,
    sources: RwLock<HashMap<u32, Arc<TranslatorSource>>>,
    mapped_to_original: Mutex<HashMap<u32, u32>>,
}

impl Translator {
    pub fn new(
        producer_id: impl Into<String>,
        producer_language: Language,
        config: TranslatorConfig,
        player: Arc<RtpPacketsPlayer>,
        output: Arc<dyn RtpPacketsCollector>,
        pool: BufferPool,
    ) -> Self {
        let producer_id = producer_id.into();
        let factory =
            Arc::new(EndpointFactory::new(config, producer_id.clone(), player.clone()));
        Self {
            producer_id,
            factory,
            player,
            output,
            pool,
            producer_paused: AtomicBool::new(false),
            producer_language: Mutex::new(producer_language),
            consumers: Mutex::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
            mapped_to_original: Mutex::new(HashMap::new()),
        }
    }

    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    pub fn producer_language(&self) -> Language {
        self.producer_language.lock().map_or(Language::English, |language| *language)
    }

    /// Register a producer stream. Audio only; idempotent per SSRC.
    pub fn add_stream(
        &self,
        mime: MimeType,
        clock_rate: u32,
        ssrc: u32,
        mapped_ssrc: u32,
        payload_type: u8,
    ) -> bool {
        if ssrc == 0 || mapped_ssrc == 0 || !mime.is_audio() {
            return false;
        }
        let mut ok = false;
        {
            let Ok(mut sources) = self.sources.write() else { return false };
            if let Some(existing) = sources.get(&ssrc) {
                debug_assert_eq!(existing.mime(), mime, "MIME type mismatch");
                debug_assert_eq!(existing.clock_rate(), clock_rate, "clock rate mismatch");
                debug_assert_eq!(existing.mapped_ssrc(), mapped_ssrc, "mapped SSRC mismatch");
                ok = true;
            } else if let Some(source) = TranslatorSource::create(
                mime,
                clock_rate,
                ssrc,
                mapped_ssrc,
                payload_type,
                self.factory.clone(),
                self.player.clone(),
                self.output.clone(),
                &self.producer_id,
                self.pool.clone(),
            ) {
                source.set_input_language(self.producer_language());
                source.set_paused(self.producer_paused.load(Ordering::Acquire));
                self.add_consumers_to_source(&source);
                sources.insert(ssrc, source);
                ok = true;
            } else {
                tracing::error!(%mime, ssrc, "no depacketizer or serializer for the stream");
            }
        }
        if ok {
            if let Ok(mut mapped) = self.mapped_to_original.lock() {
                mapped.insert(mapped_ssrc, ssrc);
            }
        }
        ok
    }

    /// Drop a stream by original or mapped SSRC.
    pub fn remove_stream(&self, ssrc: u32) -> bool {
        if ssrc == 0 {
            return false;
        }
        let original = self.resolve_original_ssrc(ssrc);
        let Ok(mut sources) = self.sources.write() else { return false };
        let Some(source) = sources.remove(&original) else { return false };
        if let Ok(mut mapped) = self.mapped_to_original.lock() {
            mapped.remove(&source.mapped_ssrc());
        }
        true
    }

    /// Route one producer packet to its source by SSRC (mapped SSRCs are
    /// resolved).
    pub fn add_original_rtp_packet(&self, packet: &mut RtpPacket) {
        if packet.ssrc == 0 {
            return;
        }
        let original = self.resolve_original_ssrc(packet.ssrc);
        let source = {
            let Ok(sources) = self.sources.read() else { return };
            sources.get(&original).cloned()
        };
        if let Some(source) = source {
            source.add_original_rtp_packet(packet);
        }
    }

    pub fn set_producer_paused(&self, paused: bool) {
        if self.producer_paused.swap(paused, Ordering::AcqRel) != paused {
            let Ok(sources) = self.sources.read() else { return };
            for source in sources.values() {
                source.set_paused(paused);
            }
        }
    }

    pub fn set_producer_language(&self, language: Language) {
        let changed = self
            .producer_language
            .lock()
            .is_ok_and(|mut current| std::mem::replace(&mut *current, language) != language);
        if changed {
            let Ok(sources) = self.sources.read() else { return };
            for source in sources.values() {
                source.set_input_language(language);
            }
        }
    }

    /// Register an audio consumer of this producer.
    pub fn add_consumer(&self, id: ConsumerId, language: Language, voice: Voice) {
        let Ok(mut consumers) = self.consumers.lock() else { return };
        if consumers.contains_key(&id) {
            return;
        }
        let consumer = ConsumerTranslator::new(id, language, voice);
        if let Ok(sources) = self.sources.read() {
            for source in sources.values() {
                source.add_consumer(&consumer);
            }
        }
        consumers.insert(id, consumer);
    }

    pub fn remove_consumer(&self, id: ConsumerId) {
        let Ok(mut consumers) = self.consumers.lock() else { return };
        let Some(consumer) = consumers.remove(&id) else { return };
        if let Ok(sources) = self.sources.read() {
            for source in sources.values() {
                source.remove_consumer(&consumer);
            }
        }
    }

    /// Propagate a consumer's language/voice change to every source.
    pub fn update_consumer_language_or_voice(
        &self,
        id: ConsumerId,
        language: Language,
        voice: Voice,
    ) {
        let consumer = {
            let Ok(consumers) = self.consumers.lock() else { return };
            consumers.get(&id).cloned()
        };
        let Some(consumer) = consumer else { return };
        let language_changed = consumer.set_language(language);
        if consumer.set_voice(voice) || language_changed {
            if let Ok(sources) = self.sources.read() {
                for source in sources.values() {
                    source.update_consumer(&consumer);
                }
            }
        }
    }

    pub fn sources_count(&self) -> usize {
        self.sources.read().map_or(0, |sources| sources.len())
    }

    fn resolve_original_ssrc(&self, ssrc: u32) -> u32 {
        let has_source =
            self.sources.read().is_ok_and(|sources| sources.contains_key(&ssrc));
        if has_source {
            return ssrc;
        }
        self.mapped_to_original
            .lock()
            .ok()
            .and_then(|mapped| mapped.get(&ssrc).copied())
            .unwrap_or(ssrc)
    }

    fn add_consumers_to_source(&self, source: &Arc<TranslatorSource>) {
        let Ok(consumers) = self.consumers.lock() else { return };
        for consumer in consumers.values() {
            source.add_consumer(consumer);
        }
    }
}

impl Drop for Translator {
    fn drop(&mut self) {
        if let Ok(mut consumers) = self.consumers.lock() {
            consumers.clear();
        }
        if let Ok(mut sources) = self.sources.write() {
            sources.clear();
        }
        if let Ok(mut mapped) = self.mapped_to_original.lock() {
            mapped.clear();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lingokit_core::types::AudioCodec;
    use std::sync::Mutex as StdMutex;

    struct NullCollector {
        packets: StdMutex<Vec<RtpPacket>>,
    }

    impl RtpPacketsCollector for NullCollector {
        fn add_packet(&self, packet: RtpPacket) {
            self.packets.lock().unwrap().push(packet);
        }
    }

    fn translator() -> Translator {
        Translator::new(
            "producer-a",
            Language::English,
            TranslatorConfig::default(),
            Arc::new(RtpPacketsPlayer::new()),
            Arc::new(NullCollector { packets: StdMutex::new(Vec::new()) }),
            BufferPool::with_inventory(4),
        )
    }

    #[test]
    fn audio_streams_only() {
        let translator = translator();
        assert!(translator.add_stream(
            MimeType::Audio(AudioCodec::Opus),
            48_000,
            0x100,
            0x200,
            100
        ));
        assert!(!translator.add_stream(
            MimeType::Video(lingokit_core::types::VideoCodec::Vp8),
            90_000,
            0x101,
            0x201,
            101
        ));
        assert_eq!(translator.sources_count(), 1);

        // idempotent per SSRC
        assert!(translator.add_stream(
            MimeType::Audio(AudioCodec::Opus),
            48_000,
            0x100,
            0x200,
            100
        ));
        assert_eq!(translator.sources_count(), 1);
    }

    #[test]
    fn streams_are_removable_by_either_ssrc() {
        let translator = translator();
        translator.add_stream(MimeType::Audio(AudioCodec::Opus), 48_000, 0x100, 0x200, 100);
        assert!(translator.remove_stream(0x200), "mapped SSRC resolves to the stream");
        assert!(!translator.remove_stream(0x200));

        translator.add_stream(MimeType::Audio(AudioCodec::Opus), 48_000, 0x300, 0x400, 100);
        assert!(translator.remove_stream(0x300));
        assert_eq!(translator.sources_count(), 0);
    }

    #[test]
    fn consumers_land_on_later_streams_too() {
        let translator = translator();
        translator.add_consumer(7, Language::Spanish, Voice::Serena);
        translator.add_stream(MimeType::Audio(AudioCodec::Opus), 48_000, 0x100, 0x200, 100);

        let sources = translator.sources.read().unwrap();
        let source = sources.get(&0x100).unwrap();
        assert_eq!(source.consumers_count(), 1);
        assert_eq!(source.endpoints_count(), 1);
    }

    #[test]
    fn config_deserializes_from_worker_settings() {
        let json = r#"{
            "provider": {
                "kind": "web_socket",
                "uri": "wss://translate.invalid:8080/record",
                "user": "svc",
                "password": "secret",
                "user_agent": "lingokit"
            },
            "single_connection": true
        }"#;
        let config: TranslatorConfig = serde_json::from_str(json).unwrap();
        assert!(config.single_connection);
        match config.provider {
            EndpointProvider::WebSocket { uri, user, .. } => {
                assert_eq!(uri, "wss://translate.invalid:8080/record");
                assert_eq!(user.as_deref(), Some("svc"));
            },
            other => panic!("unexpected provider {other:?}"),
        }

        let stub: TranslatorConfig =
            serde_json::from_str(r#"{ "provider": { "kind": "stub" } }"#).unwrap();
        assert!(!stub.single_connection);
        assert!(matches!(stub.provider, EndpointProvider::Stub));
    }

    #[test]
    fn stub_factory_counts_single_connection_policy() {
        let factory = EndpointFactory::new(
            TranslatorConfig { provider: EndpointProvider::Stub, single_connection: true },
            "p".to_string(),
            Arc::new(RtpPacketsPlayer::new()),
        );
        let endpoint = factory.create_endpoint().unwrap();
        assert!(endpoint.is_stub());
    }
}
