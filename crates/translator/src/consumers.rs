// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Consumer-to-endpoint matching and per-endpoint RTP timeline mapping.
//!
//! One manager serves one translator source. Consumers asking for the
//! same (output language, output voice) tuple share a single endpoint;
//! the manager rewrites packet timelines so that, per consumer, original
//! and translated audio form one continuous stream on the mapped SSRC.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock, Weak};

use lingokit_core::{
    ConsumerId, RtpPacket, RtpPacketsCollector, RtpPacketsTimeline, RtpTranslatedPacket,
};
use lingokit_media::MediaFrameSerializer;

use crate::endpoint::{EndpointSink, TranslatorEndPoint, TranslatorEndPointFactory};
use crate::language::{Language, Voice};

/// Consumer-side translation settings, shared across all sources of a
/// producer. Mutation is serialized through the owning translator.
pub struct ConsumerTranslator {
    id: ConsumerId,
    language: Mutex<Language>,
    voice: Mutex<Voice>,
}

impl ConsumerTranslator {
    pub fn new(id: ConsumerId, language: Language, voice: Voice) -> Arc<Self> {
        Arc::new(Self { id, language: Mutex::new(language), voice: Mutex::new(voice) })
    }

    pub const fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn language(&self) -> Language {
        self.language.lock().map_or(Language::English, |language| *language)
    }

    pub fn voice(&self) -> Voice {
        self.voice.lock().map_or_else(|_| Voice::default(), |voice| *voice)
    }

    /// Returns true when the value changed.
    pub fn set_language(&self, language: Language) -> bool {
        self.language.lock().is_ok_and(|mut current| {
            let changed = *current != language;
            *current = language;
            changed
        })
    }

    pub fn set_voice(&self, voice: Voice) -> bool {
        self.voice.lock().is_ok_and(|mut current| {
            let changed = *current != voice;
            *current = voice;
            changed
        })
    }
}

pub(crate) fn language_voice_key(language: Language, voice: Voice) -> u64 {
    let mut hasher = DefaultHasher::new();
    language.code().hash(&mut hasher);
    voice.service_token().hash(&mut hasher);
    hasher.finish()
}

enum RemoveResult {
    Failed,
    Succeeded,
    SucceededNoMoreConsumers,
}

// media id, timestamp at the start moment
type PlayInfo = (u64, u32);

struct EndPointInfo {
    endpoint: Arc<dyn TranslatorEndPoint>,
    timeline: Mutex<Option<RtpPacketsTimeline>>,
    play_info: Mutex<PlayInfo>,
    consumers: Mutex<HashSet<ConsumerId>>,
    lang_voice_key: Mutex<u64>,
}

impl EndPointInfo {
    fn new(endpoint: Arc<dyn TranslatorEndPoint>) -> Self {
        Self {
            endpoint,
            timeline: Mutex::new(None),
            play_info: Mutex::new((0, 0)),
            consumers: Mutex::new(HashSet::new()),
            lang_voice_key: Mutex::new(0),
        }
    }

    fn is_stub(&self) -> bool {
        self.endpoint.is_stub()
    }

    fn id(&self) -> u64 {
        self.endpoint.id()
    }

    fn key(&self) -> u64 {
        self.lang_voice_key.lock().map_or(0, |key| *key)
    }

    fn begin_media_play(&self, media_id: u64, reference: RtpPacketsTimeline) {
        let Ok(mut play_info) = self.play_info.lock() else { return };
        if play_info.0 == 0 {
            let Ok(mut timeline) = self.timeline.lock() else { return };
            let timeline = timeline.get_or_insert(reference);
            *play_info = (media_id, timeline.timestamp());
        }
    }

    fn end_media_play(&self, media_id: u64) {
        if let Ok(mut play_info) = self.play_info.lock() {
            if play_info.0 == media_id {
                *play_info = (0, 0);
            }
        }
    }

    fn is_playing(&self) -> bool {
        self.play_info.lock().is_ok_and(|play_info| play_info.0 != 0)
    }

    fn consumers(&self) -> HashSet<ConsumerId> {
        self.consumers.lock().map_or_else(|_| HashSet::new(), |consumers| consumers.clone())
    }

    fn consumers_count(&self) -> usize {
        self.consumers.lock().map_or(0, |consumers| consumers.len())
    }

    /// Attach when the consumer's language/voice matches this endpoint.
    fn add_consumer(&self, consumer: &ConsumerTranslator) -> bool {
        if language_voice_key(consumer.language(), consumer.voice()) != self.key() {
            return false;
        }
        let Ok(mut consumers) = self.consumers.lock() else { return false };
        consumers.insert(consumer.id());
        true
    }

    fn remove_consumer(&self, consumer: &ConsumerTranslator) -> RemoveResult {
        let Ok(mut consumers) = self.consumers.lock() else { return RemoveResult::Failed };
        if consumers.remove(&consumer.id()) {
            if consumers.is_empty() {
                return RemoveResult::SucceededNoMoreConsumers;
            }
            return RemoveResult::Succeeded;
        }
        RemoveResult::Failed
    }

    /// Rewrite a translated packet onto this endpoint's timeline.
    fn advance_translated_packet(&self, offset: u32, packet: &mut RtpPacket) -> bool {
        let Ok(mut play_info) = self.play_info.lock() else { return false };
        if play_info.0 == 0 {
            return false;
        }
        let Ok(mut timeline) = self.timeline.lock() else { return false };
        let Some(timeline) = timeline.as_mut() else { return false };
        if offset == 0 {
            // first frame of the fragment continues after the last packet
            play_info.1 = play_info.1.wrapping_add(timeline.timestamp_delta());
        }
        packet.timestamp = play_info.1.wrapping_add(offset);
        packet.sequence_number = timeline.advance_seq_number();
        timeline.set_timestamp(packet.timestamp);
        true
    }

    /// Clone an original packet onto this endpoint's timeline. `None`
    /// until the endpoint has played at least once (no timeline yet).
    fn map_original_packet(&self, offset: u32, packet: &RtpPacket) -> Option<RtpPacket> {
        let Ok(mut timeline) = self.timeline.lock() else { return None };
        let timeline = timeline.as_mut()?;
        let mut mapped = packet.clone();
        let timestamp = timeline.timestamp().wrapping_add(offset);
        mapped.timestamp = timestamp;
        timeline.set_timestamp(timestamp);
        mapped.sequence_number = timeline.advance_seq_number();
        Some(mapped)
    }

    fn set_input(&self, language: Option<Language>) {
        self.endpoint.set_input_language(language);
    }

    fn set_output(&self, language: Language, voice: Voice) {
        let key = language_voice_key(language, voice);
        let Ok(mut current) = self.lang_voice_key.lock() else { return };
        if *current != key {
            *current = key;
            self.endpoint.set_output(language, voice);
        }
    }
}

impl Drop for EndPointInfo {
    fn drop(&mut self) {
        self.endpoint.set_input_source(None);
        self.endpoint.close();
    }
}

/// Endpoint lifecycle and packet dispatch for one translator source.
pub struct ConsumersManager {
    factory: Arc<dyn TranslatorEndPointFactory>,
    translations_input: MediaFrameSerializer,
    translations_output: Weak<dyn EndpointSink>,
    mapped_ssrc: u32,
    input_language: Mutex<Option<Language>>,
    original_timeline: Mutex<RtpPacketsTimeline>,
    endpoints: RwLock<HashMap<u64, Arc<EndPointInfo>>>,
}

impl ConsumersManager {
    pub fn new(
        factory: Arc<dyn TranslatorEndPointFactory>,
        translations_input: MediaFrameSerializer,
        translations_output: Weak<dyn EndpointSink>,
        mapped_ssrc: u32,
    ) -> Self {
        Self {
            factory,
            translations_input,
            translations_output,
            mapped_ssrc,
            input_language: Mutex::new(None),
            original_timeline: Mutex::new(RtpPacketsTimeline::default()),
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    pub fn input_language(&self) -> Option<Language> {
        self.input_language.lock().ok().and_then(|language| *language)
    }

    pub fn set_input_language(&self, language: Language) {
        let changed = self
            .input_language
            .lock()
            .is_ok_and(|mut current| current.replace(language) != Some(language));
        if changed {
            let Ok(endpoints) = self.endpoints.read() else { return };
            for info in endpoints.values() {
                info.set_input(Some(language));
            }
        }
    }

    /// Total consumers across all endpoints.
    pub fn consumers_count(&self) -> usize {
        self.endpoints
            .read()
            .map_or(0, |endpoints| endpoints.values().map(|info| info.consumers_count()).sum())
    }

    pub fn endpoints_count(&self) -> usize {
        self.endpoints.read().map_or(0, |endpoints| endpoints.len())
    }

    pub fn add_consumer(&self, consumer: &Arc<ConsumerTranslator>) -> bool {
        // endpoint open() fires connection callbacks that read the
        // endpoints map, so it must run after the write lock is released
        let created = {
            let Ok(mut endpoints) = self.endpoints.write() else { return false };
            if endpoints.values().any(|info| info.add_consumer(consumer)) {
                return true; // language & voice matched an existing endpoint
            }
            self.add_new_endpoint_for(
                &mut endpoints,
                consumer,
                consumer.language(),
                consumer.voice(),
            )
        };
        match created {
            Some(info) => {
                info.endpoint.open();
                true
            },
            None => false,
        }
    }

    /// Re-attach a consumer after its language or voice changed.
    ///
    /// An endpoint left without consumers is repurposed in place: its
    /// output settings are rewritten and the consumer is re-added, so no
    /// endpoint is created or destroyed.
    pub fn update_consumer(&self, consumer: &Arc<ConsumerTranslator>) -> bool {
        let language = consumer.language();
        let voice = consumer.voice();
        let key = language_voice_key(language, voice);
        let created = {
            let Ok(mut endpoints) = self.endpoints.write() else { return false };
            let mut deprecated = false;
            for info in endpoints.values() {
                if key == info.key() {
                    continue;
                }
                match info.remove_consumer(consumer) {
                    RemoveResult::Succeeded => {
                        deprecated = true;
                        break;
                    },
                    RemoveResult::SucceededNoMoreConsumers => {
                        info.set_output(language, voice);
                        if !info.add_consumer(consumer) {
                            tracing::error!(consumer = consumer.id(),
                                "failed to re-add consumer to a repurposed endpoint");
                        }
                        return true;
                    },
                    RemoveResult::Failed => {},
                }
            }
            if !deprecated {
                return false;
            }
            if endpoints.values().any(|info| info.add_consumer(consumer)) {
                return true;
            }
            self.add_new_endpoint_for(&mut endpoints, consumer, language, voice)
        };
        match created {
            Some(info) => {
                info.endpoint.open();
                true
            },
            None => false,
        }
    }

    pub fn remove_consumer(&self, consumer: &Arc<ConsumerTranslator>) -> bool {
        // the destroyed endpoint closes outside the lock: its disconnect
        // callback re-enters the endpoints map
        let destroyed = {
            let Ok(mut endpoints) = self.endpoints.write() else { return false };
            let mut destroy = None;
            for (&endpoint_id, info) in endpoints.iter() {
                match info.remove_consumer(consumer) {
                    RemoveResult::SucceededNoMoreConsumers => {
                        destroy = Some(endpoint_id);
                        break;
                    },
                    RemoveResult::Succeeded => return true,
                    RemoveResult::Failed => {},
                }
            }
            match destroy {
                Some(endpoint_id) => endpoints.remove(&endpoint_id),
                None => return false,
            }
        };
        drop(destroyed);
        true
    }

    /// Forward an original producer packet.
    ///
    /// Endpoints currently playing translated audio reject their
    /// consumers on the original; idle endpoints that have played before
    /// get a rewritten clone on their own timeline with everyone else's
    /// consumers rejected.
    pub fn dispatch_original_packet(
        &self,
        packet: &mut RtpPacket,
        collector: Option<&dyn RtpPacketsCollector>,
    ) {
        let delta = {
            let Ok(mut timeline) = self.original_timeline.lock() else { return };
            timeline.set_timestamp(packet.timestamp);
            timeline.set_seq_number(packet.sequence_number);
            timeline.timestamp_delta()
        };
        let mut rejected = HashSet::new();
        {
            let Ok(endpoints) = self.endpoints.read() else { return };
            for (&endpoint_id, info) in endpoints.iter() {
                if info.is_playing() {
                    rejected.extend(info.consumers());
                } else if let Some(mut mapped) = info.map_original_packet(delta, packet) {
                    rejected.extend(info.consumers());
                    mapped.set_rejected_consumers(self.alien_consumers(&endpoints, endpoint_id));
                    mapped.ssrc = self.mapped_ssrc;
                    if let Some(collector) = collector {
                        collector.add_packet(mapped);
                    }
                }
            }
        }
        packet.reject_consumers(rejected);
    }

    /// Stub endpoints fake a permanent play window once connected, so
    /// their consumers stop hearing the untranslated original.
    pub fn notify_connected(&self, endpoint_id: u64, connected: bool) {
        let Some(info) = self.endpoint(endpoint_id) else { return };
        if info.is_stub() {
            if connected {
                info.begin_media_play(1, self.timeline_snapshot());
            } else {
                info.end_media_play(1);
            }
        }
    }

    pub fn begin_packets_sending(&self, media_id: u64, endpoint_id: u64) {
        let Some(info) = self.endpoint(endpoint_id) else { return };
        if !info.is_stub() {
            info.begin_media_play(media_id, self.timeline_snapshot());
        }
    }

    pub fn send_packet(
        &self,
        _media_id: u64,
        endpoint_id: u64,
        packet: RtpTranslatedPacket,
        collector: Option<&dyn RtpPacketsCollector>,
    ) {
        let Some(info) = self.endpoint(endpoint_id) else { return };
        if info.is_stub() {
            return;
        }
        let offset = packet.timestamp_offset();
        let mut rtp = packet.take();
        if info.advance_translated_packet(offset, &mut rtp) {
            if let Some(collector) = collector {
                let Ok(endpoints) = self.endpoints.read() else { return };
                rtp.set_rejected_consumers(self.alien_consumers(&endpoints, endpoint_id));
                rtp.ssrc = self.mapped_ssrc;
                collector.add_packet(rtp);
            }
        }
    }

    pub fn end_packets_sending(&self, media_id: u64, endpoint_id: u64) {
        let Some(info) = self.endpoint(endpoint_id) else { return };
        if !info.is_stub() {
            info.end_media_play(media_id);
        }
    }

    fn timeline_snapshot(&self) -> RtpPacketsTimeline {
        self.original_timeline.lock().map_or_else(|_| RtpPacketsTimeline::default(), |t| *t)
    }

    fn endpoint(&self, endpoint_id: u64) -> Option<Arc<EndPointInfo>> {
        if endpoint_id == 0 {
            return None;
        }
        self.endpoints.read().ok().and_then(|endpoints| endpoints.get(&endpoint_id).cloned())
    }

    fn alien_consumers(
        &self,
        endpoints: &HashMap<u64, Arc<EndPointInfo>>,
        own_endpoint_id: u64,
    ) -> HashSet<ConsumerId> {
        let mut consumers = HashSet::new();
        for (&endpoint_id, info) in endpoints {
            if endpoint_id != own_endpoint_id {
                consumers.extend(info.consumers());
            }
        }
        consumers
    }

    /// Create, configure and register an endpoint for the consumer. The
    /// caller opens the returned endpoint after releasing the map lock.
    fn add_new_endpoint_for(
        &self,
        endpoints: &mut HashMap<u64, Arc<EndPointInfo>>,
        consumer: &Arc<ConsumerTranslator>,
        language: Language,
        voice: Voice,
    ) -> Option<Arc<EndPointInfo>> {
        let Some(info) = self.create_endpoint() else {
            tracing::error!(consumer = consumer.id(), %language,
                "failed to create an endpoint for the consumer");
            return None;
        };
        info.set_output(language, voice);
        if !info.add_consumer(consumer) {
            tracing::error!(consumer = consumer.id(), %language,
                "failed to attach the consumer to a new endpoint");
            return None;
        }
        endpoints.insert(info.id(), info.clone());
        Some(info)
    }

    fn create_endpoint(&self) -> Option<Arc<EndPointInfo>> {
        let endpoint = self.factory.create_endpoint()?;
        if let Some(sink) = self.translations_output.upgrade() {
            endpoint.add_sink(&sink);
        }
        endpoint.set_input_source(Some(self.translations_input.clone()));
        endpoint.set_input_language(self.input_language());
        Some(Arc::new(EndPointInfo::new(endpoint)))
    }
}

impl Drop for ConsumersManager {
    fn drop(&mut self) {
        // endpoints close (and fire callbacks) outside the map lock
        let drained: Vec<_> = self
            .endpoints
            .write()
            .map(|mut endpoints| endpoints.drain().map(|(_, info)| info).collect())
            .unwrap_or_default();
        drop(drained);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::endpoint::StubEndPoint;
    use lingokit_core::types::{AudioCodec, MimeType};
    use lingokit_core::Buffer;
    use lingokit_media::FrameWriterQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFactory {
        created: AtomicUsize,
    }

    impl StubFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self { created: AtomicUsize::new(0) })
        }
    }

    impl TranslatorEndPointFactory for StubFactory {
        fn create_endpoint(&self) -> Option<Arc<dyn TranslatorEndPoint>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Some(StubEndPoint::new("test".to_string()))
        }
    }

    struct NullSink;

    impl EndpointSink for NullSink {
        fn on_connection_changed(&self, _endpoint_id: u64, _connected: bool) {}

        fn on_translation(&self, _endpoint_id: u64, _media: Arc<Buffer>) {}
    }

    fn manager(factory: &Arc<StubFactory>) -> (ConsumersManager, Arc<NullSink>) {
        let sink = Arc::new(NullSink);
        let weak: Weak<dyn EndpointSink> = {
            let as_dyn: Arc<dyn EndpointSink> = sink.clone();
            Arc::downgrade(&as_dyn)
        };
        let serializer = MediaFrameSerializer::with_queue(
            MimeType::Audio(AudioCodec::Opus),
            48_000,
            FrameWriterQueue::new(),
        );
        let factory: Arc<dyn TranslatorEndPointFactory> = factory.clone();
        (ConsumersManager::new(factory, serializer, weak, 0xBEEF), sink)
    }

    #[test]
    fn consumers_with_equal_settings_share_one_endpoint() {
        let factory = StubFactory::new();
        let (manager, _sink) = manager(&factory);
        let first = ConsumerTranslator::new(1, Language::Spanish, Voice::Serena);
        let second = ConsumerTranslator::new(2, Language::Spanish, Voice::Serena);

        assert!(manager.add_consumer(&first));
        assert!(manager.add_consumer(&second));
        assert_eq!(manager.endpoints_count(), 1);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        // removing one keeps the endpoint, removing the last destroys it
        assert!(manager.remove_consumer(&second));
        assert_eq!(manager.endpoints_count(), 1);
        assert!(manager.remove_consumer(&first));
        assert_eq!(manager.endpoints_count(), 0);
    }

    #[test]
    fn different_settings_create_distinct_endpoints() {
        let factory = StubFactory::new();
        let (manager, _sink) = manager(&factory);
        let spanish = ConsumerTranslator::new(1, Language::Spanish, Voice::Serena);
        let german = ConsumerTranslator::new(2, Language::German, Voice::Serena);
        let spanish_ryan = ConsumerTranslator::new(3, Language::Spanish, Voice::Ryan);

        manager.add_consumer(&spanish);
        manager.add_consumer(&german);
        manager.add_consumer(&spanish_ryan);
        assert_eq!(manager.endpoints_count(), 3);
        assert_eq!(manager.consumers_count(), 3);
    }

    #[test]
    fn language_change_repurposes_an_emptied_endpoint() {
        let factory = StubFactory::new();
        let (manager, _sink) = manager(&factory);
        let consumer = ConsumerTranslator::new(1, Language::English, Voice::Serena);
        manager.add_consumer(&consumer);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        consumer.set_language(Language::Spanish);
        assert!(manager.update_consumer(&consumer));
        // the endpoint was rewritten in place, not recreated
        assert_eq!(manager.endpoints_count(), 1);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_moves_consumer_to_a_matching_endpoint() {
        let factory = StubFactory::new();
        let (manager, _sink) = manager(&factory);
        let resident = ConsumerTranslator::new(1, Language::Spanish, Voice::Serena);
        let mover = ConsumerTranslator::new(2, Language::German, Voice::Serena);
        let anchor = ConsumerTranslator::new(3, Language::German, Voice::Serena);
        manager.add_consumer(&resident);
        manager.add_consumer(&mover);
        manager.add_consumer(&anchor);
        assert_eq!(manager.endpoints_count(), 2);

        // mover joins the Spanish endpoint; the German one keeps its anchor
        mover.set_language(Language::Spanish);
        assert!(manager.update_consumer(&mover));
        assert_eq!(manager.endpoints_count(), 2);
        assert_eq!(manager.consumers_count(), 3);
    }

    #[test]
    fn keys_separate_languages_and_voices() {
        let key = language_voice_key(Language::Spanish, Voice::Serena);
        assert_ne!(key, language_voice_key(Language::German, Voice::Serena));
        assert_ne!(key, language_voice_key(Language::Spanish, Voice::Ryan));
        assert_eq!(key, language_voice_key(Language::Spanish, Voice::Serena));
    }
}
