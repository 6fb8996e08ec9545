// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end scenarios over one translator source with a loopback
//! endpoint standing in for the translation service.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use lingokit_core::types::{AudioCodec, MimeType};
use lingokit_core::{Buffer, BufferPool, RtpPacket, RtpPacketsCollector};
use lingokit_media::{MediaFrameSerializer, MediaSink, RtpPacketsPlayer, WebmDeserializer};
use lingokit_translator::{
    ConsumerTranslator, EndpointSink, Language, TranslatorEndPoint, TranslatorEndPointFactory,
    TranslatorSource, Voice,
};

static NEXT_TEST_ENDPOINT_ID: AtomicU64 = AtomicU64::new(0x1000);

/// Connects on `open()`, records outbound container bytes, and can echo
/// them back to its sinks as a "translation".
struct EchoEndPoint {
    id: u64,
    connected: AtomicBool,
    output: Mutex<(Language, Voice)>,
    output_changes: Mutex<Vec<(Language, Voice)>>,
    input: Mutex<Option<MediaFrameSerializer>>,
    sinks: Mutex<Vec<Weak<dyn EndpointSink>>>,
    media: Mutex<Vec<u8>>,
    self_weak: Mutex<Weak<EchoEndPoint>>,
}

impl EchoEndPoint {
    fn new() -> Arc<Self> {
        let endpoint = Arc::new(Self {
            id: NEXT_TEST_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
            connected: AtomicBool::new(false),
            output: Mutex::new((Language::English, Voice::default())),
            output_changes: Mutex::new(Vec::new()),
            input: Mutex::new(None),
            sinks: Mutex::new(Vec::new()),
            media: Mutex::new(Vec::new()),
            self_weak: Mutex::new(Weak::new()),
        });
        *endpoint.self_weak.lock().unwrap() = Arc::downgrade(&endpoint);
        endpoint
    }

    fn collected(&self) -> Vec<u8> {
        self.media.lock().unwrap().clone()
    }

    fn emit_translation(&self, bytes: Vec<u8>) {
        let sinks = self.sinks.lock().unwrap().clone();
        for sink in sinks.iter().filter_map(Weak::upgrade) {
            sink.on_translation(self.id, Arc::new(Buffer::from_vec(bytes.clone())));
        }
    }

    fn notify_connection(&self, connected: bool) {
        let sinks = self.sinks.lock().unwrap().clone();
        for sink in sinks.iter().filter_map(Weak::upgrade) {
            sink.on_connection_changed(self.id, connected);
        }
    }

    fn media_sink(&self) -> Option<Arc<dyn MediaSink>> {
        let strong = self.self_weak.lock().unwrap().upgrade()?;
        Some(strong)
    }
}

impl TranslatorEndPoint for EchoEndPoint {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn open(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            if let (Some(serializer), Some(media_sink)) =
                (self.input.lock().unwrap().clone(), self.media_sink())
            {
                serializer.add_sink(media_sink);
            }
            self.notify_connection(true);
        }
    }

    fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            if let (Some(serializer), Some(media_sink)) =
                (self.input.lock().unwrap().clone(), self.media_sink())
            {
                serializer.remove_sink(&media_sink);
            }
            self.notify_connection(false);
        }
    }

    fn set_input_source(&self, input: Option<MediaFrameSerializer>) {
        *self.input.lock().unwrap() = input;
    }

    fn set_input_language(&self, _language: Option<Language>) {}

    fn set_output(&self, language: Language, voice: Voice) {
        *self.output.lock().unwrap() = (language, voice);
        self.output_changes.lock().unwrap().push((language, voice));
    }

    fn output(&self) -> (Language, Voice) {
        *self.output.lock().unwrap()
    }

    fn add_sink(&self, sink: &Arc<dyn EndpointSink>) {
        self.sinks.lock().unwrap().push(Arc::downgrade(sink));
    }

    fn remove_sink(&self, sink: &Arc<dyn EndpointSink>) {
        let target = Arc::as_ptr(sink);
        self.sinks
            .lock()
            .unwrap()
            .retain(|existing| !std::ptr::addr_eq(existing.as_ptr(), target));
    }
}

impl MediaSink for EchoEndPoint {
    fn write_media_payload(&self, _sender_id: u64, payload: Arc<Buffer>) {
        self.media.lock().unwrap().extend_from_slice(payload.as_slice());
    }
}

#[derive(Default)]
struct EchoFactory {
    endpoints: Mutex<Vec<Arc<EchoEndPoint>>>,
}

impl EchoFactory {
    fn endpoint(&self, index: usize) -> Arc<EchoEndPoint> {
        self.endpoints.lock().unwrap()[index].clone()
    }

    fn created(&self) -> usize {
        self.endpoints.lock().unwrap().len()
    }
}

impl TranslatorEndPointFactory for EchoFactory {
    fn create_endpoint(&self) -> Option<Arc<dyn TranslatorEndPoint>> {
        let endpoint = EchoEndPoint::new();
        self.endpoints.lock().unwrap().push(endpoint.clone());
        Some(endpoint)
    }
}

#[derive(Default)]
struct Collector {
    packets: Mutex<Vec<RtpPacket>>,
}

impl Collector {
    fn all(&self) -> Vec<RtpPacket> {
        self.packets.lock().unwrap().clone()
    }
}

impl RtpPacketsCollector for Collector {
    fn add_packet(&self, packet: RtpPacket) {
        self.packets.lock().unwrap().push(packet);
    }
}

const ORIGINAL_SSRC: u32 = 0x100;
const MAPPED_SSRC: u32 = 0x200;
const PAYLOAD_TYPE: u8 = 100;

struct Fixture {
    factory: Arc<EchoFactory>,
    collector: Arc<Collector>,
    source: Arc<TranslatorSource>,
    _player: Arc<RtpPacketsPlayer>,
}

fn fixture() -> Fixture {
    let factory = Arc::new(EchoFactory::default());
    let collector = Arc::new(Collector::default());
    let player = Arc::new(RtpPacketsPlayer::new());
    let source = TranslatorSource::create(
        MimeType::Audio(AudioCodec::Opus),
        48_000,
        ORIGINAL_SSRC,
        MAPPED_SSRC,
        PAYLOAD_TYPE,
        factory.clone(),
        player.clone(),
        collector.clone(),
        "producer-1",
        BufferPool::with_inventory(8),
    )
    .expect("source for Opus");
    Fixture { factory, collector, source, _player: player }
}

fn opus_packet(seq: u16, timestamp: u32) -> RtpPacket {
    // stereo CELT 20ms TOC plus a couple of payload bytes
    RtpPacket::new(
        ORIGINAL_SSRC,
        seq,
        timestamp,
        PAYLOAD_TYPE,
        false,
        Arc::new(Buffer::from_vec(vec![0xFC, seq as u8, 0x55])),
    )
}

fn settle() {
    std::thread::sleep(Duration::from_millis(300));
}

#[test]
fn translated_echo_replaces_the_original_stream() {
    let fixture = fixture();
    let consumer = ConsumerTranslator::new(11, Language::English, Voice::Serena);
    fixture.source.add_consumer(&consumer);

    let endpoint = fixture.factory.endpoint(0);
    assert!(endpoint.is_connected(), "endpoint opens with its first consumer");

    const PACKETS: u16 = 100;
    for seq in 0..PACKETS {
        let mut packet = opus_packet(seq, u32::from(seq) * 960);
        fixture.source.add_original_rtp_packet(&mut packet);
        // before any translation played, the consumer hears the original
        assert!(!packet.is_rejected_for(11));
    }
    settle();

    let outbound = endpoint.collected();
    assert!(!outbound.is_empty(), "producer media must reach the endpoint");
    assert_eq!(&outbound[..4], &[0x1A, 0x45, 0xDF, 0xA3]);

    // the service echoes the whole fragment back
    endpoint.emit_translation(outbound);
    settle();

    let packets = fixture.collector.all();
    let translated: Vec<_> = packets.iter().filter(|packet| packet.translated).collect();
    assert_eq!(translated.len(), usize::from(PACKETS));
    for packet in &translated {
        assert_eq!(packet.ssrc, MAPPED_SSRC);
        assert_eq!(packet.payload_type, PAYLOAD_TYPE);
        assert!(packet.rejected_consumers().is_empty());
    }
    // the endpoint timeline stays monotonic: sequences advance one by
    // one, timestamps never step back
    for pair in translated.windows(2) {
        assert_eq!(pair[1].sequence_number, pair[0].sequence_number.wrapping_add(1));
        assert!(pair[1].timestamp >= pair[0].timestamp);
    }

    // once the endpoint owns a timeline, originals are rejected for its
    // consumer and re-emitted on the mapped timeline
    let before = fixture.collector.all().len();
    let mut late = opus_packet(PACKETS, u32::from(PACKETS) * 960);
    fixture.source.add_original_rtp_packet(&mut late);
    assert!(late.is_rejected_for(11));

    let packets = fixture.collector.all();
    assert_eq!(packets.len(), before + 1);
    let mapped = packets.last().unwrap();
    assert_eq!(mapped.ssrc, MAPPED_SSRC);
    assert!(!mapped.translated);
    assert!(mapped.rejected_consumers().is_empty());
    // delivered to the consumer exactly once: either original or mapped,
    // never both
    assert!(!mapped.is_rejected_for(11));
}

#[test]
fn consumers_with_the_same_tuple_share_an_endpoint() {
    let fixture = fixture();
    let first = ConsumerTranslator::new(1, Language::Spanish, Voice::Ryan);
    let second = ConsumerTranslator::new(2, Language::Spanish, Voice::Ryan);
    fixture.source.add_consumer(&first);
    fixture.source.add_consumer(&second);
    assert_eq!(fixture.factory.created(), 1);
    assert_eq!(fixture.source.endpoints_count(), 1);

    fixture.source.remove_consumer(&second);
    assert_eq!(fixture.source.endpoints_count(), 1, "endpoint survives the second consumer");
    fixture.source.remove_consumer(&first);
    assert_eq!(fixture.source.endpoints_count(), 0, "last consumer tears the endpoint down");
}

#[test]
fn language_change_repurposes_the_endpoint() {
    let fixture = fixture();
    let consumer = ConsumerTranslator::new(5, Language::English, Voice::Serena);
    fixture.source.add_consumer(&consumer);
    assert_eq!(fixture.factory.created(), 1);

    consumer.set_language(Language::Spanish);
    fixture.source.update_consumer(&consumer);

    assert_eq!(fixture.factory.created(), 1, "no new endpoint is created");
    assert_eq!(fixture.source.endpoints_count(), 1);
    let endpoint = fixture.factory.endpoint(0);
    assert_eq!(endpoint.output(), (Language::Spanish, Voice::Serena));
}

#[test]
fn paused_source_writes_nothing_and_never_catches_up() {
    let fixture = fixture();
    let consumer = ConsumerTranslator::new(3, Language::German, Voice::Abdul);
    fixture.source.add_consumer(&consumer);
    let endpoint = fixture.factory.endpoint(0);

    fixture.source.set_paused(true);
    for seq in 0..10u16 {
        let mut packet = opus_packet(seq, u32::from(seq) * 960);
        fixture.source.add_original_rtp_packet(&mut packet);
    }
    settle();
    assert!(endpoint.collected().is_empty(), "paused serializer drops writes");

    fixture.source.set_paused(false);
    let mut packet = opus_packet(50, 50 * 960);
    fixture.source.add_original_rtp_packet(&mut packet);
    settle();

    let outbound = endpoint.collected();
    assert!(!outbound.is_empty());
    // resume emits no catch-up frames: exactly one block in the stream
    let mut deserializer = WebmDeserializer::parse(&outbound).expect("valid fragment");
    let track = deserializer
        .select_track(MimeType::Audio(AudioCodec::Opus))
        .expect("opus track")
        .track_id;
    let mut frames = 0;
    while deserializer.next_frame(track).expect("clean stream").is_some() {
        frames += 1;
    }
    assert_eq!(frames, 1);
}
