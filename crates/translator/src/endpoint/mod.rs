// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Translation endpoints.
//!
//! An endpoint is one connection to the translation service for one
//! (output language, output voice) tuple. The shared state machine is
//! `Disconnected -> Connecting -> Connected -> Disconnected` with
//! `Invalid` as the terminal state for misconfigured transports.
//!
//! Entering `Connected` sends the `set_target_language` control message
//! and attaches the endpoint as a sink of its producer's serializer, so
//! outbound media starts flowing; leaving `Connected` detaches it.
//! Translated media and connection transitions are fanned out to
//! [`EndpointSink`]s, which are held weakly (the sink owns the endpoint
//! through the consumer bookkeeping, not the other way around).

pub mod file;
pub mod stub;
pub mod websocket;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use lingokit_core::{Buffer, Listeners};
use lingokit_media::{MediaFrameSerializer, MediaSink};

use crate::language::{target_language_cmd, Language, Voice};

pub use file::{FileEndPoint, FileEndPointConfig};
pub use stub::StubEndPoint;
pub use websocket::WebsocketEndPoint;

/// Receiver of endpoint events; implemented by the owning source.
pub trait EndpointSink: Send + Sync {
    fn on_connection_changed(&self, endpoint_id: u64, connected: bool);

    /// A translated container fragment arrived from the far side.
    fn on_translation(&self, endpoint_id: u64, media: Arc<Buffer>);
}

/// One connection to the translation service.
pub trait TranslatorEndPoint: Send + Sync {
    fn id(&self) -> u64;

    fn is_stub(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool;

    /// Request a connection; no-op while connecting or connected.
    fn open(&self);

    /// Request a disconnect.
    fn close(&self);

    /// Bind (or unbind) the producer media stream feeding this endpoint.
    fn set_input_source(&self, input: Option<MediaFrameSerializer>);

    fn set_input_language(&self, language: Option<Language>);

    fn set_output(&self, language: Language, voice: Voice);

    fn output(&self) -> (Language, Voice);

    fn add_sink(&self, sink: &Arc<dyn EndpointSink>);

    fn remove_sink(&self, sink: &Arc<dyn EndpointSink>);
}

/// Factory hook the consumers manager uses to create endpoints on
/// demand. May hand out a stub when no service is reachable.
pub trait TranslatorEndPointFactory: Send + Sync {
    fn create_endpoint(&self) -> Option<Arc<dyn TranslatorEndPoint>>;
}

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// State shared by every endpoint variant.
pub(crate) struct EndpointBase {
    id: u64,
    owner: String,
    input_language: Mutex<Option<Language>>,
    output: Mutex<(Language, Voice)>,
    input: Mutex<Option<MediaFrameSerializer>>,
    sinks: Listeners<dyn EndpointSink>,
    // the endpoint itself, as the serializer-facing media sink
    media_sink: Mutex<Weak<dyn MediaSink>>,
}

impl EndpointBase {
    pub(crate) fn new(owner: String) -> Self {
        Self {
            id: NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
            owner,
            input_language: Mutex::new(None),
            output: Mutex::new((Language::English, Voice::default())),
            input: Mutex::new(None),
            sinks: Listeners::new(),
            media_sink: Mutex::new(Weak::<StubEndPoint>::new()),
        }
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn bind_media_sink(&self, sink: Weak<dyn MediaSink>) {
        if let Ok(mut slot) = self.media_sink.lock() {
            *slot = sink;
        }
    }

    pub(crate) fn set_input_source(&self, input: Option<MediaFrameSerializer>, connected: bool) {
        let previous = {
            let Ok(mut slot) = self.input.lock() else { return };
            std::mem::replace(&mut *slot, input)
        };
        if let Some(previous) = previous {
            self.detach_from(&previous);
        }
        if connected {
            self.attach_media_input();
        }
    }

    pub(crate) fn set_input_language(&self, language: Option<Language>) -> bool {
        let Ok(mut current) = self.input_language.lock() else { return false };
        if *current == language {
            return false;
        }
        *current = language;
        true
    }

    pub(crate) fn set_output(&self, language: Language, voice: Voice) -> bool {
        let Ok(mut current) = self.output.lock() else { return false };
        if *current == (language, voice) {
            return false;
        }
        *current = (language, voice);
        true
    }

    pub(crate) fn output(&self) -> (Language, Voice) {
        self.output
            .lock()
            .map_or((Language::English, Voice::default()), |output| *output)
    }

    /// Current `set_target_language` command as wire text.
    pub(crate) fn language_pack(&self) -> String {
        let (to, voice) = self.output();
        let from = self.input_language.lock().ok().and_then(|language| *language);
        target_language_cmd(to, voice, from).to_string()
    }

    pub(crate) fn add_sink(&self, sink: &Arc<dyn EndpointSink>) {
        self.sinks.add(sink);
    }

    pub(crate) fn remove_sink(&self, sink: &Arc<dyn EndpointSink>) {
        self.sinks.remove(sink);
    }

    /// Shared connected/disconnected handling: control message and media
    /// attachment, then the sink fan-out.
    pub(crate) fn handle_connection_changed(
        &self,
        connected: bool,
        send_text: impl Fn(&str) -> bool,
    ) {
        if connected {
            let pack = self.language_pack();
            if !send_text(&pack) {
                tracing::warn!(endpoint_id = self.id, owner = %self.owner,
                    "failed to send language settings to the service");
            }
            self.attach_media_input();
        } else {
            self.detach_media_input();
        }
        tracing::info!(endpoint_id = self.id, owner = %self.owner, connected,
            "translation endpoint connection changed");
        self.sinks.invoke(|sink| sink.on_connection_changed(self.id, connected));
    }

    /// Fan a received translation out to the sinks.
    pub(crate) fn notify_translation(&self, media: Arc<Buffer>) {
        tracing::debug!(endpoint_id = self.id, owner = %self.owner, bytes = media.len(),
            "received translation");
        self.sinks.invoke(|sink| sink.on_translation(self.id, media.clone()));
    }

    fn attach_media_input(&self) {
        let serializer = self.input.lock().ok().and_then(|slot| slot.clone());
        let media_sink = self.media_sink.lock().ok().and_then(|weak| weak.upgrade());
        if let (Some(serializer), Some(media_sink)) = (serializer, media_sink) {
            serializer.add_sink(media_sink);
        }
    }

    fn detach_media_input(&self) {
        let serializer = self.input.lock().ok().and_then(|slot| slot.clone());
        if let Some(serializer) = serializer {
            self.detach_from(&serializer);
        }
    }

    fn detach_from(&self, serializer: &MediaFrameSerializer) {
        let media_sink = self.media_sink.lock().ok().and_then(|weak| weak.upgrade());
        if let Some(media_sink) = media_sink {
            serializer.remove_sink(&media_sink);
        }
    }
}
