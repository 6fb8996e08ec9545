// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! No-service endpoint: connects immediately, accepts writes, emits no
//! translations. Used when the service is unreachable or the fleet policy
//! caps real connections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use lingokit_core::Buffer;
use lingokit_media::{MediaFrameSerializer, MediaSink};

use super::{EndpointBase, EndpointSink, TranslatorEndPoint};
use crate::language::{Language, Voice};

pub struct StubEndPoint {
    base: EndpointBase,
    connected: AtomicBool,
}

impl StubEndPoint {
    pub fn new(owner: String) -> Arc<Self> {
        let endpoint =
            Arc::new(Self { base: EndpointBase::new(owner), connected: AtomicBool::new(false) });
        let media_sink: Weak<dyn MediaSink> = Arc::downgrade(&(endpoint.clone() as Arc<dyn MediaSink>));
        endpoint.base.bind_media_sink(media_sink);
        endpoint
    }
}

impl TranslatorEndPoint for StubEndPoint {
    fn id(&self) -> u64 {
        self.base.id()
    }

    fn is_stub(&self) -> bool {
        true
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn open(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            self.base.handle_connection_changed(true, |_| true);
        }
    }

    fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.base.handle_connection_changed(false, |_| true);
        }
    }

    fn set_input_source(&self, input: Option<MediaFrameSerializer>) {
        self.base.set_input_source(input, self.is_connected());
    }

    fn set_input_language(&self, language: Option<Language>) {
        self.base.set_input_language(language);
    }

    fn set_output(&self, language: Language, voice: Voice) {
        self.base.set_output(language, voice);
    }

    fn output(&self) -> (Language, Voice) {
        self.base.output()
    }

    fn add_sink(&self, sink: &Arc<dyn EndpointSink>) {
        self.base.add_sink(sink);
    }

    fn remove_sink(&self, sink: &Arc<dyn EndpointSink>) {
        self.base.remove_sink(sink);
    }
}

impl MediaSink for StubEndPoint {
    fn write_media_payload(&self, _sender_id: u64, payload: Arc<Buffer>) {
        // accepted and discarded
        let _ = self.is_connected() && !payload.is_empty();
    }
}

impl Drop for StubEndPoint {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<(u64, bool)>>,
    }

    impl EndpointSink for RecordingSink {
        fn on_connection_changed(&self, endpoint_id: u64, connected: bool) {
            if let Ok(mut events) = self.events.lock() {
                events.push((endpoint_id, connected));
            }
        }

        fn on_translation(&self, _endpoint_id: u64, _media: Arc<Buffer>) {}
    }

    #[test]
    fn connects_immediately_and_reports_transitions() {
        let endpoint = StubEndPoint::new("producer-1".to_string());
        let recording = Arc::new(RecordingSink { events: Mutex::new(Vec::new()) });
        let sink: Arc<dyn EndpointSink> = recording.clone();
        endpoint.add_sink(&sink);

        assert!(!endpoint.is_connected());
        endpoint.open();
        assert!(endpoint.is_connected());
        // reopening is a no-op
        endpoint.open();
        endpoint.close();
        assert!(!endpoint.is_connected());

        let events = recording.events.lock().map(|events| events.clone());
        assert_eq!(
            events.ok().as_deref(),
            Some(&[(endpoint.id(), true), (endpoint.id(), false)][..])
        );
    }
}
