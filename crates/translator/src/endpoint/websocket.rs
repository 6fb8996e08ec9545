// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Service endpoint over the WebSocket client.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use lingokit_core::Buffer;
use lingokit_media::{MediaFrameSerializer, MediaSink};

use super::{EndpointBase, EndpointSink, TranslatorEndPoint};
use crate::language::{Language, Voice};
use crate::websocket::{
    WebsocketClient, WebsocketConfig, WebsocketFailure, WebsocketListener, WebsocketState,
};

pub struct WebsocketEndPoint {
    base: EndpointBase,
    client: WebsocketClient,
}

impl WebsocketEndPoint {
    pub fn new(config: WebsocketConfig, owner: String) -> Arc<Self> {
        let endpoint =
            Arc::new(Self { base: EndpointBase::new(owner), client: WebsocketClient::new(config) });
        let media_sink: Weak<dyn MediaSink> = Arc::downgrade(&(endpoint.clone() as Arc<dyn MediaSink>));
        endpoint.base.bind_media_sink(media_sink);
        let listener: Arc<dyn WebsocketListener> = endpoint.clone();
        endpoint.client.add_listener(&listener);
        endpoint
    }

    fn resend_language_pack(&self) {
        if self.is_connected() && !self.client.write_text(self.base.language_pack()) {
            tracing::warn!(endpoint_id = self.base.id(), owner = %self.base.owner(),
                "failed to update language settings on the service");
        }
    }
}

impl TranslatorEndPoint for WebsocketEndPoint {
    fn id(&self) -> u64 {
        self.base.id()
    }

    fn is_connected(&self) -> bool {
        self.client.state() == WebsocketState::Connected
    }

    fn open(&self) {
        if !self.client.open() {
            tracing::error!(endpoint_id = self.base.id(), owner = %self.base.owner(),
                "failed to connect with the translation service");
        }
    }

    fn close(&self) {
        if self.is_connected() {
            // empty binary frame signals end of the media stream
            self.client.write_binary(Bytes::new());
        }
        self.client.close();
    }

    fn set_input_source(&self, input: Option<MediaFrameSerializer>) {
        self.base.set_input_source(input, self.is_connected());
    }

    fn set_input_language(&self, language: Option<Language>) {
        if self.base.set_input_language(language) {
            self.resend_language_pack();
        }
    }

    fn set_output(&self, language: Language, voice: Voice) {
        if self.base.set_output(language, voice) {
            self.resend_language_pack();
        }
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

impl WebsocketListener for WebsocketEndPoint {
    fn on_state_changed(&self, _socket_id: u64, state: WebsocketState) {
        match state {
            WebsocketState::Connected => {
                self.base
                    .handle_connection_changed(true, |text| self.client.write_text(text));
            },
            WebsocketState::Disconnected => {
                self.base.handle_connection_changed(false, |_| true);
            },
            WebsocketState::Connecting | WebsocketState::Invalid => {},
        }
    }

    fn on_binary_message(&self, _socket_id: u64, message: Bytes) {
        self.base.notify_translation(Arc::new(Buffer::from_vec(message.to_vec())));
    }

    fn on_failure(&self, socket_id: u64, failure: WebsocketFailure, what: String) {
        tracing::warn!(endpoint_id = self.base.id(), socket_id, %failure,
            "translation transport failure: {what}");
    }
}

impl MediaSink for WebsocketEndPoint {
    fn write_media_payload(&self, _sender_id: u64, payload: Arc<Buffer>) {
        if self.is_connected()
            && !self.client.write_binary(Bytes::copy_from_slice(payload.as_slice()))
        {
            tracing::debug!(endpoint_id = self.base.id(), "outbound media frame dropped");
        }
    }
}

impl Drop for WebsocketEndPoint {
    fn drop(&mut self) {
        self.client.close();
    }
}
