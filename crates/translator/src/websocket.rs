// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Asynchronous WebSocket client wrapper for translation endpoints.
//!
//! Every `open()` spawns one runner thread hosting a current-thread tokio
//! runtime: connect, then a select loop between the outgoing command
//! channel and the incoming stream. Listener callbacks fire on the runner
//! thread; all public calls are non-blocking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use lingokit_core::Listeners;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::connect_async;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state of a [`WebsocketClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebsocketState {
    /// Terminal: the transport configuration cannot produce a connection.
    Invalid,
    Connecting,
    Connected,
    Disconnected,
}

/// Asynchronous failure taxonomy reported through the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebsocketFailure {
    NoConnection,
    CustomHeader,
    WriteText,
    WriteBinary,
    TlsOptions,
    General,
}

impl std::fmt::Display for WebsocketFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NoConnection => "no connection",
            Self::CustomHeader => "custom header",
            Self::WriteText => "write text",
            Self::WriteBinary => "write binary",
            Self::TlsOptions => "TLS options",
            Self::General => "general",
        };
        f.write_str(text)
    }
}

/// Callbacks from the connection runner thread.
pub trait WebsocketListener: Send + Sync {
    fn on_state_changed(&self, _socket_id: u64, _state: WebsocketState) {}

    fn on_text_message(&self, _socket_id: u64, _message: String) {}

    fn on_binary_message(&self, _socket_id: u64, _message: Bytes) {}

    fn on_failure(&self, _socket_id: u64, _failure: WebsocketFailure, _what: String) {}
}

/// Transport configuration for one endpoint connection.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WebsocketConfig {
    /// `wss://host:port/record` for the fleet translation service.
    pub uri: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub user_agent: Option<String>,
    pub extra_headers: Vec<(String, String)>,
}

enum Outgoing {
    Text(String),
    Binary(Bytes),
    Close,
}

struct ClientInner {
    id: u64,
    config: WebsocketConfig,
    state: Mutex<WebsocketState>,
    listeners: Listeners<dyn WebsocketListener>,
    outgoing: Mutex<Option<tokio::sync::mpsc::UnboundedSender<Outgoing>>>,
    close_requested: AtomicBool,
}

impl ClientInner {
    fn set_state(&self, state: WebsocketState) {
        {
            let Ok(mut current) = self.state.lock() else { return };
            if *current == state || *current == WebsocketState::Invalid {
                return;
            }
            *current = state;
        }
        self.listeners.invoke(|listener| listener.on_state_changed(self.id, state));
    }

    fn report_failure(&self, failure: WebsocketFailure, what: impl Into<String>) {
        let what = what.into();
        tracing::warn!(socket_id = self.id, %failure, "{what}");
        self.listeners.invoke(|listener| listener.on_failure(self.id, failure, what.clone()));
    }
}

/// WebSocket client with listener fan-out and a threaded runner.
pub struct WebsocketClient {
    inner: Arc<ClientInner>,
}

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

impl WebsocketClient {
    pub fn new(config: WebsocketConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
                config,
                state: Mutex::new(WebsocketState::Disconnected),
                listeners: Listeners::new(),
                outgoing: Mutex::new(None),
                close_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> WebsocketState {
        self.inner.state.lock().map_or(WebsocketState::Disconnected, |state| *state)
    }

    pub fn add_listener(&self, listener: &Arc<dyn WebsocketListener>) {
        self.inner.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn WebsocketListener>) {
        self.inner.listeners.remove(listener);
    }

    /// Request a connection. No-op while connecting or connected; returns
    /// false when the configuration is invalid.
    pub fn open(&self) -> bool {
        match self.state() {
            WebsocketState::Connecting | WebsocketState::Connected => return true,
            WebsocketState::Invalid => return false,
            WebsocketState::Disconnected => {},
        }
        if Url::parse(&self.inner.config.uri).is_err() {
            if let Ok(mut state) = self.inner.state.lock() {
                *state = WebsocketState::Invalid;
            }
            self.inner.report_failure(
                WebsocketFailure::General,
                format!("invalid service URI '{}'", self.inner.config.uri),
            );
            return false;
        }
        self.inner.close_requested.store(false, Ordering::Release);
        self.inner.set_state(WebsocketState::Connecting);

        let inner = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("lingokit-ws-{}", self.inner.id))
            .spawn(move || run_connection(&inner));
        if spawned.is_err() {
            self.inner.report_failure(WebsocketFailure::General, "failed to spawn runner thread");
            self.inner.set_state(WebsocketState::Disconnected);
            return false;
        }
        true
    }

    /// Request a disconnect; acknowledged asynchronously through the
    /// state listener.
    pub fn close(&self) {
        self.inner.close_requested.store(true, Ordering::Release);
        let sender = self.inner.outgoing.lock().ok().and_then(|slot| slot.clone());
        if let Some(sender) = sender {
            let _ = sender.send(Outgoing::Close);
        }
    }

    /// Send a text frame. Valid only while connected.
    pub fn write_text(&self, text: impl Into<String>) -> bool {
        if self.state() != WebsocketState::Connected {
            return false;
        }
        let sender = self.inner.outgoing.lock().ok().and_then(|slot| slot.clone());
        sender.is_some_and(|sender| sender.send(Outgoing::Text(text.into())).is_ok())
    }

    /// Send a binary frame. Valid only while connected.
    pub fn write_binary(&self, payload: Bytes) -> bool {
        if self.state() != WebsocketState::Connected {
            return false;
        }
        let sender = self.inner.outgoing.lock().ok().and_then(|slot| slot.clone());
        sender.is_some_and(|sender| sender.send(Outgoing::Binary(payload)).is_ok())
    }
}

impl Drop for WebsocketClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_connection(inner: &Arc<ClientInner>) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build();
    let Ok(runtime) = runtime else {
        inner.report_failure(WebsocketFailure::General, "failed to build the client runtime");
        inner.set_state(WebsocketState::Disconnected);
        return;
    };
    runtime.block_on(drive_connection(inner));
    if let Ok(mut slot) = inner.outgoing.lock() {
        *slot = None;
    }
    inner.set_state(WebsocketState::Disconnected);
}

async fn drive_connection(inner: &Arc<ClientInner>) {
    let Some(request) = build_request(inner) else { return };

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request)).await;
    let stream = match connected {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            let failure = if e.to_string().to_lowercase().contains("tls") {
                WebsocketFailure::TlsOptions
            } else {
                WebsocketFailure::NoConnection
            };
            inner.report_failure(failure, format!("connect failed: {e}"));
            return;
        },
        Err(_) => {
            inner.report_failure(WebsocketFailure::NoConnection, "connect timed out");
            return;
        },
    };
    if inner.close_requested.load(Ordering::Acquire) {
        return;
    }

    let (mut writer, mut reader) = stream.split();
    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
    if let Ok(mut slot) = inner.outgoing.lock() {
        *slot = Some(sender);
    }
    inner.set_state(WebsocketState::Connected);

    loop {
        tokio::select! {
            outgoing = receiver.recv() => match outgoing {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = writer.send(Message::Text(text.into())).await {
                        inner.report_failure(WebsocketFailure::WriteText, e.to_string());
                        break;
                    }
                },
                Some(Outgoing::Binary(payload)) => {
                    if let Err(e) = writer.send(Message::Binary(payload)).await {
                        inner.report_failure(WebsocketFailure::WriteBinary, e.to_string());
                        break;
                    }
                },
                Some(Outgoing::Close) | None => {
                    let _ = writer.send(Message::Close(None)).await;
                    break;
                },
            },
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    inner.listeners.invoke(|listener| {
                        listener.on_text_message(inner.id, text.to_string());
                    });
                },
                Some(Ok(Message::Binary(payload))) => {
                    inner.listeners.invoke(|listener| {
                        listener.on_binary_message(inner.id, payload.clone());
                    });
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}, // ping/pong handled by the protocol layer
                Some(Err(e)) => {
                    inner.report_failure(WebsocketFailure::General, e.to_string());
                    break;
                },
            },
        }
    }
}

fn build_request(
    inner: &Arc<ClientInner>,
) -> Option<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = match inner.config.uri.clone().into_client_request() {
        Ok(request) => request,
        Err(e) => {
            inner.report_failure(WebsocketFailure::NoConnection, format!("bad request: {e}"));
            return None;
        },
    };
    let headers = request.headers_mut();
    if let (Some(user), Some(password)) = (&inner.config.user, &inner.config.password) {
        let token =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        match HeaderValue::from_str(&format!("Basic {token}")) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            },
            Err(e) => {
                inner.report_failure(WebsocketFailure::CustomHeader, e.to_string());
                return None;
            },
        }
    }
    if let Some(agent) = &inner.config.user_agent {
        match HeaderValue::from_str(agent) {
            Ok(value) => {
                headers.insert(USER_AGENT, value);
            },
            Err(e) => {
                inner.report_failure(WebsocketFailure::CustomHeader, e.to_string());
                return None;
            },
        }
    }
    for (name, value) in &inner.config.extra_headers {
        let parsed_name = name.parse::<tokio_tungstenite::tungstenite::http::HeaderName>();
        let parsed_value = HeaderValue::from_str(value);
        match (parsed_name, parsed_value) {
            (Ok(header), Ok(value)) => {
                headers.insert(header, value);
            },
            _ => {
                inner
                    .report_failure(WebsocketFailure::CustomHeader, format!("invalid header '{name}'"));
                return None;
            },
        }
    }
    Some(request)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn invalid_uri_turns_the_client_invalid() {
        let client = WebsocketClient::new(WebsocketConfig {
            uri: "not a uri".to_string(),
            ..WebsocketConfig::default()
        });
        assert!(!client.open());
        assert_eq!(client.state(), WebsocketState::Invalid);
        // terminal: a second open does not resurrect it
        assert!(!client.open());
    }

    #[test]
    fn writes_outside_connected_are_dropped() {
        let client = WebsocketClient::new(WebsocketConfig {
            uri: "wss://localhost:1/record".to_string(),
            ..WebsocketConfig::default()
        });
        assert!(!client.write_text("{}"));
        assert!(!client.write_binary(Bytes::from_static(b"x")));
    }
}
