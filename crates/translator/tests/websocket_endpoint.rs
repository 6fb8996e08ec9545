// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! WebSocket endpoint against an in-process server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use lingokit_core::Buffer;
use lingokit_translator::{
    EndpointSink, Language, TranslatorEndPoint, Voice, WebsocketConfig, WebsocketEndPoint,
};
use tokio_tungstenite::tungstenite::protocol::Message;

#[derive(Default)]
struct RecordingSink {
    connections: Mutex<Vec<bool>>,
    translations: Mutex<Vec<Vec<u8>>>,
}

impl EndpointSink for RecordingSink {
    fn on_connection_changed(&self, _endpoint_id: u64, connected: bool) {
        self.connections.lock().unwrap().push(connected);
    }

    fn on_translation(&self, _endpoint_id: u64, media: Arc<Buffer>) {
        self.translations.lock().unwrap().push(media.as_slice().to_vec());
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn endpoint_sends_language_pack_and_receives_translations() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        // the first frame after connect carries the language settings
        let message = ws.next().await.unwrap().unwrap();
        let text = message.into_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "set_target_language");
        assert_eq!(value["cmd"]["from"], "auto");
        assert_eq!(value["cmd"]["to"], "es");
        assert_eq!(value["cmd"]["voiceID"], "pMsXgVXv3BLzUgSXRplE");

        // reply with a binary "translation"
        ws.send(Message::Binary(Bytes::from_static(&[9, 8, 7]))).await.unwrap();

        // hold the connection until the peer closes
        while let Some(Ok(message)) = ws.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let endpoint = WebsocketEndPoint::new(
        WebsocketConfig {
            uri: format!("ws://{addr}/record"),
            user_agent: Some("lingokit-test".to_string()),
            ..WebsocketConfig::default()
        },
        "producer-ws".to_string(),
    );
    endpoint.set_output(Language::Spanish, Voice::Serena);

    let recording = Arc::new(RecordingSink::default());
    let sink: Arc<dyn EndpointSink> = recording.clone();
    endpoint.add_sink(&sink);

    endpoint.open();
    assert!(
        wait_until(Duration::from_secs(3), || endpoint.is_connected()),
        "endpoint should reach the in-process server"
    );
    assert!(wait_until(Duration::from_secs(3), || {
        !recording.translations.lock().unwrap().is_empty()
    }));
    assert_eq!(recording.translations.lock().unwrap()[0], vec![9, 8, 7]);
    assert_eq!(recording.connections.lock().unwrap().first(), Some(&true));

    endpoint.close();
    assert!(wait_until(Duration::from_secs(3), || !endpoint.is_connected()));
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_service_reports_a_disconnect() {
    let endpoint = WebsocketEndPoint::new(
        WebsocketConfig {
            uri: "ws://127.0.0.1:9/record".to_string(),
            ..WebsocketConfig::default()
        },
        "producer-ws".to_string(),
    );
    let recording = Arc::new(RecordingSink::default());
    let sink: Arc<dyn EndpointSink> = recording.clone();
    endpoint.add_sink(&sink);

    endpoint.open();
    // the failed connect lands back in Disconnected and the sink hears it
    assert!(wait_until(Duration::from_secs(5), || {
        recording.connections.lock().unwrap().contains(&false)
    }));
    assert!(!endpoint.is_connected());
}
