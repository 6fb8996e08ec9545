// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Debug endpoint replaying a pre-recorded container file.
//!
//! Lets the pipeline run end to end without a translation service: the
//! endpoint "connects" through a timer (optionally after an artificial
//! delay) and, once the producer has pushed media, periodically replays
//! the fixture file as if it were a received translation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use lingokit_core::{Buffer, MediaTimer, TimerCallback};
use lingokit_media::{MediaFrameSerializer, MediaSink};

use super::{EndpointBase, EndpointSink, TranslatorEndPoint};
use crate::language::{Language, Voice};

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FileEndPointConfig {
    /// Pre-recorded WebM file posing as the service output.
    pub path: PathBuf,
    /// Playback length of the fixture; the replay interval adds one
    /// second of spacing on top. A test knob, not a contract.
    pub fixture_len: Duration,
    /// Artificial connection-establishment delay.
    pub connect_delay: Duration,
}

pub struct FileEndPoint {
    base: EndpointBase,
    config: FileEndPointConfig,
    valid: bool,
    state: AtomicU8,
    has_input_media: AtomicBool,
    timer: Arc<MediaTimer>,
    timer_id: AtomicU64,
}

impl FileEndPoint {
    pub fn new(config: FileEndPointConfig, owner: String, timer: Arc<MediaTimer>) -> Arc<Self> {
        let valid = std::fs::metadata(&config.path).map(|meta| meta.is_file()).unwrap_or(false);
        if !valid {
            tracing::error!(path = %config.path.display(),
                "cannot open replay fixture, endpoint is invalid");
        }
        let endpoint = Arc::new(Self {
            base: EndpointBase::new(owner),
            config,
            valid,
            state: AtomicU8::new(STATE_DISCONNECTED),
            has_input_media: AtomicBool::new(false),
            timer,
            timer_id: AtomicU64::new(0),
        });
        let media_sink: Weak<dyn MediaSink> = Arc::downgrade(&(endpoint.clone() as Arc<dyn MediaSink>));
        endpoint.base.bind_media_sink(media_sink);
        if valid {
            let callback: Arc<dyn TimerCallback> = endpoint.clone();
            let weak = Arc::downgrade(&callback);
            drop(callback);
            endpoint.timer_id.store(endpoint.timer.register(weak), Ordering::Release);
        }
        endpoint
    }

    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    fn replay_interval(&self) -> Duration {
        Duration::from_secs(1) + self.config.fixture_len
    }

    fn timer_id(&self) -> u64 {
        self.timer_id.load(Ordering::Acquire)
    }

    fn swap_state(&self, from: u8, to: u8) -> bool {
        self.state.compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn read_fixture(&self) -> Option<Arc<Buffer>> {
        match std::fs::read(&self.config.path) {
            Ok(bytes) if !bytes.is_empty() => Some(Arc::new(Buffer::from_vec(bytes))),
            Ok(_) => None,
            Err(e) => {
                tracing::error!(path = %self.config.path.display(), error = %e,
                    "unable to read the replay fixture");
                None
            },
        }
    }
}

impl TranslatorEndPoint for FileEndPoint {
    fn id(&self) -> u64 {
        self.base.id()
    }

    fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CONNECTED
    }

    fn open(&self) {
        if !self.valid {
            tracing::error!(endpoint_id = self.base.id(), "open() on an invalid file endpoint");
            return;
        }
        if self.swap_state(STATE_DISCONNECTED, STATE_CONNECTING) {
            // emulate connection establishment through the timer
            self.timer.set_timeout(self.timer_id(), self.config.connect_delay);
            self.timer.start(self.timer_id(), true);
        }
    }

    fn close(&self) {
        if self.state.swap(STATE_DISCONNECTED, Ordering::AcqRel) != STATE_DISCONNECTED {
            self.timer.stop(self.timer_id());
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

impl TimerCallback for FileEndPoint {
    fn on_timer(&self, _timer_id: u64) {
        if self.swap_state(STATE_CONNECTING, STATE_CONNECTED) {
            self.base.handle_connection_changed(true, |_| true);
        }
        if self.state.load(Ordering::Acquire) != STATE_CONNECTED {
            if self.state.load(Ordering::Acquire) == STATE_DISCONNECTED {
                self.timer.stop(self.timer_id());
            }
            return;
        }
        if !self.has_input_media.load(Ordering::Acquire) {
            return;
        }
        match self.read_fixture() {
            Some(media) => {
                self.base.notify_translation(media);
                // keep replaying at the fixture interval
                self.timer.set_timeout(self.timer_id(), self.replay_interval());
                if !self.timer.is_started(self.timer_id()) {
                    self.timer.start(self.timer_id(), false);
                }
            },
            None => self.timer.stop(self.timer_id()),
        }
    }
}

impl MediaSink for FileEndPoint {
    fn write_media_payload(&self, _sender_id: u64, payload: Arc<Buffer>) {
        if payload.is_empty() {
            return;
        }
        if !self.has_input_media.swap(true, Ordering::AcqRel) {
            // first media: fire a replay immediately, repeat afterwards
            self.timer.set_timeout(self.timer_id(), Duration::ZERO);
            self.timer.start(self.timer_id(), false);
        }
    }
}

impl Drop for FileEndPoint {
    fn drop(&mut self) {
        self.timer.unregister(self.timer_id());
    }
}
