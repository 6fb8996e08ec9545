// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Background frame-writer queue.
//!
//! One thread drains a FIFO of `(writer id, frame)` entries and hands each
//! frame to the registered writer with that id. The thread starts when the
//! first writer registers and stops when the last one unregisters.
//!
//! Shutdown contract: the running flag flips *before* the final wakeup.
//! Entries still queued at that point are discarded, and `write` calls
//! after the stop return `false` so the producer observes the drop.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, OnceLock, RwLock, Weak};

use lingokit_core::MediaFrame;

/// A consumer of queued frames, registered by id.
pub trait QueuedMediaWriter: Send + Sync {
    fn id(&self) -> u64;
    /// Called on the queue thread, one frame at a time per queue.
    fn write_queued_frame(&self, frame: MediaFrame);
}

struct QueueState {
    entries: VecDeque<(u64, MediaFrame)>,
    running: bool,
}

struct QueueInner {
    writers: RwLock<HashMap<u64, Weak<dyn QueuedMediaWriter>>>,
    state: Mutex<QueueState>,
    wakeup: Condvar,
}

/// FIFO of media frames drained by one background thread.
#[derive(Clone)]
pub struct FrameWriterQueue {
    inner: Arc<QueueInner>,
}

impl Default for FrameWriterQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameWriterQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                writers: RwLock::new(HashMap::new()),
                state: Mutex::new(QueueState { entries: VecDeque::new(), running: false }),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// The process-wide queue shared by all serializers.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<FrameWriterQueue> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Register a writer. Starts the drain thread for the first one.
    pub fn register(&self, writer: &Arc<dyn QueuedMediaWriter>) {
        let first = {
            let Ok(mut writers) = self.inner.writers.write() else { return };
            let id = writer.id();
            if writers.contains_key(&id) {
                return;
            }
            writers.insert(id, Arc::downgrade(writer));
            writers.len() == 1
        };
        if first {
            self.start_thread();
        }
    }

    /// Unregister a writer by id. Stopping with the last writer discards
    /// any still-queued entries.
    pub fn unregister(&self, writer_id: u64) {
        let last = {
            let Ok(mut writers) = self.inner.writers.write() else { return };
            writers.remove(&writer_id).is_some() && writers.is_empty()
        };
        if last {
            if let Ok(mut state) = self.inner.state.lock() {
                // flag first, then signal: a late write observes the stop
                state.running = false;
                state.entries.clear();
            }
            self.inner.wakeup.notify_all();
        }
    }

    /// Enqueue a frame for `writer_id`. Returns `false` when the queue is
    /// not running (no writers, or stopped).
    pub fn write(&self, writer_id: u64, frame: MediaFrame) -> bool {
        let Ok(mut state) = self.inner.state.lock() else { return false };
        if !state.running {
            return false;
        }
        state.entries.push_back((writer_id, frame));
        drop(state);
        self.inner.wakeup.notify_one();
        true
    }

    fn start_thread(&self) {
        {
            let Ok(mut state) = self.inner.state.lock() else { return };
            if state.running {
                return;
            }
            state.running = true;
        }
        let inner = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name("lingokit-writer-queue".to_string())
            .spawn(move || drain_loop(&inner));
        if spawned.is_err() {
            tracing::error!("failed to spawn the frame writer queue thread");
            if let Ok(mut state) = self.inner.state.lock() {
                state.running = false;
            }
        }
    }
}

fn drain_loop(inner: &QueueInner) {
    let Ok(mut state) = inner.state.lock() else { return };
    loop {
        while state.running && state.entries.is_empty() {
            let Ok(waited) = inner.wakeup.wait(state) else { return };
            state = waited;
        }
        if !state.running {
            break;
        }
        // one entry per lock cycle: a concurrent stop discards the rest
        let Some((writer_id, frame)) = state.entries.pop_front() else { continue };
        drop(state);
        let writer = inner
            .writers
            .read()
            .ok()
            .and_then(|writers| writers.get(&writer_id).and_then(Weak::upgrade));
        if let Some(writer) = writer {
            writer.write_queued_frame(frame);
        }
        let Ok(reacquired) = inner.state.lock() else { return };
        state = reacquired;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lingokit_core::types::{AudioCodec, MimeType, RtpTimestamp};
    use lingokit_core::{Buffer, MediaFrame};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct Collector {
        id: u64,
        delivered: Mutex<Vec<u32>>,
        delay: Duration,
    }

    impl Collector {
        fn new(id: u64) -> Arc<Self> {
            Arc::new(Self { id, delivered: Mutex::new(Vec::new()), delay: Duration::ZERO })
        }

        fn slow(id: u64, delay: Duration) -> Arc<Self> {
            Arc::new(Self { id, delivered: Mutex::new(Vec::new()), delay })
        }
    }

    impl QueuedMediaWriter for Collector {
        fn id(&self) -> u64 {
            self.id
        }

        fn write_queued_frame(&self, frame: MediaFrame) {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.delivered.lock().unwrap().push(frame.timestamp.ticks());
        }
    }

    fn frame(ticks: u32) -> MediaFrame {
        MediaFrame::audio(
            MimeType::Audio(AudioCodec::Opus),
            RtpTimestamp::new(ticks, 48_000),
            Arc::new(Buffer::from_vec(vec![0xFC, 0xFF])),
            None,
        )
    }

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    fn next_id() -> u64 {
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    }

    #[test]
    fn delivers_in_fifo_order() {
        let queue = FrameWriterQueue::new();
        let collector = Collector::new(next_id());
        let writer: Arc<dyn QueuedMediaWriter> = collector.clone();
        queue.register(&writer);

        for ticks in [960, 1920, 2880] {
            assert!(queue.write(collector.id, frame(ticks)));
        }
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(*collector.delivered.lock().unwrap(), [960, 1920, 2880]);
        queue.unregister(collector.id);
    }

    #[test]
    fn write_without_writers_is_rejected() {
        let queue = FrameWriterQueue::new();
        assert!(!queue.write(42, frame(960)));
    }

    #[test]
    fn stop_drops_queued_entries() {
        let queue = FrameWriterQueue::new();
        let collector = Collector::slow(next_id(), Duration::from_millis(50));
        let writer: Arc<dyn QueuedMediaWriter> = collector.clone();
        queue.register(&writer);

        for ticks in 0..5u32 {
            assert!(queue.write(collector.id, frame(ticks * 960)));
        }
        std::thread::sleep(Duration::from_millis(10));
        queue.unregister(collector.id);

        // late writes observe the stop
        assert!(!queue.write(collector.id, frame(99)));

        std::thread::sleep(Duration::from_millis(300));
        let delivered = collector.delivered.lock().unwrap().len();
        assert!(delivered < 5, "stop should discard queued entries, delivered {delivered}");
    }

    #[test]
    fn queue_restarts_for_new_writers() {
        let queue = FrameWriterQueue::new();
        let first = Collector::new(next_id());
        let writer: Arc<dyn QueuedMediaWriter> = first.clone();
        queue.register(&writer);
        queue.unregister(first.id);

        let second = Collector::new(next_id());
        let writer: Arc<dyn QueuedMediaWriter> = second.clone();
        queue.register(&writer);
        assert!(queue.write(second.id, frame(960)));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(*second.delivered.lock().unwrap(), [960]);
        queue.unregister(second.id);
    }
}
