// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Two-tier buffer pooling for payload reuse along the media path.
//!
//! - a *stack tier* of preallocated power-of-two chunks (1..=4096 bytes,
//!   fixed inventory per size class)
//! - a *heap tier* for larger or overflow requests, kept in a size-ordered
//!   map and aged out by [`BufferPool::purge`] (optionally driven by a
//!   [`MediaTimer`] tick)
//!
//! A [`Buffer`] records its logical length separately from the chunk
//! capacity; `resize` never reallocates. Dropping a buffer returns the
//! backing chunk to its tier.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::timer::{MediaTimer, TimerCallback};

/// Largest chunk size served by the stack tier.
pub const MAX_STACK_CHUNK_SIZE: usize = 4096;
/// Preallocated chunks per stack size class.
pub const DEFAULT_STACK_CHUNKS_PER_CLASS: usize = 32;

struct StackClass {
    size: usize,
    inventory: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

struct AgedChunk {
    data: Box<[u8]>,
    released_at: Instant,
}

#[derive(Default)]
struct HeapTier {
    // free heap chunks keyed by capacity
    free: BTreeMap<usize, Vec<AgedChunk>>,
}

struct PoolInner {
    classes: Vec<StackClass>,
    heap: Mutex<HeapTier>,
    gc: Mutex<Option<Arc<GcCallback>>>,
}

/// Thread-safe pool handing out [`Buffer`] values.
///
/// Cloning the pool is cheap and shares the same chunk inventory.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    /// Create a pool with the default stack inventory.
    pub fn new() -> Self {
        Self::with_inventory(DEFAULT_STACK_CHUNKS_PER_CLASS)
    }

    /// Create a pool with `chunks_per_class` preallocated chunks per
    /// power-of-two size class.
    pub fn with_inventory(chunks_per_class: usize) -> Self {
        let mut classes = Vec::new();
        let mut size = 1usize;
        while size <= MAX_STACK_CHUNK_SIZE {
            let free =
                (0..chunks_per_class).map(|_| vec![0u8; size].into_boxed_slice()).collect();
            classes.push(StackClass { size, inventory: chunks_per_class, free: Mutex::new(free) });
            size *= 2;
        }
        Self {
            inner: Arc::new(PoolInner {
                classes,
                heap: Mutex::new(HeapTier::default()),
                gc: Mutex::new(None),
            }),
        }
    }

    /// Get a buffer with logical length `len`.
    ///
    /// Zero-length requests yield an empty buffer. Requests above
    /// [`MAX_STACK_CHUNK_SIZE`] (or stack-class exhaustion) are served by
    /// the heap tier, which allocates a fresh chunk on miss.
    pub fn allocate(&self, len: usize) -> Buffer {
        if len == 0 {
            return Buffer::empty();
        }
        if len <= MAX_STACK_CHUNK_SIZE {
            if let Some(buffer) = self.inner.acquire_stack(len, &self.inner) {
                return buffer;
            }
        }
        self.inner.acquire_heap(len, &self.inner)
    }

    /// Get a buffer containing a copy of `data`.
    pub fn allocate_copy(&self, data: &[u8]) -> Buffer {
        let mut buffer = self.allocate(data.len());
        buffer.as_mut_slice().copy_from_slice(data);
        buffer
    }

    /// Grow (or shrink) `buffer` to `len`, preserving its prefix.
    ///
    /// Stays in place when the backing chunk already fits, otherwise moves
    /// the contents into a freshly acquired chunk.
    pub fn reallocate(&self, len: usize, mut buffer: Buffer) -> Buffer {
        if buffer.resize(len) {
            return buffer;
        }
        let mut grown = self.allocate(len);
        let keep = buffer.len().min(len);
        grown.as_mut_slice()[..keep].copy_from_slice(&buffer.as_slice()[..keep]);
        grown
    }

    /// Drop free heap chunks that have been idle for at least `max_age`.
    ///
    /// `Duration::ZERO` drops every free heap chunk.
    pub fn purge(&self, max_age: Duration) {
        let now = Instant::now();
        let Ok(mut heap) = self.inner.heap.lock() else { return };
        heap.free.retain(|_, chunks| {
            chunks.retain(|chunk| now.duration_since(chunk.released_at) < max_age);
            !chunks.is_empty()
        });
    }

    /// Number of free chunks currently parked in the heap tier.
    pub fn free_heap_chunks(&self) -> usize {
        self.inner.heap.lock().map_or(0, |heap| heap.free.values().map(Vec::len).sum())
    }

    /// Arm a periodic garbage-collection tick on `timer`.
    ///
    /// Returns the timer id; the tick lives as long as the pool (or until
    /// the id is unregistered on the timer).
    pub fn start_gc(&self, timer: &MediaTimer, interval: Duration, max_age: Duration) -> u64 {
        let callback =
            Arc::new(GcCallback { pool: Arc::downgrade(&self.inner), max_age });
        let weak: Weak<dyn TimerCallback> = {
            let callback: Arc<dyn TimerCallback> = callback.clone();
            Arc::downgrade(&callback)
        };
        let timer_id = timer.register(weak);
        if let Ok(mut slot) = self.inner.gc.lock() {
            *slot = Some(callback);
        }
        timer.set_timeout(timer_id, interval);
        timer.start(timer_id, false);
        timer_id
    }
}

impl PoolInner {
    fn acquire_stack(&self, len: usize, this: &Arc<Self>) -> Option<Buffer> {
        let first = self.classes.iter().position(|class| class.size >= len)?;
        // exact class first, then any larger one
        for (index, class) in self.classes.iter().enumerate().skip(first) {
            let chunk = class.free.lock().ok().and_then(|mut free| free.pop());
            if let Some(data) = chunk {
                return Some(Buffer {
                    data,
                    len,
                    origin: Origin::Stack(index),
                    pool: Some(Arc::downgrade(this)),
                });
            }
        }
        None
    }

    fn acquire_heap(&self, len: usize, this: &Arc<Self>) -> Buffer {
        let reused = self.heap.lock().ok().and_then(|mut heap| {
            // exact capacity first, then the smallest larger one
            let key = if heap.free.contains_key(&len) {
                Some(len)
            } else {
                heap.free.range(len..).next().map(|(&capacity, _)| capacity)
            };
            let key = key?;
            let chunks = heap.free.get_mut(&key)?;
            let chunk = chunks.pop();
            if chunks.is_empty() {
                heap.free.remove(&key);
            }
            chunk
        });
        let data = reused.map_or_else(|| vec![0u8; len].into_boxed_slice(), |chunk| chunk.data);
        Buffer { data, len, origin: Origin::Heap, pool: Some(Arc::downgrade(this)) }
    }

    fn release(&self, data: Box<[u8]>, origin: Origin) {
        match origin {
            Origin::Stack(index) => {
                let Some(class) = self.classes.get(index) else { return };
                if data.len() != class.size {
                    return;
                }
                if let Ok(mut free) = class.free.lock() {
                    if free.len() < class.inventory {
                        free.push(data);
                    }
                }
            },
            Origin::Heap => {
                if let Ok(mut heap) = self.heap.lock() {
                    heap.free
                        .entry(data.len())
                        .or_default()
                        .push(AgedChunk { data, released_at: Instant::now() });
                }
            },
            Origin::Detached => {},
        }
    }
}

struct GcCallback {
    pool: Weak<PoolInner>,
    max_age: Duration,
}

impl TimerCallback for GcCallback {
    fn on_timer(&self, _timer_id: u64) {
        let Some(pool) = self.pool.upgrade() else { return };
        let now = Instant::now();
        let Ok(mut heap) = pool.heap.lock() else { return };
        let before: usize = heap.free.values().map(Vec::len).sum();
        heap.free.retain(|_, chunks| {
            chunks.retain(|chunk| now.duration_since(chunk.released_at) < self.max_age);
            !chunks.is_empty()
        });
        let after: usize = heap.free.values().map(Vec::len).sum();
        if before != after {
            tracing::debug!("buffer pool GC evicted {} heap chunks", before - after);
        }
    }
}

#[derive(Clone, Copy)]
enum Origin {
    Stack(usize),
    Heap,
    Detached,
}

/// A pooled byte buffer with a logical length.
///
/// `len() <= capacity()` always holds; `resize` only adjusts the logical
/// length. Sharing along the pipeline is done with `Arc<Buffer>`.
pub struct Buffer {
    data: Box<[u8]>,
    len: usize,
    origin: Origin,
    pool: Option<Weak<PoolInner>>,
}

impl Buffer {
    /// An empty, pool-less buffer.
    pub fn empty() -> Self {
        Self { data: Box::new([]), len: 0, origin: Origin::Detached, pool: None }
    }

    /// Wrap an owned vector as a detached (non-pooled) buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let data = data.into_boxed_slice();
        Self { len: data.len(), data, origin: Origin::Detached, pool: None }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Set the logical length. Succeeds iff `len <= capacity()`; never
    /// reallocates.
    pub fn resize(&mut self, len: usize) -> bool {
        if len <= self.data.len() {
            self.len = len;
            true
        } else {
            false
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Detach into a plain vector of exactly the logical length.
    pub fn into_vec(mut self) -> Vec<u8> {
        let logical_len = self.len;
        let data = std::mem::take(&mut self.data);
        self.origin = Origin::Detached;
        let mut vec = data.into_vec();
        vec.truncate(logical_len);
        vec
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .field("pooled", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Buffer {}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        // Prefer a pool chunk for the copy when the pool is still alive.
        if let Some(pool) = self.pool.as_ref().and_then(Weak::upgrade) {
            let handle = BufferPool { inner: pool };
            return handle.allocate_copy(self.as_slice());
        }
        Self::from_vec(self.as_slice().to_vec())
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take().and_then(|weak| weak.upgrade()) else { return };
        if self.data.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.data);
        pool.release(data, self.origin);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn resize_is_bounded_by_capacity() {
        let pool = BufferPool::with_inventory(1);
        let mut buffer = pool.allocate(100);
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.capacity(), 128);

        assert!(buffer.resize(128));
        assert_eq!(buffer.len(), 128);
        assert!(!buffer.resize(129));
        assert_eq!(buffer.len(), 128);
        assert!(buffer.resize(0));
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_size_allocation_is_empty() {
        let pool = BufferPool::with_inventory(1);
        let buffer = pool.allocate(0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 0);
    }

    #[test]
    fn stack_chunks_return_on_drop() {
        let pool = BufferPool::with_inventory(1);
        {
            let first = pool.allocate(64);
            assert_eq!(first.capacity(), 64);
            // inventory of the 64-byte class is exhausted, next one falls
            // through to the 128-byte class
            let second = pool.allocate(64);
            assert_eq!(second.capacity(), 128);
        }
        let again = pool.allocate(64);
        assert_eq!(again.capacity(), 64);
    }

    #[test]
    fn oversized_requests_use_heap_tier() {
        let pool = BufferPool::with_inventory(1);
        {
            let big = pool.allocate(8192);
            assert_eq!(big.capacity(), 8192);
            assert_eq!(pool.free_heap_chunks(), 0);
        }
        assert_eq!(pool.free_heap_chunks(), 1);

        // released chunk is reused for an equal request
        let reused = pool.allocate(8192);
        assert_eq!(reused.capacity(), 8192);
        assert_eq!(pool.free_heap_chunks(), 0);
    }

    #[test]
    fn purge_drops_idle_heap_chunks() {
        let pool = BufferPool::with_inventory(1);
        for _ in 0..10 {
            drop(pool.allocate(8192));
        }
        assert!(pool.free_heap_chunks() >= 1);
        pool.purge(Duration::ZERO);
        assert_eq!(pool.free_heap_chunks(), 0);
        // the tier still serves fresh requests afterwards
        assert_eq!(pool.allocate(8192).capacity(), 8192);
    }

    #[test]
    fn gc_tick_evicts_idle_heap_chunks() {
        let pool = BufferPool::with_inventory(1);
        let timer = MediaTimer::new("pool-gc-test");
        for _ in 0..1000 {
            drop(pool.allocate(8192));
        }
        assert!(pool.free_heap_chunks() >= 1);

        pool.start_gc(&timer, Duration::from_millis(20), Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(pool.free_heap_chunks(), 0);

        // the tier still serves requests after the sweep
        assert_eq!(pool.allocate(8192).capacity(), 8192);
    }

    #[test]
    fn reallocate_preserves_prefix() {
        let pool = BufferPool::with_inventory(1);
        let mut buffer = pool.allocate_copy(&[1, 2, 3, 4]);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4]);

        buffer = pool.reallocate(2, buffer);
        assert_eq!(buffer.as_slice(), &[1, 2]);

        buffer = pool.reallocate(10_000, buffer);
        assert_eq!(buffer.len(), 10_000);
        assert_eq!(&buffer.as_slice()[..2], &[1, 2]);
    }

    #[test]
    fn clone_copies_content() {
        let pool = BufferPool::with_inventory(2);
        let original = pool.allocate_copy(b"payload");
        let copy = original.clone();
        assert_eq!(original, copy);
        assert_eq!(copy.as_slice(), b"payload");
    }
}
