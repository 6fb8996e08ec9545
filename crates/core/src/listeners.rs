// SPDX-FileCopyrightText: © 2025 LingoKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Multi-listener dispatch with reentrancy-safe iteration.
//!
//! Listeners are held weakly: registering never extends a listener's
//! lifetime, and a dropped listener simply stops receiving callbacks.
//! This keeps the reference graph acyclic when a listener (such as a
//! pipeline source) also owns the object it listens to.
//!
//! [`Listeners::invoke`] walks the container by index and releases the
//! lock around every callback, so listeners may add or remove entries
//! (including themselves) from inside a callback. When the container
//! shrank during a callback the index is not advanced, which preserves
//! coverage under reentrant removal; growth or no change advances.
//!
//! [`Listeners::block_invokes`] counts blockers; while at least one is
//! active, `invoke` is a no-op. Owners use this from teardown paths to
//! suppress final state callbacks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Fan-out container of weakly-held listeners.
pub struct Listeners<L: ?Sized> {
    listeners: Mutex<Vec<Weak<L>>>,
    blockers: AtomicUsize,
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> Listeners<L> {
    pub fn new() -> Self {
        Self { listeners: Mutex::new(Vec::with_capacity(1)), blockers: AtomicUsize::new(0) }
    }

    /// Add a listener. Returns false when the same listener is already
    /// registered.
    pub fn add(&self, listener: &Arc<L>) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else { return false };
        if listeners.iter().any(|existing| std::ptr::addr_eq(existing.as_ptr(), Arc::as_ptr(listener)))
        {
            return false;
        }
        listeners.push(Arc::downgrade(listener));
        true
    }

    /// Remove a listener by identity. Returns true when it was present.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else { return false };
        let before = listeners.len();
        listeners.retain(|existing| !std::ptr::addr_eq(existing.as_ptr(), Arc::as_ptr(listener)));
        listeners.len() != before
    }

    pub fn clear(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
    }

    /// Number of registered (possibly expired) listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().map_or(0, |listeners| listeners.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Increment (`true`) or decrement (`false`) the invoke blocker count.
    pub fn block_invokes(&self, block: bool) {
        if block {
            self.blockers.fetch_add(1, Ordering::AcqRel);
        } else {
            let previous = self.blockers.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(previous > 0, "unbalanced block_invokes(false)");
        }
    }

    /// Invoke `f` for every live listener. Expired entries are pruned in
    /// passing.
    pub fn invoke(&self, f: impl Fn(&L)) {
        if self.blockers.load(Ordering::Acquire) > 0 {
            return;
        }
        let mut index = 0usize;
        loop {
            let entry = {
                let Ok(mut listeners) = self.listeners.lock() else { return };
                loop {
                    let Some(weak) = listeners.get(index) else { break None };
                    if let Some(listener) = weak.upgrade() {
                        break Some((listener, listeners.len()));
                    }
                    listeners.remove(index);
                }
            };
            let Some((listener, size_before)) = entry else { break };
            f(&listener);
            let size_after = self.len();
            if size_after >= size_before {
                index += 1;
            }
            // otherwise an element was removed: the same index now refers
            // to the next listener
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Tagged(String);

    impl Named for Tagged {
        fn name(&self) -> &str {
            &self.0
        }
    }

    fn tagged(name: &str) -> Arc<dyn Named> {
        Arc::new(Tagged(name.to_string()))
    }

    #[test]
    fn add_is_identity_deduplicated() {
        let listeners: Listeners<dyn Named> = Listeners::new();
        let a = tagged("a");
        assert!(listeners.add(&a));
        assert!(!listeners.add(&a));
        assert_eq!(listeners.len(), 1);
        assert!(listeners.remove(&a));
        assert!(listeners.is_empty());
    }

    #[test]
    fn invoke_covers_all_listeners() {
        let listeners: Listeners<dyn Named> = Listeners::new();
        let (a, b, c) = (tagged("a"), tagged("b"), tagged("c"));
        listeners.add(&a);
        listeners.add(&b);
        listeners.add(&c);

        let seen = Mutex::new(Vec::new());
        listeners.invoke(|listener| seen.lock().unwrap().push(listener.name().to_string()));
        assert_eq!(*seen.lock().unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn dropped_listeners_are_skipped() {
        let listeners: Listeners<dyn Named> = Listeners::new();
        let a = tagged("a");
        let b = tagged("b");
        listeners.add(&a);
        listeners.add(&b);
        drop(a);

        let seen = Mutex::new(Vec::new());
        listeners.invoke(|listener| seen.lock().unwrap().push(listener.name().to_string()));
        assert_eq!(*seen.lock().unwrap(), ["b"]);
        // the expired entry was pruned
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn reentrant_removal_keeps_coverage() {
        let listeners = Arc::new(Listeners::<dyn Named>::new());
        let a = tagged("a");
        let b = tagged("b");
        let c = tagged("c");
        listeners.add(&a);
        listeners.add(&b);
        listeners.add(&c);

        // removing the listener currently being invoked must not skip the
        // one that slides into its slot
        let seen = Mutex::new(Vec::new());
        let inner = listeners.clone();
        listeners.invoke(|listener| {
            seen.lock().unwrap().push(listener.name().to_string());
            if listener.name() == "a" {
                inner.remove(&a);
            }
        });
        assert_eq!(*seen.lock().unwrap(), ["a", "b", "c"]);
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn blocked_invokes_are_noops() {
        let listeners: Listeners<dyn Named> = Listeners::new();
        let a = tagged("a");
        listeners.add(&a);

        let calls = AtomicUsize::new(0);
        listeners.block_invokes(true);
        listeners.invoke(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        listeners.block_invokes(false);
        listeners.invoke(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
