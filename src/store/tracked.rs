//! TrackedStore — the local store as the sync core sees it.
//!
//! Wraps any `LocalStore` with two behaviors the dirty tracker depends on:
//!
//! - every write outside hydration notifies registered edit listeners, and
//! - writes made *during* hydration are invisible to those listeners, via a
//!   reentrant "hydration in progress" counter. Reentrancy matters because a
//!   hydration can trigger a nested load (e.g. a secondary recovery read).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::traits::LocalStore;

/// A tracked mutation of the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Set { key: String },
    Removed { key: String },
}

impl StoreChange {
    pub fn key(&self) -> &str {
        match self {
            StoreChange::Set { key } => key,
            StoreChange::Removed { key } => key,
        }
    }
}

type EditListener = dyn Fn(&StoreChange) + Send + Sync;

/// Local store wrapper that reports user edits and suppresses hydration
/// writes. All sync-core code goes through this type; raw backends are only
/// handed out for read-only paths (collector, recovery snapshot).
pub struct TrackedStore {
    inner: Arc<dyn LocalStore>,
    hydration_depth: Arc<AtomicUsize>,
    listeners: Mutex<Vec<Arc<EditListener>>>,
}

impl TrackedStore {
    pub fn new(inner: Arc<dyn LocalStore>) -> Self {
        Self {
            inner,
            hydration_depth: Arc::new(AtomicUsize::new(0)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register an edit listener. Listeners fire on every write made outside
    /// a hydration guard, after the write is applied.
    pub fn on_edit(&self, listener: impl Fn(&StoreChange) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Enter hydration. Edits are suppressed until every outstanding guard
    /// has dropped.
    pub fn begin_hydration(&self) -> HydrationGuard {
        self.hydration_depth.fetch_add(1, Ordering::SeqCst);
        HydrationGuard {
            depth: Arc::clone(&self.hydration_depth),
        }
    }

    /// Whether a hydration guard is currently held.
    pub fn hydrating(&self) -> bool {
        self.hydration_depth.load(Ordering::SeqCst) > 0
    }

    /// Write a server-owned meta value (e.g. the version counter) without it
    /// counting as a user edit.
    pub fn set_untracked(&self, key: &str, value: &str) {
        self.inner.set(key, value);
    }

    /// Read-only handle to the underlying backend.
    pub fn backend(&self) -> &Arc<dyn LocalStore> {
        &self.inner
    }

    fn notify(&self, change: StoreChange) {
        if self.hydrating() {
            return;
        }
        // Snapshot under the lock, call outside it, so listeners can register
        // further listeners without deadlocking.
        let snapshot: Vec<Arc<EditListener>> = self.listeners.lock().clone();
        for listener in snapshot {
            listener(&change);
        }
    }
}

impl LocalStore for TrackedStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) {
        self.inner.set(key, value);
        self.notify(StoreChange::Set { key: key.to_string() });
    }

    fn remove(&self, key: &str) {
        self.inner.remove(key);
        self.notify(StoreChange::Removed { key: key.to_string() });
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn clear(&self) {
        self.inner.clear();
    }
}

/// RAII hydration marker. Dropping it exits one level of hydration.
pub struct HydrationGuard {
    depth: Arc<AtomicUsize>,
}

impl Drop for HydrationGuard {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}
