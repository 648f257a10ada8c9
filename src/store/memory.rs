//! In-memory `LocalStore` backend.
//!
//! Default backend for tests and headless use; a browser build would swap in
//! an origin-persistent backend behind the same trait.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::traits::LocalStore;

/// `BTreeMap`-backed store. Key order is stable, which keeps snapshot
/// payloads and test assertions deterministic.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the full contents.
    pub fn dump(&self) -> BTreeMap<String, String> {
        self.entries.lock().clone()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}
