//! Local store trait — the synchronous, per-client, persistent KV mirror.
//!
//! Reads and writes never suspend; persistence across reloads is the
//! backend's concern. Implementors must be `Send + Sync` so the store can be
//! shared between the sync core and UI code.

/// Synchronous string-keyed store.
///
/// The sync subsystem treats every tracked key as owned by the record field
/// the name mapping assigns it; other code must not write those keys outside
/// the documented flows (edits, hydration).
pub trait LocalStore: Send + Sync {
    /// Read a value. `None` means the key is absent (a valid state, not an
    /// error — e.g. a completion flag that was never set).
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str);

    /// Remove a key. Does nothing if absent.
    fn remove(&self, key: &str);

    /// All currently present keys, in stable order.
    fn keys(&self) -> Vec<String>;

    /// Remove everything. Only the explicit user-initiated reset calls this.
    fn clear(&self);
}
