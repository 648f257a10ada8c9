//! Process-wide sync state: dirty/conflict tracking and event publication.
//!
//! One `SyncState` is created at session start and handed to every component
//! that needs it — no ambient globals. It is reset on explicit logout/reset
//! and never otherwise cleared.
//!
//! Dirtiness is tracked with two monotonic generation counters rather than a
//! boolean: every edit bumps `generation`, every confirmed persist advances
//! `synced_generation` to the generation captured when that persist started.
//! "Dirty" means the two differ, so a persist that raced with a newer edit
//! cannot clear it.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

// ============================================================================
// Status & events
// ============================================================================

/// The four observable states of the sync subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Clean — everything the user entered is confirmed persisted.
    Saved,
    /// Unsynced local edits pending.
    Dirty,
    /// A persist is in flight.
    Saving,
    /// Server version diverged from the local expectation. User-actionable
    /// when dirty; auto-healed when clean.
    Conflict,
}

/// Typed state-transition events published to UI indicators and the
/// auto-resolution logic. Consumers subscribe without coupling to sync
/// internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    SyncStarted { sync_id: u64 },
    SyncSucceeded { sync_id: u64, new_version: u64 },
    SyncFailed { sync_id: u64, error: String },
    ConflictDetected { expected: u64, actual: u64 },
    ConflictResolved,
    StatusChanged { status: SyncStatus },
}

/// Listener handle returned by [`SyncEventBus::on`].
pub type ListenerId = u64;

type Listener = dyn Fn(&SyncEvent) + Send + Sync;

/// Typed pub/sub channel for sync events.
///
/// Snapshot-on-emit: a listener removed during emission is still called in
/// that round, one added during emission is not. The lock is never held
/// across callbacks, so listeners may call `on`/`off` freely.
pub struct SyncEventBus {
    listeners: Mutex<Vec<(ListenerId, Arc<Listener>)>>,
    next_id: AtomicU64,
}

impl SyncEventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn on(&self, callback: impl Fn(&SyncEvent) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn off(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    pub fn emit(&self, event: &SyncEvent) {
        let snapshot: Vec<Arc<Listener>> = {
            let guard = self.listeners.lock();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in snapshot {
            cb(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SyncEventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SyncState
// ============================================================================

/// Shared sync-state handle.
pub struct SyncState {
    status: Mutex<SyncStatus>,
    /// Bumped on every tracked local edit.
    generation: AtomicU64,
    /// Generation confirmed persisted.
    synced_generation: AtomicU64,
    /// Monotonic persist-attempt token; completions tagged with an older id
    /// apply no side effects.
    latest_sync_id: AtomicU64,
    /// Consecutive transient failures since the last success.
    error_count: AtomicU32,
    events: SyncEventBus,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(SyncStatus::Saved),
            generation: AtomicU64::new(0),
            synced_generation: AtomicU64::new(0),
            latest_sync_id: AtomicU64::new(0),
            error_count: AtomicU32::new(0),
            events: SyncEventBus::new(),
        }
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.lock()
    }

    pub fn events(&self) -> &SyncEventBus {
        &self.events
    }

    /// Local edits not yet confirmed persisted?
    pub fn is_dirty(&self) -> bool {
        self.generation.load(Ordering::SeqCst) > self.synced_generation.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    /// Record a local edit: bump the generation and surface `Dirty` — unless
    /// a conflict is pending, which keeps its user-actionable framing.
    pub fn note_edit(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut status = self.status.lock();
        if *status != SyncStatus::Conflict && *status != SyncStatus::Dirty {
            *status = SyncStatus::Dirty;
            drop(status);
            self.events.emit(&SyncEvent::StatusChanged {
                status: SyncStatus::Dirty,
            });
        }
    }

    /// Issue a new persist-attempt id; all older attempts become stale.
    pub fn next_sync_id(&self) -> u64 {
        self.latest_sync_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether a completion with this id may still apply side effects.
    pub fn is_current(&self, sync_id: u64) -> bool {
        sync_id >= self.latest_sync_id.load(Ordering::SeqCst)
    }

    /// Mark a persist in flight.
    pub fn begin_sync(&self, sync_id: u64) {
        self.set_status(SyncStatus::Saving);
        self.events.emit(&SyncEvent::SyncStarted { sync_id });
    }

    /// Persist confirmed. Clears dirty only if no edit arrived after
    /// `started_generation`; a newer edit keeps `Dirty` so a follow-up cycle
    /// still runs. Stale completions (superseded sync id) change nothing.
    pub fn finish_success(&self, sync_id: u64, started_generation: u64, new_version: u64) {
        if !self.is_current(sync_id) {
            debug!(sync_id, "discarding stale sync completion");
            return;
        }
        self.synced_generation
            .fetch_max(started_generation, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);
        let status = if self.is_dirty() {
            SyncStatus::Dirty
        } else {
            SyncStatus::Saved
        };
        self.set_status(status);
        self.events.emit(&SyncEvent::SyncSucceeded {
            sync_id,
            new_version,
        });
    }

    /// Version conflict detected. Local data is left exactly as it was.
    pub fn finish_conflict(&self, sync_id: u64, expected: u64, actual: u64) {
        if !self.is_current(sync_id) {
            debug!(sync_id, "discarding stale conflict completion");
            return;
        }
        self.set_status(SyncStatus::Conflict);
        self.events
            .emit(&SyncEvent::ConflictDetected { expected, actual });
    }

    /// Conflict healed by re-hydrating from the server (only legal when the
    /// client was clean at detection time — the caller checks).
    pub fn resolve_conflict(&self) {
        self.synced_generation
            .store(self.generation.load(Ordering::SeqCst), Ordering::SeqCst);
        self.set_status(SyncStatus::Saved);
        self.events.emit(&SyncEvent::ConflictResolved);
    }

    /// Transient failure: stay dirty, count the error, retry next cycle.
    pub fn finish_error(&self, sync_id: u64, error: &str) {
        if !self.is_current(sync_id) {
            return;
        }
        self.error_count.fetch_add(1, Ordering::SeqCst);
        let current = self.status();
        if current != SyncStatus::Conflict {
            self.set_status(SyncStatus::Dirty);
        }
        self.events.emit(&SyncEvent::SyncFailed {
            sync_id,
            error: error.to_string(),
        });
    }

    /// Full reset — explicit logout/reset only.
    pub fn reset(&self) {
        self.generation.store(0, Ordering::SeqCst);
        self.synced_generation.store(0, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);
        self.set_status(SyncStatus::Saved);
    }

    fn set_status(&self, next: SyncStatus) {
        let mut status = self.status.lock();
        if *status == next {
            return;
        }
        *status = next;
        drop(status);
        self.events.emit(&SyncEvent::StatusChanged { status: next });
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}
