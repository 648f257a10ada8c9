//! Debounced persister — the write half of the sync loop.
//!
//! Edits schedule a persist; rapid edits coalesce into one. Each attempt
//! carries a monotonically increasing sync id, and only the latest id is
//! allowed to apply side effects when its remote call completes, so a slow
//! early write can never clobber the bookkeeping of a later one.
//!
//! `run_cycle` never returns `Err`: every way a persist can end — applied,
//! conflicted, nothing to send, failed — is a [`PersistOutcome`] variant, so
//! callers must handle conflicts rather than accidentally swallowing them in
//! a catch-all error arm.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::collect;
use crate::config::SyncOptions;
use crate::error::PersistError;
use crate::hydrate;
use crate::identity::{self, IdentityFragments};
use crate::remote::{Lookup, RemoteStore, UpdateOutcome, UpdatePayload};
use crate::store::{LocalStore, TrackedStore};
use crate::types::keys;

use super::state::SyncState;

/// Terminal result of one persist cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Write applied; the local mirror now carries `new_version`.
    Saved { new_version: u64 },
    /// Server version diverged. `resolved` is true when the client was clean
    /// and the conflict was healed by re-hydrating from the server.
    Conflict {
        expected: u64,
        actual: u64,
        resolved: bool,
    },
    /// The collector produced an empty record — no write was attempted.
    NothingToSave,
    /// This attempt was superseded by a newer edit before it ran.
    Superseded,
    /// Remote call failed. `transient` failures retry on the next cycle.
    Failed { error: String, transient: bool },
}

/// Debounced, versioned writer from the local store to the remote record.
pub struct Persister {
    state: Arc<SyncState>,
    store: Arc<TrackedStore>,
    remote: Arc<dyn RemoteStore>,
    options: SyncOptions,
    fragments: Mutex<IdentityFragments>,
}

impl Persister {
    pub fn new(
        state: Arc<SyncState>,
        store: Arc<TrackedStore>,
        remote: Arc<dyn RemoteStore>,
        options: SyncOptions,
        fragments: IdentityFragments,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            store,
            remote,
            options,
            fragments: Mutex::new(fragments),
        })
    }

    /// Wire the store's edit stream into the debounce loop. Every tracked
    /// edit marks the state dirty and (re)arms the timer.
    pub fn attach(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.store.on_edit(move |change| {
            if let Some(persister) = weak.upgrade() {
                debug!(key = change.key(), "edit observed, scheduling persist");
                persister.schedule_persist();
            }
        });
    }

    /// Replace the identity used for lookups (e.g. after login).
    pub fn set_identity(&self, fragments: IdentityFragments) {
        *self.fragments.lock() = fragments;
    }

    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    /// Mark dirty and arm the debounce timer. Each call issues a fresh sync
    /// id, so earlier pending timers wake up stale and do nothing — the
    /// effective behavior is one persist per quiet period, latest edit wins.
    pub fn schedule_persist(self: &Arc<Self>) {
        self.state.note_edit();
        let sync_id = self.state.next_sync_id();
        let debounce = Duration::from_millis(self.options.debounce_ms);
        let persister = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if !persister.state.is_current(sync_id) {
                debug!(sync_id, "debounce superseded, skipping");
                return;
            }
            persister.run_cycle(sync_id).await;
        });
    }

    /// Persist immediately, bypassing the debounce (manual save / unload).
    pub async fn force_sync_now(&self) -> PersistOutcome {
        let sync_id = self.state.next_sync_id();
        self.run_cycle(sync_id).await
    }

    /// One full persist cycle under the given sync id.
    async fn run_cycle(&self, sync_id: u64) -> PersistOutcome {
        if !self.state.is_current(sync_id) {
            return PersistOutcome::Superseded;
        }
        let started_generation = self.state.generation();

        let record = collect::collect(self.store.as_ref());
        if record.is_empty() {
            debug!(sync_id, "nothing collectable, skipping persist");
            return PersistOutcome::NothingToSave;
        }

        let fragments = self.fragments.lock().clone();
        let Some(lookup) = primary_lookup(&fragments) else {
            return self.fail(sync_id, &PersistError::RecordMissing);
        };

        // Seed the concurrency token on first persist: without a locally
        // cached version the row's current version is fetched (or the row is
        // created) before any conditional write is attempted.
        let expected_version = match collect::local_version(self.store.backend().as_ref()) {
            Some(v) => v,
            None => match self.seed_version(&fragments).await {
                Ok(v) => v,
                Err(e) => return self.fail(sync_id, &e),
            },
        };

        self.state.begin_sync(sync_id);
        let payload = UpdatePayload {
            fields: record,
            expected_version,
            source: self.options.source.clone(),
            client_id: self.options.client_id.clone(),
            link_user_id: fragments.user_id.clone(),
        };

        let timeout = Duration::from_millis(self.options.request_timeout_ms);
        let result = tokio::time::timeout(timeout, self.remote.update(&lookup, &payload)).await;

        match result {
            Ok(Ok(UpdateOutcome::Applied { new_version })) => {
                // Server-owned meta: bypasses edit tracking.
                self.store
                    .set_untracked(keys::VERSION, &new_version.to_string());
                self.state
                    .finish_success(sync_id, started_generation, new_version);
                info!(sync_id, new_version, "persist applied");
                PersistOutcome::Saved { new_version }
            }
            Ok(Ok(UpdateOutcome::Conflict { actual_version })) => {
                self.handle_conflict(sync_id, &lookup, expected_version, actual_version)
                    .await
            }
            Ok(Ok(UpdateOutcome::NotFound)) => self.fail(sync_id, &PersistError::RecordMissing),
            Ok(Err(e)) => self.fail(sync_id, &PersistError::Remote(e)),
            Err(_) => self.fail(
                sync_id,
                &PersistError::Timeout {
                    timeout_ms: self.options.request_timeout_ms,
                },
            ),
        }
    }

    /// Version conflict. Local data is never touched while dirty — the
    /// respondent's un-persisted answers outrank the server copy until a
    /// human decides. A clean client has nothing to lose, so it self-heals by
    /// re-hydrating the server record.
    async fn handle_conflict(
        &self,
        sync_id: u64,
        lookup: &Lookup,
        expected: u64,
        actual: u64,
    ) -> PersistOutcome {
        warn!(sync_id, expected, actual, "version conflict");
        self.state.finish_conflict(sync_id, expected, actual);

        if self.state.is_dirty() {
            return PersistOutcome::Conflict {
                expected,
                actual,
                resolved: false,
            };
        }

        // The re-fetch is a suspension point and the respondent may type
        // through it. The generation is captured before the call and checked
        // again after: if an edit landed meanwhile, hydrating would overwrite
        // it, so auto-resolution aborts and the conflict stands.
        let clean_generation = self.state.generation();
        let resolved = match self.remote.fetch(lookup).await {
            Ok(Some(current)) => {
                if self.state.generation() != clean_generation {
                    warn!(sync_id, "edit arrived during conflict re-fetch, keeping local state");
                    false
                } else {
                    hydrate::hydrate(&self.store, &current);
                    self.store
                        .set_untracked(keys::VERSION, &current.version.to_string());
                    self.state.resolve_conflict();
                    info!(sync_id, version = current.version, "conflict auto-resolved");
                    true
                }
            }
            Ok(None) => false,
            Err(e) => {
                warn!(sync_id, error = %e, "conflict re-fetch failed");
                false
            }
        };
        PersistOutcome::Conflict {
            expected,
            actual,
            resolved,
        }
    }

    /// First-persist version seeding: fetch the row (creating it if this
    /// identity has none) and mirror its version locally.
    async fn seed_version(&self, fragments: &IdentityFragments) -> Result<u64, PersistError> {
        let record = identity::ensure_record(
            self.remote.as_ref(),
            fragments,
            self.store.get(keys::EMAIL),
        )
        .await
        .map_err(|e| match e {
            crate::error::IdentityError::Remote(r) => PersistError::Remote(r),
            other => PersistError::Remote(crate::error::RemoteError::permanent(other.to_string())),
        })?;
        self.store
            .set_untracked(keys::VERSION, &record.version.to_string());
        debug!(version = record.version, "seeded version token");
        Ok(record.version)
    }

    fn fail(&self, sync_id: u64, error: &PersistError) -> PersistOutcome {
        warn!(sync_id, error = %error, "persist failed");
        self.state.finish_error(sync_id, &error.to_string());
        PersistOutcome::Failed {
            error: error.to_string(),
            transient: error.is_transient(),
        }
    }
}

/// Highest-priority lookup available for addressing the row on writes.
fn primary_lookup(fragments: &IdentityFragments) -> Option<Lookup> {
    if let Some(u) = &fragments.user_id {
        return Some(Lookup::UserId(u.clone()));
    }
    if let Some(s) = &fragments.survey_id {
        return Some(Lookup::SurveyId(s.clone()));
    }
    fragments
        .app_id
        .as_ref()
        .map(|a| Lookup::AppId(a.clone()).normalized())
}
