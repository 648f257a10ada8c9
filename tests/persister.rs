//! End-to-end persist cycles: debounce coalescing, versioned writes,
//! conflict handling, and transient-failure recovery.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use assessment_sync::hydrate;
use assessment_sync::identity::IdentityFragments;
use assessment_sync::remote::{
    CaptureOutcome, LinkOutcome, Lookup, SnapshotCapture, UpdateOutcome, UpdatePayload,
};
use assessment_sync::sync::SyncState;
use assessment_sync::{
    AssessmentRecord, LocalStore, MemoryRemote, MemoryStore, PersistOutcome, Persister,
    RemoteError, RemoteStore, SyncOptions, SyncStatus, TrackedStore,
};

// ----------------------------------------------------------------------------
// FlakyRemote — MemoryRemote wrapper with scripted update failures
// ----------------------------------------------------------------------------

struct FlakyRemote {
    inner: MemoryRemote,
    /// Updates to fail with a transient error before letting calls through.
    fail_updates: AtomicUsize,
    /// Artificial latency on update calls.
    update_delay: parking_lot::Mutex<Option<Duration>>,
    /// Artificial latency on fetch calls.
    fetch_delay: parking_lot::Mutex<Option<Duration>>,
    update_calls: AtomicUsize,
}

impl FlakyRemote {
    fn new(inner: MemoryRemote) -> Self {
        Self {
            inner,
            fail_updates: AtomicUsize::new(0),
            update_delay: parking_lot::Mutex::new(None),
            fetch_delay: parking_lot::Mutex::new(None),
            update_calls: AtomicUsize::new(0),
        }
    }

    fn fail_next_updates(&self, n: usize) {
        self.fail_updates.store(n, Ordering::SeqCst);
    }

    fn delay_updates(&self, delay: Duration) {
        *self.update_delay.lock() = Some(delay);
    }

    fn delay_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock() = Some(delay);
    }

    fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn fetch(&self, lookup: &Lookup) -> Result<Option<AssessmentRecord>, RemoteError> {
        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.fetch(lookup).await
    }

    async fn create(&self, record: &AssessmentRecord) -> Result<AssessmentRecord, RemoteError> {
        self.inner.create(record).await
    }

    async fn update(
        &self,
        lookup: &Lookup,
        payload: &UpdatePayload,
    ) -> Result<UpdateOutcome, RemoteError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.update_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .fail_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RemoteError::transient("connection reset"));
        }
        self.inner.update(lookup, payload).await
    }

    async fn link_owner(&self, lookup: &Lookup, user_id: &str) -> Result<LinkOutcome, RemoteError> {
        self.inner.link_owner(lookup, user_id).await
    }

    async fn capture_snapshot(
        &self,
        capture: &SnapshotCapture,
    ) -> Result<CaptureOutcome, RemoteError> {
        self.inner.capture_snapshot(capture).await
    }
}

// ----------------------------------------------------------------------------
// Fixture: one client attached to a shared remote
// ----------------------------------------------------------------------------

struct Client {
    store: Arc<TrackedStore>,
    state: Arc<SyncState>,
    persister: Arc<Persister>,
}

fn survey_fragments() -> IdentityFragments {
    IdentityFragments {
        user_id: None,
        survey_id: Some("SRV-A".into()),
        app_id: Some("SRVA".into()),
    }
}

/// Route sync tracing through the test harness; `RUST_LOG=assessment_sync=debug`
/// shows the per-cycle decisions when a test fails.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn client(remote: Arc<dyn RemoteStore>, fragments: IdentityFragments) -> Client {
    init_tracing();
    let store = Arc::new(TrackedStore::new(Arc::new(MemoryStore::new())));
    let state = Arc::new(SyncState::new());
    let persister = Persister::new(
        Arc::clone(&state),
        Arc::clone(&store),
        remote,
        SyncOptions::default().with_debounce_ms(50),
        fragments,
    );
    persister.attach();
    Client {
        store,
        state,
        persister,
    }
}

fn seed_row(remote: &MemoryRemote) -> AssessmentRecord {
    remote.seed(AssessmentRecord::minimal(
        None,
        Some("SRV-A".into()),
        Some("SRVA".into()),
        None,
    ))
}

fn store_dump(store: &TrackedStore) -> BTreeMap<String, Option<String>> {
    store
        .keys()
        .into_iter()
        .map(|k| {
            let v = store.get(&k);
            (k, v)
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn debounced_edits_coalesce_into_one_write() {
    let inner = MemoryRemote::new();
    seed_row(&inner);
    let remote = Arc::new(FlakyRemote::new(inner));
    let c = client(remote.clone(), survey_fragments());
    c.store.set_untracked("assessment_version", "1");

    // A burst of edits within the debounce window.
    c.store.set("dimension1_data", r#"{"q1":"a"}"#);
    c.store.set("dimension1_data", r#"{"q1":"b"}"#);
    c.store.set("dimension2_data", r#"{"q2":"c"}"#);
    assert_eq!(c.state.status(), SyncStatus::Dirty);

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(remote.update_calls(), 1);
    assert_eq!(c.state.status(), SyncStatus::Saved);

    // The last value of the burst is what landed.
    let row = remote
        .fetch(&Lookup::SurveyId("SRV-A".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.version, 2);
    let blob = row
        .section_data(assessment_sync::Section::Dimension1)
        .unwrap();
    assert_eq!(blob.get("q1"), Some(&serde_json::json!("b")));
}

#[tokio::test]
async fn force_sync_persists_and_advances_the_version() {
    let inner = MemoryRemote::new();
    seed_row(&inner);
    let remote = Arc::new(FlakyRemote::new(inner));
    let c = client(remote, survey_fragments());
    c.store.set_untracked("assessment_version", "1");

    c.store.set("general_benefits_data", r#"{"gb1":["x"]}"#);
    let outcome = c.persister.force_sync_now().await;

    assert_eq!(outcome, PersistOutcome::Saved { new_version: 2 });
    assert_eq!(c.store.get("assessment_version").as_deref(), Some("2"));
    assert_eq!(c.state.status(), SyncStatus::Saved);
    assert!(!c.state.is_dirty());
}

#[tokio::test]
async fn empty_local_state_is_never_written() {
    let inner = MemoryRemote::new();
    seed_row(&inner);
    let remote = Arc::new(FlakyRemote::new(inner));
    let c = client(remote.clone(), survey_fragments());

    let outcome = c.persister.force_sync_now().await;
    assert_eq!(outcome, PersistOutcome::NothingToSave);
    assert_eq!(remote.update_calls(), 0);
}

#[tokio::test]
async fn conflict_while_dirty_leaves_local_state_untouched() {
    let shared = Arc::new(FlakyRemote::new(MemoryRemote::new()));
    let row = seed_row(&shared.inner);
    assert_eq!(row.version, 1);

    // Both clients hydrate at version 1.
    let a = client(shared.clone(), survey_fragments());
    let b = client(shared.clone(), survey_fragments());
    for c in [&a, &b] {
        let row = shared
            .fetch(&Lookup::SurveyId("SRV-A".into()))
            .await
            .unwrap()
            .unwrap();
        hydrate::hydrate(&c.store, &row);
    }

    // A wins the race: server moves to version 2.
    a.store.set("dimension1_data", r#"{"q1":"from-a"}"#);
    assert_eq!(
        a.persister.force_sync_now().await,
        PersistOutcome::Saved { new_version: 2 }
    );

    // B edits against its stale version 1 and tries to persist.
    b.store.set("dimension1_data", r#"{"q1":"from-b"}"#);
    let before = store_dump(&b.store);
    let outcome = b.persister.force_sync_now().await;

    assert_eq!(
        outcome,
        PersistOutcome::Conflict {
            expected: 1,
            actual: 2,
            resolved: false,
        }
    );
    assert_eq!(b.state.status(), SyncStatus::Conflict);
    // Byte-for-byte: nothing in B's mirror moved.
    assert_eq!(store_dump(&b.store), before);
    assert_eq!(b.store.get("assessment_version").as_deref(), Some("1"));

    // The server still holds A's write.
    let row = shared
        .fetch(&Lookup::SurveyId("SRV-A".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.version, 2);
    let blob = row
        .section_data(assessment_sync::Section::Dimension1)
        .unwrap();
    assert_eq!(blob.get("q1"), Some(&serde_json::json!("from-a")));
}

#[tokio::test]
async fn conflict_while_clean_auto_resolves_from_server() {
    let shared = Arc::new(FlakyRemote::new(MemoryRemote::new()));
    seed_row(&shared.inner);

    let a = client(shared.clone(), survey_fragments());
    let b = client(shared.clone(), survey_fragments());
    for c in [&a, &b] {
        let row = shared
            .fetch(&Lookup::SurveyId("SRV-A".into()))
            .await
            .unwrap()
            .unwrap();
        hydrate::hydrate(&c.store, &row);
    }

    a.store.set("dimension1_data", r#"{"q1":"from-a"}"#);
    assert_eq!(
        a.persister.force_sync_now().await,
        PersistOutcome::Saved { new_version: 2 }
    );

    // B is clean (no tracked edits) but holds a stale version token. The
    // untracked write below gives the collector something to send without
    // marking B dirty; the forced sync hits the conflict and self-heals.
    b.store.set_untracked("survey_fully_submitted", "true");
    let outcome = b.persister.force_sync_now().await;

    match outcome {
        PersistOutcome::Conflict {
            expected: 1,
            actual: 2,
            resolved: true,
        } => {}
        other => panic!("expected auto-resolved conflict, got {other:?}"),
    }
    assert_eq!(b.state.status(), SyncStatus::Saved);
    assert_eq!(b.store.get("assessment_version").as_deref(), Some("2"));
    assert_eq!(
        b.store.get("dimension1_data").as_deref(),
        Some(r#"{"q1":"from-a"}"#)
    );
}

#[tokio::test(start_paused = true)]
async fn edit_during_conflict_refetch_is_never_overwritten() {
    let shared = Arc::new(FlakyRemote::new(MemoryRemote::new()));
    seed_row(&shared.inner);

    let a = client(shared.clone(), survey_fragments());
    let b = client(shared.clone(), survey_fragments());
    for c in [&a, &b] {
        let row = shared
            .fetch(&Lookup::SurveyId("SRV-A".into()))
            .await
            .unwrap()
            .unwrap();
        hydrate::hydrate(&c.store, &row);
    }

    a.store.set("dimension1_data", r#"{"q":"server copy"}"#);
    assert_eq!(
        a.persister.force_sync_now().await,
        PersistOutcome::Saved { new_version: 2 }
    );

    // B is clean with a stale token, so its next cycle will hit the conflict
    // and start a healing re-fetch. The respondent keeps typing while that
    // fetch is in flight; the fresh edit must survive.
    b.store.set_untracked("survey_fully_submitted", "true");
    shared.delay_fetches(Duration::from_millis(100));
    let store = Arc::clone(&b.store);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set("dimension1_data", r#"{"q":"typed during refetch"}"#);
    });

    let outcome = b.persister.force_sync_now().await;
    match outcome {
        PersistOutcome::Conflict {
            resolved: false, ..
        } => {}
        other => panic!("expected unresolved conflict, got {other:?}"),
    }
    // The mid-fetch edit is intact and still pending.
    assert_eq!(
        b.store.get("dimension1_data").as_deref(),
        Some(r#"{"q":"typed during refetch"}"#)
    );
    assert!(b.state.is_dirty());
    assert_eq!(b.state.status(), SyncStatus::Conflict);
    assert_eq!(b.store.get("assessment_version").as_deref(), Some("1"));
}

#[tokio::test]
async fn transient_failures_stay_dirty_and_recover() {
    let inner = MemoryRemote::new();
    seed_row(&inner);
    let remote = Arc::new(FlakyRemote::new(inner));
    let c = client(remote.clone(), survey_fragments());
    c.store.set_untracked("assessment_version", "1");

    c.store.set("dimension3_data", r#"{"q":"offline answer"}"#);
    remote.fail_next_updates(2);

    for _ in 0..2 {
        let outcome = c.persister.force_sync_now().await;
        assert!(matches!(
            outcome,
            PersistOutcome::Failed {
                transient: true,
                ..
            }
        ));
        assert_eq!(c.state.status(), SyncStatus::Dirty);
    }
    assert_eq!(c.state.error_count(), 2);
    // Version token untouched by the failed attempts.
    assert_eq!(c.store.get("assessment_version").as_deref(), Some("1"));

    // Connectivity returns: one more cycle lands everything at version + 1.
    let outcome = c.persister.force_sync_now().await;
    assert_eq!(outcome, PersistOutcome::Saved { new_version: 2 });
    assert_eq!(c.state.status(), SyncStatus::Saved);
    assert_eq!(c.state.error_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_remote_times_out_as_transient() {
    let inner = MemoryRemote::new();
    seed_row(&inner);
    let remote = Arc::new(FlakyRemote::new(inner));
    remote.delay_updates(Duration::from_secs(60));

    let store = Arc::new(TrackedStore::new(Arc::new(MemoryStore::new())));
    let state = Arc::new(SyncState::new());
    let persister = Persister::new(
        Arc::clone(&state),
        Arc::clone(&store),
        remote.clone(),
        SyncOptions::default().with_request_timeout_ms(1_000),
        survey_fragments(),
    );
    store.set_untracked("assessment_version", "1");
    store.set("dimension4_data", r#"{"q":"a"}"#);
    state.note_edit();

    let outcome = persister.force_sync_now().await;
    match outcome {
        PersistOutcome::Failed { error, transient } => {
            assert!(transient);
            assert!(error.contains("timed out"), "unexpected error: {error}");
        }
        other => panic!("expected timeout failure, got {other:?}"),
    }
    assert_eq!(state.status(), SyncStatus::Dirty);
}

#[tokio::test]
async fn first_persist_seeds_the_version_token() {
    // No local version key and no remote row yet.
    let remote = Arc::new(FlakyRemote::new(MemoryRemote::new()));
    let c = client(
        remote.clone(),
        IdentityFragments {
            user_id: Some("user-1".into()),
            survey_id: Some("SRV-A".into()),
            app_id: Some("SRVA".into()),
        },
    );

    c.store.set("firmographics_data", r#"{"size":"50-200"}"#);
    let outcome = c.persister.force_sync_now().await;

    // Row created at version 1, then the conditional write advanced it.
    assert_eq!(outcome, PersistOutcome::Saved { new_version: 2 });
    assert_eq!(c.store.get("assessment_version").as_deref(), Some("2"));

    let row = remote
        .fetch(&Lookup::UserId("user-1".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.version, 2);
    assert!(row
        .section_data(assessment_sync::Section::Firmographics)
        .is_some());
}

#[tokio::test]
async fn authenticated_persist_backfills_the_owner() {
    let inner = MemoryRemote::new();
    seed_row(&inner); // unowned row
    let remote = Arc::new(FlakyRemote::new(inner));
    let c = client(
        remote.clone(),
        IdentityFragments {
            user_id: Some("user-1".into()),
            survey_id: Some("SRV-A".into()),
            app_id: None,
        },
    );

    // No local version token: the first cycle resolves the row (falling back
    // to survey id), backfills the owner, and seeds the version before the
    // conditional write.
    c.store.set("dimension5_data", r#"{"q":"a"}"#);
    let outcome = c.persister.force_sync_now().await;
    assert_eq!(outcome, PersistOutcome::Saved { new_version: 2 });

    let row = remote
        .fetch(&Lookup::UserId("user-1".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.user_id.as_deref(), Some("user-1"));
    assert_eq!(row.version, 2);
}

#[tokio::test(start_paused = true)]
async fn stale_attempt_never_clobbers_a_later_one() {
    let inner = MemoryRemote::new();
    seed_row(&inner);
    let remote = Arc::new(FlakyRemote::new(inner));
    let c = client(remote.clone(), survey_fragments());
    c.store.set_untracked("assessment_version", "1");

    c.store.set("dimension1_data", r#"{"q":"first"}"#);
    // Let half the debounce elapse, then edit again: the first timer must
    // wake up stale and skip, the second must carry both edits.
    tokio::time::sleep(Duration::from_millis(30)).await;
    c.store.set("dimension1_data", r#"{"q":"second"}"#);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(remote.update_calls(), 1);
    let row = remote
        .fetch(&Lookup::SurveyId("SRV-A".into()))
        .await
        .unwrap()
        .unwrap();
    let blob = row
        .section_data(assessment_sync::Section::Dimension1)
        .unwrap();
    assert_eq!(blob.get("q"), Some(&serde_json::json!("second")));
}
