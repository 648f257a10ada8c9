//! Hydration and collection as a mirror pair.

use std::sync::Arc;

use parking_lot::Mutex;

use assessment_sync::collect;
use assessment_sync::hydrate::{self, HydrateOutcome};
use assessment_sync::identity::IdentityFragments;
use assessment_sync::store::StoreChange;
use assessment_sync::types::SectionData;
use assessment_sync::{AssessmentRecord, LocalStore, MemoryRemote, MemoryStore, Section, TrackedStore};

fn sample_record() -> AssessmentRecord {
    let mut record = AssessmentRecord::minimal(
        Some("user-1".into()),
        Some("SRV-A".into()),
        Some("SRVA".into()),
        Some("r@example.com".into()),
    );
    let mut blob = SectionData::new();
    blob.insert("q1".into(), serde_json::json!(["option_a", "option_b"]));
    record.data.insert(Section::Firmographics, blob);
    record.completed.insert(Section::Firmographics);
    record.auth_completed = true;
    record.company_name = Some("Acme".into());
    record.version = 4;
    record
}

#[test]
fn hydration_round_trips_through_the_collector() {
    let store = TrackedStore::new(Arc::new(MemoryStore::new()));
    let record = sample_record();
    hydrate::hydrate(&store, &record);

    let collected = collect::collect(&store);
    assert_eq!(
        collected.section_data(Section::Firmographics),
        record.section_data(Section::Firmographics)
    );
    assert!(collected.completed.contains(&Section::Firmographics));
    assert!(collected.auth_completed);
    assert_eq!(collected.company_name.as_deref(), Some("Acme"));
    assert_eq!(collected.email.as_deref(), Some("r@example.com"));
    assert_eq!(collect::local_version(&store), Some(4));
    assert_eq!(store.get("survey_id").as_deref(), Some("SRV-A"));
}

#[test]
fn hydration_is_idempotent() {
    let store = TrackedStore::new(Arc::new(MemoryStore::new()));
    let record = sample_record();

    hydrate::hydrate(&store, &record);
    let first: Vec<(String, Option<String>)> = store
        .keys()
        .into_iter()
        .map(|k| (k.clone(), store.get(&k)))
        .collect();

    hydrate::hydrate(&store, &record);
    let second: Vec<(String, Option<String>)> = store
        .keys()
        .into_iter()
        .map(|k| (k.clone(), store.get(&k)))
        .collect();
    assert_eq!(first, second);
}

#[test]
fn hydration_never_fires_edit_listeners() {
    let store = TrackedStore::new(Arc::new(MemoryStore::new()));
    let seen: Arc<Mutex<Vec<StoreChange>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    store.on_edit(move |change| sink.lock().push(change.clone()));

    hydrate::hydrate(&store, &sample_record());
    assert!(seen.lock().is_empty());

    // A real edit after hydration still notifies.
    store.set("dimension1_data", r#"{"q":"a"}"#);
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn stale_completion_flags_are_cleared() {
    let store = TrackedStore::new(Arc::new(MemoryStore::new()));
    // Leftover state from a previous respondent on this machine.
    store.set("dimension9_complete", "true");
    store.set("auth_completed", "true");

    let record = sample_record(); // completes Firmographics only
    hydrate::hydrate(&store, &record);

    assert_eq!(store.get("dimension9_complete"), None);
    assert_eq!(store.get("auth_completed").as_deref(), Some("true"));
    assert_eq!(store.get("firmographics_complete").as_deref(), Some("true"));
}

#[test]
fn stale_submission_state_is_cleared() {
    let store = TrackedStore::new(Arc::new(MemoryStore::new()));
    store.set("survey_fully_submitted", "true");
    store.set("employee_survey_opt_in", "true");

    // The hydrated record is neither submitted nor opted in.
    hydrate::hydrate(&store, &sample_record());

    assert_eq!(store.get("survey_fully_submitted"), None);
    assert_eq!(store.get("employee_survey_opt_in"), None);
    // The collector must not resurrect the stale flag onto the record.
    let collected = collect::collect(&store);
    assert!(!collected.survey_submitted);
    assert!(collected.employee_survey_opt_in.is_none());
}

#[tokio::test]
async fn load_and_hydrate_reports_not_found_without_touching_the_store() {
    let remote: Arc<MemoryRemote> = Arc::new(MemoryRemote::new());
    let store = TrackedStore::new(Arc::new(MemoryStore::new()));

    let outcome = hydrate::load_and_hydrate(
        remote,
        &store,
        &IdentityFragments {
            user_id: Some("user-x".into()),
            survey_id: None,
            app_id: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome, HydrateOutcome::NotFound);
    assert!(store.keys().is_empty());
}

#[tokio::test]
async fn load_and_hydrate_mirrors_the_resolved_record() {
    let remote = Arc::new(MemoryRemote::new());
    let mut seeded = sample_record();
    seeded.version = 0; // let the store assign
    let seeded = remote.seed(seeded);
    let store = TrackedStore::new(Arc::new(MemoryStore::new()));

    let outcome = hydrate::load_and_hydrate(
        remote,
        &store,
        &IdentityFragments {
            user_id: None,
            survey_id: Some("SRV-A".into()),
            app_id: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(
        outcome,
        HydrateOutcome::Hydrated {
            version: seeded.version
        }
    );
    assert_eq!(
        store.get("firmographics_data").as_deref(),
        Some(r#"{"q1":["option_a","option_b"]}"#)
    );
}
