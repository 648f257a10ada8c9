//! Recovery capture — the emergency raw-snapshot channel.
//!
//! When the normal sync path is suspected of losing answers, a raw copy of
//! the tracked local keys can be appended to a server-side audit log for
//! manual inspection. The channel is deliberately one-way and dumb: entries
//! are captured verbatim, never validated against the record schema, and
//! never replayed automatically.
//!
//! Only tracked keys are captured. The local store may hold unrelated
//! application state, and shipping it wholesale would turn a forensic tool
//! into a privacy hole.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::RemoteError;
use crate::remote::{CaptureOutcome, RemoteStore, SnapshotCapture};
use crate::store::LocalStore;
use crate::types::{keys, AssessmentRecord, Section};

/// Keys eligible for recovery capture: every section data/flag key plus the
/// sync meta keys.
pub fn tracked_keys() -> Vec<&'static str> {
    let mut out: Vec<&'static str> = Vec::with_capacity(Section::ALL.len() * 2 + 12);
    for section in Section::ALL {
        out.push(section.local_data_key());
        out.push(section.local_flag_key());
    }
    out.extend([
        keys::SURVEY_ID,
        keys::EMAIL,
        keys::COMPANY_NAME,
        keys::AUTH_COMPLETED,
        keys::PAYMENT_COMPLETED,
        keys::PAYMENT_METHOD,
        keys::PAYMENT_DATE,
        keys::INVOICE_DATA,
        keys::INVOICE_NUMBER,
        keys::SURVEY_SUBMITTED,
        keys::OPT_IN,
        keys::VERSION,
    ]);
    out
}

/// Raw dump of the tracked keys currently present in the store.
pub fn snapshot_entries(store: &dyn LocalStore) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for key in tracked_keys() {
        if let Some(value) = store.get(key) {
            entries.insert(key.to_string(), value);
        }
    }
    entries
}

/// Capture the current local state to the server-side audit log.
///
/// Requires a survey id in the store (the server gates the channel by survey
/// id). Rejection — unauthorized id or oversized payload — is an outcome,
/// not an error; transport failures propagate.
pub async fn capture_recovery(
    remote: &dyn RemoteStore,
    store: &dyn LocalStore,
    client_id: Option<String>,
) -> Result<CaptureOutcome, RemoteError> {
    let Some(survey_id) = store.get(keys::SURVEY_ID) else {
        warn!("recovery capture skipped: no survey id in local store");
        return Ok(CaptureOutcome::Rejected {
            reason: "no survey id available".to_string(),
        });
    };

    let capture = SnapshotCapture {
        survey_id: survey_id.clone(),
        entries: snapshot_entries(store),
        client_id,
    };
    let outcome = remote.capture_snapshot(&capture).await?;
    match &outcome {
        CaptureOutcome::Accepted => {
            info!(%survey_id, entries = capture.entries.len(), "recovery snapshot captured")
        }
        CaptureOutcome::Rejected { reason } => {
            warn!(%survey_id, reason, "recovery snapshot rejected")
        }
    }
    Ok(outcome)
}

// ============================================================================
// Answer fingerprinting
// ============================================================================

/// Stable fingerprint over a record's answer content (section data blobs
/// only — versions, timestamps, and process flags are excluded so two records
/// with identical answers hash identically regardless of sync history).
///
/// Stability comes from `BTreeMap` iteration order plus `serde_json`'s
/// order-preserving map serialization: same answers, same bytes, same hash.
pub fn answers_hash(record: &AssessmentRecord) -> String {
    let canonical: BTreeMap<&str, String> = record
        .data
        .iter()
        .filter(|(_, blob)| !blob.is_empty())
        .map(|(section, blob)| {
            (
                section.data_column(),
                serde_json::to_string(blob).unwrap_or_default(),
            )
        })
        .collect();

    let mut hasher = Sha256::new();
    for (column, json) in &canonical {
        hasher.update(column.as_bytes());
        hasher.update(b"\0");
        hasher.update(json.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

/// Whether two records carry different answer content.
pub fn answers_diverge(local: &AssessmentRecord, remote: &AssessmentRecord) -> bool {
    answers_hash(local) != answers_hash(remote)
}
