//! Record loader/hydrator — server record → local store.
//!
//! Hydration is the only path that writes server data into the local mirror.
//! The entry batch is built first as a pure value, then applied in one pass
//! under the hydration guard, so a failure while building never leaves a
//! partially hydrated store and the dirty tracker never observes the writes
//! as user edits.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::IdentityError;
use crate::identity::{self, IdentityFragments, Resolution};
use crate::remote::RemoteStore;
use crate::store::{LocalStore, TrackedStore};
use crate::types::{keys, AssessmentRecord, Section, TRUE_LITERAL};

/// One hydration write: `Some` sets the key, `None` removes it. Completion
/// flags are explicitly removed when the server says a section is not
/// complete — otherwise a stale `"true"` would stick in the mirror forever.
pub type HydrationEntry = (String, Option<String>);

/// Outcome of a load-and-hydrate cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrateOutcome {
    /// Record found and mirrored; carries the hydrated version.
    Hydrated { version: u64 },
    /// No record for this identity — proceed with default/empty state.
    NotFound,
}

/// Build the full hydration batch for a record. Pure; same record in, same
/// batch out.
pub fn record_to_entries(record: &AssessmentRecord) -> Vec<HydrationEntry> {
    let mut entries: Vec<HydrationEntry> = Vec::new();

    for section in Section::ALL {
        if let Some(blob) = record.section_data(section) {
            let json = serde_json::to_string(blob).unwrap_or_default();
            if !json.is_empty() {
                entries.push((section.local_data_key().to_string(), Some(json)));
            }
        }
        let flag = section.local_flag_key().to_string();
        if record.completed.contains(&section) {
            entries.push((flag, Some(TRUE_LITERAL.to_string())));
        } else {
            entries.push((flag, None));
        }
    }

    if record.auth_completed {
        entries.push((keys::AUTH_COMPLETED.to_string(), Some(TRUE_LITERAL.to_string())));
    } else {
        entries.push((keys::AUTH_COMPLETED.to_string(), None));
    }

    if record.payment_completed {
        entries.push((keys::PAYMENT_COMPLETED.to_string(), Some(TRUE_LITERAL.to_string())));
    } else {
        entries.push((keys::PAYMENT_COMPLETED.to_string(), None));
    }
    if let Some(v) = &record.payment_method {
        entries.push((keys::PAYMENT_METHOD.to_string(), Some(v.clone())));
    }
    if let Some(v) = &record.payment_date {
        entries.push((keys::PAYMENT_DATE.to_string(), Some(v.clone())));
    }

    if let Some(v) = &record.invoice_data {
        entries.push((
            keys::INVOICE_DATA.to_string(),
            Some(serde_json::to_string(v).unwrap_or_default()),
        ));
    }
    if let Some(v) = &record.invoice_number {
        entries.push((keys::INVOICE_NUMBER.to_string(), Some(v.clone())));
    }

    if let Some(v) = &record.company_name {
        entries.push((keys::COMPANY_NAME.to_string(), Some(v.clone())));
    }
    if let Some(v) = &record.email {
        entries.push((keys::EMAIL.to_string(), Some(v.clone())));
    }

    if record.survey_submitted {
        entries.push((keys::SURVEY_SUBMITTED.to_string(), Some(TRUE_LITERAL.to_string())));
    } else {
        // Same anti-sticky rule as the completion flags: a leftover "true"
        // from a previous respondent must not survive hydration.
        entries.push((keys::SURVEY_SUBMITTED.to_string(), None));
    }
    match record.employee_survey_opt_in {
        Some(v) => entries.push((keys::OPT_IN.to_string(), Some(v.to_string()))),
        None => entries.push((keys::OPT_IN.to_string(), None)),
    }

    // Identity meta: the survey id the rest of the client navigates by.
    if let Some(v) = record.survey_id.as_ref().or(record.app_id.as_ref()) {
        entries.push((keys::SURVEY_ID.to_string(), Some(v.clone())));
    }

    if record.version > 0 {
        entries.push((keys::VERSION.to_string(), Some(record.version.to_string())));
    }

    entries
}

/// Write a record into the local store under the hydration guard.
pub fn hydrate(store: &TrackedStore, record: &AssessmentRecord) {
    let entries = record_to_entries(record);
    let _guard = store.begin_hydration();
    let mut written = 0usize;
    for (key, value) in &entries {
        match value {
            Some(v) => {
                store.set(key, v);
                written += 1;
            }
            None => store.remove(key),
        }
    }
    debug!(written, version = record.version, "hydrated local store");
}

/// Resolve the identity and mirror the record locally.
///
/// `NotFound` is a valid outcome, not an error: the caller proceeds with
/// empty state. Remote failures propagate without touching the store.
pub async fn load_and_hydrate(
    remote: Arc<dyn RemoteStore>,
    store: &TrackedStore,
    fragments: &IdentityFragments,
) -> Result<HydrateOutcome, IdentityError> {
    match identity::resolve(remote.as_ref(), fragments).await? {
        Resolution::Found { record, matched_via, .. } => {
            info!(?matched_via, version = record.version, "loaded record, hydrating");
            hydrate(store, &record);
            Ok(HydrateOutcome::Hydrated {
                version: record.version,
            })
        }
        Resolution::None => Ok(HydrateOutcome::NotFound),
    }
}
