//! Change collector — local store → record-shaped update.
//!
//! Pure and synchronous: reads only the tracked keys, never writes, and two
//! calls without intervening edits produce identical output. Safe to call
//! from any trigger (debounce timer, manual save, unload) without
//! coordination.
//!
//! Fields whose key is absent are omitted, so a persisted update never
//! clobbers a remote field this client has no opinion about. Malformed local
//! JSON is skipped, not fatal — one corrupt blob must not block the sync of
//! seventeen healthy sections.

use tracing::warn;

use crate::store::LocalStore;
use crate::types::{keys, AssessmentRecord, Section, SectionData, TRUE_LITERAL};

/// Assemble the current local state into a partial [`AssessmentRecord`].
pub fn collect(store: &dyn LocalStore) -> AssessmentRecord {
    let mut record = AssessmentRecord::default();

    for section in Section::ALL {
        if let Some(raw) = store.get(section.local_data_key()) {
            match serde_json::from_str::<SectionData>(&raw) {
                Ok(blob) if !blob.is_empty() => {
                    record.data.insert(section, blob);
                }
                Ok(_) => {} // empty object — no opinion
                Err(e) => {
                    warn!(
                        key = section.local_data_key(),
                        error = %e,
                        "skipping malformed section data"
                    );
                }
            }
        }
        if store.get(section.local_flag_key()).as_deref() == Some(TRUE_LITERAL) {
            record.completed.insert(section);
        }
    }

    record.auth_completed = store.get(keys::AUTH_COMPLETED).as_deref() == Some(TRUE_LITERAL);
    record.payment_completed =
        store.get(keys::PAYMENT_COMPLETED).as_deref() == Some(TRUE_LITERAL);
    record.payment_method = store.get(keys::PAYMENT_METHOD);
    record.payment_date = store.get(keys::PAYMENT_DATE);

    if let Some(raw) = store.get(keys::INVOICE_DATA) {
        match serde_json::from_str(&raw) {
            Ok(value) => record.invoice_data = Some(value),
            Err(e) => warn!(error = %e, "skipping malformed invoice data"),
        }
    }
    record.invoice_number = store.get(keys::INVOICE_NUMBER);

    record.company_name = store.get(keys::COMPANY_NAME);
    record.email = store
        .get(keys::EMAIL)
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());

    record.survey_submitted =
        store.get(keys::SURVEY_SUBMITTED).as_deref() == Some(TRUE_LITERAL);
    record.employee_survey_opt_in = store
        .get(keys::OPT_IN)
        .and_then(|v| v.parse::<bool>().ok());

    record
}

/// Last version observed from the server, if the mirror holds one.
pub fn local_version(store: &dyn LocalStore) -> Option<u64> {
    store.get(keys::VERSION).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn collect_is_idempotent() {
        let store = MemoryStore::new();
        store.set("dimension3_data", r#"{"q1":"yes"}"#);
        store.set("dimension3_complete", "true");
        store.set("auth_email", "  RESPONDENT@Example.COM ");

        let first = collect(&store);
        let second = collect(&store);
        assert_eq!(first, second);
        assert_eq!(first.email.as_deref(), Some("respondent@example.com"));
        assert!(first.completed.contains(&Section::Dimension3));
    }

    #[test]
    fn malformed_json_is_skipped_not_fatal() {
        let store = MemoryStore::new();
        store.set("dimension1_data", "{not json");
        store.set("dimension2_data", r#"{"ok":1}"#);

        let record = collect(&store);
        assert!(record.section_data(Section::Dimension1).is_none());
        assert!(record.section_data(Section::Dimension2).is_some());
    }

    #[test]
    fn absent_keys_are_omitted() {
        let record = collect(&MemoryStore::new());
        assert!(record.is_empty());
        assert!(record.data.is_empty());
        assert!(record.employee_survey_opt_in.is_none());
    }

    #[test]
    fn empty_objects_carry_no_opinion() {
        let store = MemoryStore::new();
        store.set("firmographics_data", "{}");
        let record = collect(&store);
        assert!(record.data.is_empty());
    }

    #[test]
    fn flags_require_the_canonical_literal() {
        let store = MemoryStore::new();
        store.set("dimension5_complete", "TRUE");
        store.set("dimension6_complete", "true");
        let record = collect(&store);
        assert!(!record.completed.contains(&Section::Dimension5));
        assert!(record.completed.contains(&Section::Dimension6));
    }

    #[test]
    fn local_version_parses() {
        let store = MemoryStore::new();
        assert_eq!(local_version(&store), None);
        store.set("assessment_version", "7");
        assert_eq!(local_version(&store), Some(7));
        store.set("assessment_version", "junk");
        assert_eq!(local_version(&store), None);
    }
}
