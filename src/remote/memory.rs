//! MemoryRemote — in-process reference implementation of the remote store.
//!
//! Carries the full server-side contract: version compare-and-set, forbidden
//! field stripping, owner-link CAS, provenance stamping, and the allow-listed
//! recovery capture log. Every other component is tested against it.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::types::{normalize_app_id, AssessmentRecord};

use super::types::{
    CaptureOutcome, LinkOutcome, Lookup, RemoteStore, SnapshotCapture, UpdateOutcome,
    UpdatePayload,
};

/// Upper bound on a serialized snapshot payload (1 MB).
pub const MAX_SNAPSHOT_BYTES: usize = 1_000_000;

/// One appended recovery snapshot (forensic copy, never replayed).
#[derive(Debug, Clone)]
pub struct CapturedSnapshot {
    pub survey_id: String,
    pub captured_at: String,
    pub client_id: Option<String>,
    pub payload: String,
}

struct Inner {
    rows: Vec<AssessmentRecord>,
    captures: Vec<CapturedSnapshot>,
    next_id: u64,
}

/// In-memory remote record store.
pub struct MemoryRemote {
    inner: Mutex<Inner>,
    capture_allow_list: HashSet<String>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                rows: Vec::new(),
                captures: Vec::new(),
                next_id: 1,
            }),
            capture_allow_list: HashSet::new(),
        }
    }

    /// Allow the given survey ids to use the recovery capture channel.
    pub fn with_capture_allow_list(ids: impl IntoIterator<Item = String>) -> Self {
        let mut remote = Self::new();
        remote.capture_allow_list = ids.into_iter().collect();
        remote
    }

    /// Insert a row directly (test seeding / fixtures). Assigns an id and a
    /// starting version if the record carries none.
    pub fn seed(&self, mut record: AssessmentRecord) -> AssessmentRecord {
        let mut inner = self.inner.lock();
        if record.id.is_none() {
            record.id = Some(format!("rec-{}", inner.next_id));
            inner.next_id += 1;
        }
        if record.version == 0 {
            record.version = 1;
        }
        inner.rows.push(record.clone());
        record
    }

    /// Appended recovery snapshots, oldest first.
    pub fn captures(&self) -> Vec<CapturedSnapshot> {
        self.inner.lock().captures.clone()
    }

    fn find_index(rows: &[AssessmentRecord], lookup: &Lookup) -> Option<usize> {
        rows.iter().position(|row| match lookup {
            Lookup::UserId(u) => row.user_id.as_deref() == Some(u.as_str()),
            Lookup::SurveyId(s) => row.survey_id.as_deref() == Some(s.as_str()),
            Lookup::AppId(a) => {
                let probe = normalize_app_id(a);
                row.app_id.as_deref().map(normalize_app_id).as_deref() == Some(probe.as_str())
            }
        })
    }

    /// Apply a partial record onto a row. Server-owned fields in the payload
    /// are ignored; flags are additive (only `true` is ever sent).
    fn apply_fields(row: &mut AssessmentRecord, fields: &AssessmentRecord) {
        for (section, blob) in &fields.data {
            if !blob.is_empty() {
                row.data.insert(*section, blob.clone());
            }
        }
        for section in &fields.completed {
            row.completed.insert(*section);
        }
        if fields.auth_completed {
            row.auth_completed = true;
        }
        if fields.payment_completed {
            row.payment_completed = true;
        }
        if fields.survey_submitted {
            row.survey_submitted = true;
        }
        if let Some(v) = &fields.email {
            row.email = Some(v.clone());
        }
        if let Some(v) = &fields.company_name {
            row.company_name = Some(v.clone());
        }
        if let Some(v) = &fields.payment_method {
            row.payment_method = Some(v.clone());
        }
        if let Some(v) = fields.payment_amount {
            row.payment_amount = Some(v);
        }
        if let Some(v) = &fields.payment_date {
            row.payment_date = Some(v.clone());
        }
        if let Some(v) = &fields.invoice_data {
            row.invoice_data = Some(v.clone());
        }
        if let Some(v) = &fields.invoice_number {
            row.invoice_number = Some(v.clone());
        }
        if let Some(v) = &fields.submitted_at {
            row.submitted_at = Some(v.clone());
        }
        if let Some(v) = fields.employee_survey_opt_in {
            row.employee_survey_opt_in = Some(v);
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch(&self, lookup: &Lookup) -> Result<Option<AssessmentRecord>, RemoteError> {
        let inner = self.inner.lock();
        Ok(Self::find_index(&inner.rows, lookup).map(|i| inner.rows[i].clone()))
    }

    async fn create(&self, record: &AssessmentRecord) -> Result<AssessmentRecord, RemoteError> {
        let now = now_rfc3339();
        let mut inner = self.inner.lock();
        let mut row = record.clone();
        row.id = Some(format!("rec-{}", inner.next_id));
        inner.next_id += 1;
        row.app_id = row.app_id.as_deref().map(normalize_app_id);
        row.version = 1;
        row.created_at = Some(now.clone());
        row.updated_at = Some(now);
        inner.rows.push(row.clone());
        debug!(id = row.id.as_deref(), "created record");
        Ok(row)
    }

    async fn update(
        &self,
        lookup: &Lookup,
        payload: &UpdatePayload,
    ) -> Result<UpdateOutcome, RemoteError> {
        let mut inner = self.inner.lock();
        let Some(index) = Self::find_index(&inner.rows, lookup) else {
            return Ok(UpdateOutcome::NotFound);
        };
        let row = &mut inner.rows[index];

        if row.version != payload.expected_version {
            warn!(
                %lookup,
                expected = payload.expected_version,
                actual = row.version,
                "version conflict, update not applied"
            );
            return Ok(UpdateOutcome::Conflict {
                actual_version: row.version,
            });
        }

        // Owner backfill is folded into the same atomic write, conditioned on
        // the owner field being unset. A different existing owner aborts the
        // whole update: that is an integrity problem, not a merge.
        if let Some(link) = &payload.link_user_id {
            match &row.user_id {
                None => row.user_id = Some(link.clone()),
                Some(owner) if owner == link => {}
                Some(_) => {
                    return Err(RemoteError::permanent(format!(
                        "identity collision on {lookup}: record already owned by a different user"
                    )));
                }
            }
        }

        Self::apply_fields(row, &payload.fields);
        row.version += 1;
        row.updated_at = Some(now_rfc3339());
        row.last_update_source = Some(payload.source.clone());
        row.last_update_client_id = payload.client_id.clone();

        debug!(%lookup, new_version = row.version, "update applied");
        Ok(UpdateOutcome::Applied {
            new_version: row.version,
        })
    }

    async fn link_owner(
        &self,
        lookup: &Lookup,
        user_id: &str,
    ) -> Result<LinkOutcome, RemoteError> {
        let mut inner = self.inner.lock();
        let Some(index) = Self::find_index(&inner.rows, lookup) else {
            return Ok(LinkOutcome::NotFound);
        };
        let row = &mut inner.rows[index];
        match &row.user_id {
            None => {
                row.user_id = Some(user_id.to_string());
                row.updated_at = Some(now_rfc3339());
                debug!(%lookup, user_id, "owner linked");
                Ok(LinkOutcome::Linked)
            }
            Some(owner) if owner == user_id => Ok(LinkOutcome::AlreadyLinked),
            Some(_) => {
                warn!(%lookup, attempted = user_id, "owner link collision");
                Ok(LinkOutcome::Collision)
            }
        }
    }

    async fn capture_snapshot(
        &self,
        capture: &SnapshotCapture,
    ) -> Result<CaptureOutcome, RemoteError> {
        if !self.capture_allow_list.contains(&capture.survey_id) {
            warn!(survey_id = %capture.survey_id, "capture rejected: not allow-listed");
            return Ok(CaptureOutcome::Rejected {
                reason: "survey id not authorized for recovery capture".to_string(),
            });
        }

        let payload = serde_json::to_string(&capture.entries)
            .map_err(|e| RemoteError::permanent(format!("unencodable snapshot: {e}")))?;
        if payload.len() > MAX_SNAPSHOT_BYTES {
            return Ok(CaptureOutcome::Rejected {
                reason: "snapshot payload too large".to_string(),
            });
        }

        let mut inner = self.inner.lock();
        inner.captures.push(CapturedSnapshot {
            survey_id: capture.survey_id.clone(),
            captured_at: now_rfc3339(),
            client_id: capture.client_id.clone(),
            payload,
        });
        debug!(survey_id = %capture.survey_id, "snapshot captured");
        Ok(CaptureOutcome::Accepted)
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
