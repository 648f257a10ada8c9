//! Remote record store seam: the trait the sync core talks to, and the
//! payload/outcome types of its write protocol.
//!
//! Implementations handle actual transport (HTTP against a hosted table,
//! or [`MemoryRemote`](crate::remote::MemoryRemote) in-process). The trait is
//! deliberately narrow: every method corresponds to one documented endpoint.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::types::{normalize_app_id, AssessmentRecord};

// ============================================================================
// Lookup — the three identity forms
// ============================================================================

/// One of the three ways a record can be addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Authenticated-user id (owner back-reference).
    UserId(String),
    /// Human-facing survey identifier.
    SurveyId(String),
    /// Raw application identifier; matched after normalization.
    AppId(String),
}

impl Lookup {
    /// Application-id lookups compare normalized on both sides.
    pub fn normalized(self) -> Lookup {
        match self {
            Lookup::AppId(raw) => Lookup::AppId(normalize_app_id(&raw)),
            other => other,
        }
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::UserId(v) => write!(f, "user_id={v}"),
            Lookup::SurveyId(v) => write!(f, "survey_id={v}"),
            Lookup::AppId(v) => write!(f, "app_id={v}"),
        }
    }
}

// ============================================================================
// Write protocol
// ============================================================================

/// A versioned update: partial record plus the version the client believes is
/// current. Server-owned fields inside `fields` are ignored by any conforming
/// implementation (see [`FORBIDDEN_UPDATE_FIELDS`](crate::types::FORBIDDEN_UPDATE_FIELDS)).
#[derive(Debug, Clone)]
pub struct UpdatePayload {
    pub fields: AssessmentRecord,
    /// Version the client last observed. The store applies the update only if
    /// this still matches the stored version.
    pub expected_version: u64,
    /// Advisory provenance, recorded as `last_update_source`.
    pub source: String,
    pub client_id: Option<String>,
    /// Backfill the owner reference in the same atomic write. Rejected as an
    /// identity collision if the record is already owned by someone else.
    pub link_user_id: Option<String>,
}

/// Outcome of a versioned update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Update applied; `new_version` strictly exceeds the supplied version.
    Applied { new_version: u64 },
    /// Stored version no longer matches — nothing was written.
    Conflict { actual_version: u64 },
    /// No record matches the lookup.
    NotFound,
}

/// Outcome of an owner-backfill compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Owner field was unset; it now references the given user.
    Linked,
    /// Owner field already references this same user (lost a benign race).
    AlreadyLinked,
    /// Owner field references a *different* user. Never overwritten.
    Collision,
    NotFound,
}

// ============================================================================
// Recovery capture
// ============================================================================

/// Raw local-store snapshot for the emergency capture channel. Opaque to the
/// server: entries are not validated against the record schema.
#[derive(Debug, Clone)]
pub struct SnapshotCapture {
    pub survey_id: String,
    pub entries: BTreeMap<String, String>,
    pub client_id: Option<String>,
}

/// Outcome of a capture attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Accepted,
    Rejected { reason: String },
}

// ============================================================================
// RemoteStore trait
// ============================================================================

/// The remote record store — single source of truth, one row per respondent.
///
/// All calls are suspension points and should be wrapped in a timeout by the
/// caller; local-store I/O never is.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the full current record, or `None` if no row matches. `None` is
    /// a valid state (the respondent has no record yet), not an error.
    async fn fetch(&self, lookup: &Lookup) -> Result<Option<AssessmentRecord>, RemoteError>;

    /// Create a new record (first authorization). The store assigns `id`,
    /// `version = 1`, and timestamps; returns the stored row.
    async fn create(&self, record: &AssessmentRecord) -> Result<AssessmentRecord, RemoteError>;

    /// Versioned update. Atomically checks `expected_version` against the
    /// stored version and applies the partial record only on a match.
    async fn update(
        &self,
        lookup: &Lookup,
        payload: &UpdatePayload,
    ) -> Result<UpdateOutcome, RemoteError>;

    /// Compare-and-set owner backfill: links `user_id` onto the record only
    /// if the owner field is unset at write time.
    async fn link_owner(
        &self,
        lookup: &Lookup,
        user_id: &str,
    ) -> Result<LinkOutcome, RemoteError>;

    /// Append an allow-listed raw snapshot to the audit store. One-way: the
    /// sync core never reads captures back.
    async fn capture_snapshot(
        &self,
        capture: &SnapshotCapture,
    ) -> Result<CaptureOutcome, RemoteError>;
}
