//! Identity resolution — which record does this client operate on?
//!
//! A client may hold up to three identity fragments: an authenticated-user
//! id, a locally cached survey id, and a raw application id. `resolve` turns
//! whatever is available into the one record to use, as a total function:
//! found (with provenance), not found, or a collision error. The backfill
//! rule lives here in one place so the "never overwrite a different owner"
//! invariant is checkable in one place.

use tracing::{debug, info, warn};

use crate::error::IdentityError;
use crate::remote::{LinkOutcome, Lookup, RemoteStore};
use crate::store::LocalStore;
use crate::types::{keys, normalize_app_id, AssessmentRecord};

/// Identity fragments available in the current client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFragments {
    /// Authenticated-user id, if logged in.
    pub user_id: Option<String>,
    /// Locally cached survey id.
    pub survey_id: Option<String>,
    /// Raw application id string (normalized before lookup).
    pub app_id: Option<String>,
}

impl IdentityFragments {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.survey_id.is_none() && self.app_id.is_none()
    }

    /// The lookup chain, in priority order.
    fn chain(&self) -> Vec<Lookup> {
        let mut chain = Vec::new();
        if let Some(u) = &self.user_id {
            chain.push(Lookup::UserId(u.clone()));
        }
        if let Some(s) = &self.survey_id {
            chain.push(Lookup::SurveyId(s.clone()));
        }
        if let Some(a) = &self.app_id {
            chain.push(Lookup::AppId(normalize_app_id(a)));
        }
        chain
    }
}

/// Which branch of the fallback chain found the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedVia {
    UserId,
    SurveyId,
    AppId,
}

/// Result of identity resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found {
        record: AssessmentRecord,
        matched_via: MatchedVia,
        /// Whether the owner reference was backfilled during this resolution.
        linked: bool,
    },
    /// No record exists for any fragment — caller should create one.
    None,
}

/// Resolve the record for the given fragments.
///
/// Tries user id, then survey id, then normalized app id. When the record is
/// found via a fallback branch and an authenticated-user id is available but
/// absent from the record, the owner reference is backfilled with a
/// compare-and-set so future sessions resolve in one step. A record owned by
/// a *different* user is an [`IdentityError::Collision`] — never a merge.
pub async fn resolve(
    remote: &dyn RemoteStore,
    fragments: &IdentityFragments,
) -> Result<Resolution, IdentityError> {
    if fragments.is_empty() {
        return Err(IdentityError::NoFragments);
    }

    for lookup in fragments.chain() {
        let Some(mut record) = remote.fetch(&lookup).await? else {
            continue;
        };
        let matched_via = match &lookup {
            Lookup::UserId(_) => MatchedVia::UserId,
            Lookup::SurveyId(_) => MatchedVia::SurveyId,
            Lookup::AppId(_) => MatchedVia::AppId,
        };
        debug!(%lookup, "record resolved");

        // Backfill the owner reference when the record was reached through a
        // fallback branch. Additive only: a different existing owner aborts.
        let mut linked = false;
        if matched_via != MatchedVia::UserId {
            if let Some(user_id) = &fragments.user_id {
                match &record.user_id {
                    None => match remote.link_owner(&lookup, user_id).await? {
                        LinkOutcome::Linked => {
                            record.user_id = Some(user_id.clone());
                            linked = true;
                            info!(%lookup, "owner backfilled onto record");
                        }
                        LinkOutcome::AlreadyLinked => {
                            record.user_id = Some(user_id.clone());
                        }
                        LinkOutcome::Collision => {
                            warn!(%lookup, "owner backfill lost to a different user");
                            return Err(IdentityError::Collision {
                                lookup: lookup.to_string(),
                                attempted: user_id.clone(),
                            });
                        }
                        // Row vanished between fetch and link; treat the
                        // fetch result as authoritative and move on unlinked.
                        LinkOutcome::NotFound => {}
                    },
                    Some(owner) if owner == user_id => {}
                    Some(_) => {
                        return Err(IdentityError::Collision {
                            lookup: lookup.to_string(),
                            attempted: user_id.clone(),
                        });
                    }
                }
            }
        }

        return Ok(Resolution::Found {
            record,
            matched_via,
            linked,
        });
    }

    debug!("no record found for any identity fragment");
    Ok(Resolution::None)
}

/// Resolve, creating a minimal record (identity fields only) when nothing
/// exists yet — the first-authorization path.
pub async fn ensure_record(
    remote: &dyn RemoteStore,
    fragments: &IdentityFragments,
    email: Option<String>,
) -> Result<AssessmentRecord, IdentityError> {
    match resolve(remote, fragments).await? {
        Resolution::Found { record, .. } => Ok(record),
        Resolution::None => {
            let minimal = AssessmentRecord::minimal(
                fragments.user_id.clone(),
                fragments.survey_id.clone(),
                fragments
                    .app_id
                    .clone()
                    .or_else(|| fragments.survey_id.clone()),
                email,
            );
            let created = remote.create(&minimal).await?;
            info!(id = created.id.as_deref(), "created record on first authorization");
            Ok(created)
        }
    }
}

/// Derive identity fragments from the local store's meta keys.
pub fn current_identity(store: &dyn LocalStore, user_id: Option<String>) -> IdentityFragments {
    let survey_id = store.get(keys::SURVEY_ID);
    IdentityFragments {
        user_id,
        app_id: survey_id.as_deref().map(normalize_app_id),
        survey_id,
    }
}
