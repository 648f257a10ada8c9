use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// RemoteError — transport/server failures
// ---------------------------------------------------------------------------

/// Classification of remote-store failures.
///
/// `Transient` failures are retried on the next sync cycle; they are never
/// escalated to a conflict. Everything else is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Network or server error, retryable.
    Transient,
    /// Not retryable (bad request, schema mismatch).
    Permanent,
    /// Authentication/authorization failure.
    Auth,
}

/// Error from the remote record store (wraps arbitrary transport messages).
#[derive(Debug, Clone, Error)]
#[error("remote store error: {message}")]
pub struct RemoteError {
    pub message: String,
    pub kind: RemoteErrorKind,
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: RemoteErrorKind::Transient,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: RemoteErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

// ---------------------------------------------------------------------------
// IdentityError
// ---------------------------------------------------------------------------

/// Identity resolution / linking failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Linking would overwrite a record already owned by a different
    /// authenticated user. Merging two respondents' data silently is the one
    /// thing this subsystem must never do, so this always aborts.
    #[error(
        "identity collision on {lookup}: record is owned by a different user \
         (attempted owner {attempted})"
    )]
    Collision { lookup: String, attempted: String },

    /// No identity fragment was available at all.
    #[error("no identity fragments available (no user id, survey id, or app id)")]
    NoFragments,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

// ---------------------------------------------------------------------------
// PersistError
// ---------------------------------------------------------------------------

/// Failures of a single persist cycle.
///
/// A version conflict is *not* represented here — it is a normal outcome of
/// the write protocol, reported through `PersistOutcome` so callers cannot
/// forget to handle it.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("persist timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("no record exists for the current identity")]
    RecordMissing,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl PersistError {
    /// Whether the next debounce cycle should simply retry.
    pub fn is_transient(&self) -> bool {
        match self {
            PersistError::Timeout { .. } => true,
            PersistError::RecordMissing => false,
            PersistError::Remote(e) => e.is_transient(),
        }
    }
}

// ---------------------------------------------------------------------------
// AssessmentSyncError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AssessmentSyncError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias — the default error type is `AssessmentSyncError`.
pub type Result<T, E = AssessmentSyncError> = std::result::Result<T, E>;

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteErrorKind::Transient => "transient",
            RemoteErrorKind::Permanent => "permanent",
            RemoteErrorKind::Auth => "auth",
        };
        f.write_str(s)
    }
}
