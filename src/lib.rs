//! Client-driven sync core for the assessment survey tool.
//!
//! The local key/value store is the working copy a respondent edits; the
//! remote record store is the durable source of truth, one versioned row per
//! respondent identity. This crate owns the traffic between the two:
//!
//! - [`identity`] resolves which row a client operates on (user id → survey
//!   id → normalized app id) and backfills the owner reference additively;
//! - [`hydrate`] mirrors a server record into the local store without the
//!   writes counting as edits;
//! - [`collect`] assembles local state back into a partial record;
//! - [`sync`] debounces edits into versioned conditional writes and tracks
//!   saved/dirty/saving/conflict state;
//! - [`recovery`] provides the one-way raw-snapshot channel for forensics.
//!
//! Optimistic concurrency throughout: every write carries the version the
//! client last observed, and a mismatch is a conflict outcome — never a
//! silent overwrite, never a merge.

pub mod collect;
pub mod config;
pub mod error;
pub mod hydrate;
pub mod identity;
pub mod recovery;
pub mod remote;
pub mod store;
pub mod sync;
pub mod types;

pub use config::SyncOptions;
pub use error::{AssessmentSyncError, IdentityError, PersistError, RemoteError, Result};
pub use hydrate::{load_and_hydrate, HydrateOutcome};
pub use identity::{IdentityFragments, MatchedVia, Resolution};
pub use remote::{
    CaptureOutcome, LinkOutcome, Lookup, MemoryRemote, RemoteStore, SnapshotCapture,
    UpdateOutcome, UpdatePayload,
};
pub use store::{LocalStore, MemoryStore, TrackedStore};
pub use sync::{PersistOutcome, Persister, SyncEvent, SyncState, SyncStatus};
pub use types::{AssessmentRecord, Section};
