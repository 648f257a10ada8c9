pub mod memory;
pub mod types;

pub use memory::MemoryRemote;
pub use types::{
    CaptureOutcome, LinkOutcome, Lookup, RemoteStore, SnapshotCapture, UpdateOutcome,
    UpdatePayload,
};
