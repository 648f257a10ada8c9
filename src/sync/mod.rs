pub mod persister;
pub mod state;

pub use persister::{Persister, PersistOutcome};
pub use state::{ListenerId, SyncEvent, SyncEventBus, SyncState, SyncStatus};
