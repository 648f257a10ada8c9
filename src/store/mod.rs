pub mod memory;
pub mod tracked;
pub mod traits;

pub use memory::MemoryStore;
pub use tracked::{HydrationGuard, StoreChange, TrackedStore};
pub use traits::LocalStore;
