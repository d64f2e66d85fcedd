//! Port definitions (trait interfaces implemented by adapter crates).

pub mod account_store;
pub mod provider;
pub mod watch_control;

pub use account_store::{AccountStore, MemoryAccountStore};
pub use provider::{MemoryMirrorProvider, MirrorProvider, RecordedOp, SharedFolder};
pub use watch_control::WatchControl;
