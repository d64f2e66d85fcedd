//! Domain entities and value types for the sync engine.

pub mod account;
pub mod entry;
pub mod errors;
pub mod newtypes;

pub use account::AccountRecord;
pub use entry::FileEntry;
pub use errors::DomainError;
pub use newtypes::{AccountId, MirrorPath};
