//! Synchronization engine: per-account locks, the reconciliation walker,
//! and the account setup state machine.
//!
//! ## Architecture
//!
//! ```text
//!   setup::SetupRunner ──acquires──> lock::LockRegistry
//!        │                                 │
//!        │ claims folder,                  │ LockHandle (status/update sink)
//!        │ runs initial Pull               ▼
//!        └───────────> walker::Walker ──mutates──> MirrorProvider
//! ```
//!
//! All mutating work happens under the account's sync lock; the walker and
//! setup runner check a [`plumesync_core::cancel::Continuation`] before
//! every mutating step so cancellation never leaves a half-applied
//! operation behind.

pub mod lock;
pub mod setup;
pub mod walker;

pub use lock::{LockBusy, LockEvent, LockHandle, LockRegistry};
pub use setup::{SetupOptions, SetupRunner};
pub use walker::{Direction, NullReporter, Reporter, WalkReport, Walker};
