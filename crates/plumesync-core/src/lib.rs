//! Plumesync Core - Domain logic and port definitions
//!
//! This crate contains the shared core of the folder-sync engine:
//! - **Domain entities** - `AccountRecord`, `FileEntry`, validated newtypes
//! - **Port definitions** - Traits for adapters: `MirrorProvider`,
//!   `AccountStore`, `WatchControl`
//! - **Cancellation** - The cooperative `Continuation` predicate used by
//!   long-running walks and setup polling
//!
//! # Architecture
//!
//! The domain module holds pure business logic with no I/O. Ports define
//! trait interfaces that the remote, sync, and agent crates implement or
//! consume. The account record is the only cross-component shared mutable
//! state and is always accessed through the `AccountStore` port.

pub mod cancel;
pub mod config;
pub mod domain;
pub mod ports;
