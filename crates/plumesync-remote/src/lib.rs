//! HTTP adapter for the remote agent.
//!
//! The watcher host mirrors local changes to the canonical store through a
//! small HTTP agent. This crate provides the typed client for that surface:
//!
//! - [`client::AgentClient`]: the six-endpoint agent client with retries
//! - [`gate::RequestGate`]: concurrency cap plus minimum inter-start spacing
//! - [`retry::RetryPolicy`]: reusable capped exponential backoff

pub mod client;
pub mod gate;
pub mod retry;

pub use client::{AgentClient, AgentStatus, CallOptions, RemoteError};
pub use gate::RequestGate;
pub use retry::{Retryable, RetryPolicy};
