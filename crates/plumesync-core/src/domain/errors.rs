//! Domain error types
//!
//! Validation failures for value objects and invalid account transitions.
//! Adapter-level failures (HTTP, filesystem) use `anyhow` at the port
//! boundary instead and are not classified here.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Account identifier contains characters outside the safe set
    #[error("Invalid account id: {0}")]
    InvalidAccountId(String),

    /// Mirror path is empty, absolute, or escapes the account root
    #[error("Invalid mirror path: {0}")]
    InvalidMirrorPath(String),
}
