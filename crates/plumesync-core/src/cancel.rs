//! Cooperative cancellation
//!
//! Long-running work (setup polling, reconciliation walks) checks a
//! [`Continuation`] before every remote mutation and between polling rounds.
//! Cancellation is pull-based: nothing interrupts a task mid-operation, the
//! task notices the reason at its next checkpoint and unwinds cleanly,
//! releasing its sync lock on the way out.

use std::time::Duration;

/// Why a long-running operation should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The account record disappeared while the operation ran.
    Disconnected,
    /// The claimed identity changed underneath the operation.
    IdentityChanged,
    /// The in-flight setup marker was cleared by another actor.
    SetupCancelled,
    /// The operation outlived its deadline.
    TimedOut,
}

impl CancelReason {
    /// Whether this reason should leave a user-visible error on the record.
    /// Benign cancellations (the user backed out, reconfigured the account's
    /// identity, or the account is gone) clear state instead of flagging it;
    /// only a timeout is worth telling the user about.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            CancelReason::Disconnected
                | CancelReason::IdentityChanged
                | CancelReason::SetupCancelled
        )
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CancelReason::Disconnected => "account disconnected",
            CancelReason::IdentityChanged => "identity changed",
            CancelReason::SetupCancelled => "setup cancelled",
            CancelReason::TimedOut => "timed out",
        };
        write!(f, "{s}")
    }
}

/// Checkpoint polled by cancellable operations.
#[async_trait::async_trait]
pub trait Continuation: Send + Sync {
    /// Returns `Some(reason)` when the operation should stop, `None` to
    /// proceed. Called before every mutating step, so implementations must
    /// be cheap.
    async fn check(&self) -> Option<CancelReason>;
}

/// Continuation that never cancels, for unconditional walks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

#[async_trait::async_trait]
impl Continuation for NeverCancel {
    async fn check(&self) -> Option<CancelReason> {
        None
    }
}

/// Continuation enforcing a wall-clock deadline on top of an inner check.
pub struct Deadline<C> {
    inner: C,
    started: std::time::Instant,
    limit: Duration,
}

impl<C: Continuation> Deadline<C> {
    pub fn new(inner: C, limit: Duration) -> Self {
        Self {
            inner,
            started: std::time::Instant::now(),
            limit,
        }
    }
}

#[async_trait::async_trait]
impl<C: Continuation> Continuation for Deadline<C> {
    async fn check(&self) -> Option<CancelReason> {
        if self.started.elapsed() >= self.limit {
            return Some(CancelReason::TimedOut);
        }
        self.inner.check().await
    }
}
