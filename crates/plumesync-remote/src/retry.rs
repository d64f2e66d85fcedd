//! Capped exponential backoff
//!
//! One retry policy shared by every caller that talks to the remote side:
//! the agent client, the reconciliation walker, and the setup poller each
//! construct a preset instead of hand-rolling their own loop. Only errors
//! the [`Retryable`] impl classifies as transient are retried; everything
//! else returns immediately.

use std::time::Duration;

use tracing::{info, warn};

/// Classifies errors into transient (worth retrying) and fatal.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Heuristic classification for untyped errors, based on the rendered chain.
impl Retryable for anyhow::Error {
    fn is_retryable(&self) -> bool {
        let rendered = format!("{self:#}").to_lowercase();
        rendered.contains("timeout")
            || rendered.contains("connection")
            || rendered.contains("network")
            || rendered.contains("reset by peer")
            || rendered.contains("broken pipe")
            || rendered.contains("429")
            || rendered.contains("too many requests")
            || rendered.contains("502")
            || rendered.contains("503")
            || rendered.contains("504")
            || rendered.contains("server error")
    }
}

/// Retry schedule: up to `attempts` tries with capped exponential delays
/// between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Preset for individual agent requests: 3 attempts, 1s doubling,
    /// capped at 10s.
    pub fn remote_call() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(10))
    }

    /// Preset for per-operation retries inside a reconciliation walk:
    /// 3 attempts, 2s doubling, capped at 10s.
    pub fn walk_op() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(10))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Same schedule with a different attempt budget.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Delay to sleep after the `failed_attempt`-th failure (1-based).
    /// Doubles per failure and never decreases: `min(base * 2^(n-1), cap)`.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let shift = failed_attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }

    /// Runs `f` until it succeeds, returns a fatal error, or the attempt
    /// budget is spent. The last error is returned unchanged so callers can
    /// tell exhaustion (a retryable error) from a fatal failure.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, f: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if attempt >= self.attempts || !err.is_retryable() {
                        return Err(err);
                    }
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
