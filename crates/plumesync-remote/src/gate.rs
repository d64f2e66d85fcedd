//! Request admission gate
//!
//! Caps how many agent requests run at once and enforces a minimum spacing
//! between request starts, so a burst of watcher events never lands on the
//! agent as a burst of simultaneous connections. Completion order is
//! unconstrained; only starts are spaced.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// Admission gate combining a concurrency cap with inter-start spacing.
#[derive(Debug)]
pub struct RequestGate {
    permits: Arc<Semaphore>,
    min_spacing: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl RequestGate {
    pub fn new(max_concurrent: u32, min_spacing: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1) as usize)),
            min_spacing,
            last_start: Mutex::new(None),
        }
    }

    /// Waits for a free slot and for the spacing window, then admits the
    /// caller. The returned permit must be held for the duration of the
    /// request; dropping it frees the slot.
    pub async fn admit(&self) -> anyhow::Result<OwnedSemaphorePermit> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("request gate closed")?;

        // The spacing lock is held across the sleep so concurrent admits
        // serialize their start times instead of all waking at once.
        let mut last = self.last_start.lock().await;
        if let Some(started) = *last {
            let since = started.elapsed();
            if since < self.min_spacing {
                tokio::time::sleep(self.min_spacing - since).await;
            }
        }
        *last = Some(Instant::now());
        drop(last);

        Ok(permit)
    }
}
