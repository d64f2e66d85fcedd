//! Per-account dispatch queues
//!
//! Settled pipeline events are queued per account and drained by one worker
//! task each, so changes for an account replay in observation order while
//! accounts never block each other. The worker spaces dispatch starts to
//! avoid hammering the canonical side after a burst of edits.
//!
//! Dispatch failures are logged and skipped. The sink has already retried
//! transient errors by the time a failure surfaces here, and a later event
//! for the same path will carry the current content anyway.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use plumesync_core::domain::{AccountId, MirrorPath};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::pipeline::PipelineEvent;

/// Destination for observed local changes.
///
/// Production wires this to the remote agent client; tests record calls.
#[async_trait::async_trait]
pub trait ChangeSink: Send + Sync {
    async fn upload(
        &self,
        account: &AccountId,
        path: &MirrorPath,
        body: Vec<u8>,
        modified: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()>;

    async fn mkdir(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()>;

    async fn delete(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl ChangeSink for plumesync_remote::AgentClient {
    async fn upload(
        &self,
        account: &AccountId,
        path: &MirrorPath,
        body: Vec<u8>,
        modified: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        Ok(plumesync_remote::AgentClient::upload(self, account, path, body, modified).await?)
    }

    async fn mkdir(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()> {
        Ok(plumesync_remote::AgentClient::mkdir(self, account, path).await?)
    }

    async fn delete(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()> {
        Ok(plumesync_remote::AgentClient::delete(self, account, path).await?)
    }
}

struct AccountQueue {
    tx: mpsc::Sender<PipelineEvent>,
    capacity: usize,
}

/// Registry of per-account dispatch workers.
pub struct DispatchQueue {
    sink: Arc<dyn ChangeSink>,
    queues: DashMap<AccountId, AccountQueue>,
    capacity: usize,
    spacing: Duration,
}

impl DispatchQueue {
    pub fn new(sink: Arc<dyn ChangeSink>, capacity: usize, spacing: Duration) -> Self {
        Self {
            sink,
            queues: DashMap::new(),
            capacity: capacity.max(1),
            spacing,
        }
    }

    /// Queues an event for dispatch, spawning the account's worker on first
    /// use. A full queue drops the event with a warning.
    pub fn enqueue(&self, account: &AccountId, root: &Path, event: PipelineEvent) {
        let queue = self.queues.entry(account.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.capacity);
            let worker = Worker {
                sink: self.sink.clone(),
                account: account.clone(),
                root: root.to_path_buf(),
                spacing: self.spacing,
            };
            tokio::spawn(worker.run(rx));
            AccountQueue {
                tx,
                capacity: self.capacity,
            }
        });
        if let Err(err) = queue.tx.try_send(event) {
            warn!(account = %account, error = %err, "dispatch queue full, dropping event");
        }
    }

    /// Events queued but not yet dispatched, across every account.
    pub fn depth(&self) -> usize {
        self.queues
            .iter()
            .map(|entry| entry.value().capacity - entry.value().tx.capacity())
            .sum()
    }

    /// Stops the account's worker once it drains what is already queued.
    pub fn remove(&self, account: &AccountId) {
        if self.queues.remove(account).is_some() {
            info!(account = %account, "dispatch queue removed");
        }
    }
}

struct Worker {
    sink: Arc<dyn ChangeSink>,
    account: AccountId,
    root: PathBuf,
    spacing: Duration,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<PipelineEvent>) {
        let mut last_dispatch: Option<Instant> = None;
        while let Some(event) = rx.recv().await {
            if let Some(last) = last_dispatch {
                let next = last + self.spacing;
                if Instant::now() < next {
                    tokio::time::sleep_until(next).await;
                }
            }
            last_dispatch = Some(Instant::now());
            if let Err(err) = self.dispatch(&event).await {
                warn!(
                    account = %self.account,
                    event = ?event,
                    error = format!("{err:#}"),
                    "dispatch failed"
                );
            }
        }
        debug!(account = %self.account, "dispatch worker stopped");
    }

    async fn dispatch(&self, event: &PipelineEvent) -> anyhow::Result<()> {
        match event {
            PipelineEvent::Add { path, .. } | PipelineEvent::Change { path, .. } => {
                let local = self.root.join(path.as_rel_path());
                // the file may be gone again by the time we get here
                let body = match tokio::fs::read(&local).await {
                    Ok(body) => body,
                    Err(err) => {
                        debug!(
                            account = %self.account,
                            path = %path,
                            error = %err,
                            "file vanished before dispatch"
                        );
                        return Ok(());
                    }
                };
                let modified = tokio::fs::metadata(&local)
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from);
                self.sink.upload(&self.account, path, body, modified).await
            }
            PipelineEvent::AddDir { path } => self.sink.mkdir(&self.account, path).await,
            PipelineEvent::Unlink { path } | PipelineEvent::UnlinkDir { path } => {
                self.sink.delete(&self.account, path).await
            }
        }
    }
}
