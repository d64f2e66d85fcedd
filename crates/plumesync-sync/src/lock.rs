//! Per-account sync locks
//!
//! Every mutating operation on an account (setup, reconciliation walk,
//! account removal) runs under that account's sync lock, so at most one
//! such operation is in flight per account at any time. The registry is an
//! explicit object with `get/create/remove` lifecycle; nothing here is a
//! process-global.
//!
//! A [`LockHandle`] is also the operation's feedback channel: `status` and
//! `update` forward [`LockEvent`]s to whoever owns the receiver (the daemon
//! surfaces them to the UI). Release is idempotent and guaranteed, either
//! explicitly or on drop, and an optional completion callback fires exactly
//! once.

use std::sync::Arc;

use dashmap::DashMap;
use plumesync_core::domain::{AccountId, MirrorPath};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::walker::Reporter;

/// Feedback emitted by a lock holder while it works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    /// Human-readable progress message ("Sync complete", ...).
    Status { account: AccountId, message: String },
    /// A path whose state just changed.
    Update { account: AccountId, path: MirrorPath },
}

/// Fail-fast acquisition found the lock already held.
#[derive(Debug, thiserror::Error)]
#[error("sync lock for account {0} is busy")]
pub struct LockBusy(pub AccountId);

/// Registry of per-account sync locks.
pub struct LockRegistry {
    slots: DashMap<AccountId, Arc<Mutex<()>>>,
    events: mpsc::Sender<LockEvent>,
}

impl LockRegistry {
    /// Creates the registry and the event channel its handles feed.
    pub fn new(event_capacity: usize) -> (Self, mpsc::Receiver<LockEvent>) {
        let (tx, rx) = mpsc::channel(event_capacity.max(1));
        (
            Self {
                slots: DashMap::new(),
                events: tx,
            },
            rx,
        )
    }

    fn slot(&self, account: &AccountId) -> Arc<Mutex<()>> {
        self.slots
            .entry(account.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquires the account's lock, queueing behind the current holder.
    pub async fn acquire(&self, account: &AccountId) -> LockHandle {
        let guard = self.slot(account).lock_owned().await;
        debug!(account = %account, "sync lock acquired");
        LockHandle::new(account.clone(), guard, self.events.clone())
    }

    /// Acquires the account's lock only if it is free right now.
    pub fn try_acquire(&self, account: &AccountId) -> Result<LockHandle, LockBusy> {
        match self.slot(account).try_lock_owned() {
            Ok(guard) => {
                debug!(account = %account, "sync lock acquired (fail-fast)");
                Ok(LockHandle::new(account.clone(), guard, self.events.clone()))
            }
            Err(_) => Err(LockBusy(account.clone())),
        }
    }

    /// Whether a slot exists for the account.
    pub fn contains(&self, account: &AccountId) -> bool {
        self.slots.contains_key(account)
    }

    /// Drops the account's slot (disconnect teardown). Refused while the
    /// lock is held, since a fresh slot would allow a second holder.
    pub fn remove(&self, account: &AccountId) -> bool {
        let removed = self
            .slots
            .remove_if(account, |_, slot| slot.try_lock().is_ok())
            .is_some();
        if removed {
            debug!(account = %account, "sync lock slot removed");
        } else {
            debug!(account = %account, "sync lock slot kept, lock is held");
        }
        removed
    }
}

/// Exclusive hold on one account's sync lock.
pub struct LockHandle {
    account: AccountId,
    guard: Option<OwnedMutexGuard<()>>,
    events: mpsc::Sender<LockEvent>,
    on_release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("account", &self.account)
            .field("held", &self.guard.is_some())
            .finish()
    }
}

impl LockHandle {
    fn new(account: AccountId, guard: OwnedMutexGuard<()>, events: mpsc::Sender<LockEvent>) -> Self {
        Self {
            account,
            guard: Some(guard),
            events,
            on_release: None,
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Registers a callback invoked exactly once when the lock is released.
    pub fn on_release(&mut self, callback: impl FnOnce() + Send + Sync + 'static) {
        self.on_release = Some(Box::new(callback));
    }

    /// Forwards a progress message. Best effort: a closed receiver drops
    /// the event rather than failing the operation.
    pub async fn status(&self, message: impl Into<String>) {
        let _ = self
            .events
            .send(LockEvent::Status {
                account: self.account.clone(),
                message: message.into(),
            })
            .await;
    }

    /// Forwards a changed-path notification. Best effort.
    pub async fn update(&self, path: MirrorPath) {
        let _ = self
            .events
            .send(LockEvent::Update {
                account: self.account.clone(),
                path,
            })
            .await;
    }

    /// Releases the lock. Safe to call more than once; the completion
    /// callback fires only on the first call.
    pub fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            debug!(account = %self.account, "sync lock released");
            if let Some(callback) = self.on_release.take() {
                callback();
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait::async_trait]
impl Reporter for LockHandle {
    async fn publish(&self, message: &str) {
        self.status(message).await;
    }

    async fn update(&self, path: &MirrorPath) {
        LockHandle::update(self, path.clone()).await;
    }
}
