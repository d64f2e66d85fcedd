//! Account setup state machine
//!
//! Connecting an account means waiting for the user to share a folder with
//! the service identity, claiming the first qualifying folder, running the
//! one-time initial transfer (a Pull walk), and handing the account over to
//! the watcher host.
//!
//! A folder qualifies when it is owned by the claimed identity, not claimed
//! by another account, parentless, empty, and writable. Near misses set
//! diagnostic flags on the record (so the UI can explain what is wrong)
//! without recording errors, and polling continues.
//!
//! The whole procedure runs under the account's sync lock and re-checks a
//! continuation between steps: the user cancelling (`preparing` flipped
//! off), the identity changing, the account disappearing, or the wall-clock
//! timeout all unwind the attempt. `preparing` is cleared and the lock
//! released on every exit path.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use chrono::Utc;
use plumesync_core::cancel::{CancelReason, Continuation};
use plumesync_core::config::SyncConfig;
use plumesync_core::domain::AccountId;
use plumesync_core::ports::{AccountStore, MirrorProvider, SharedFolder, WatchControl};
use tracing::{error, info, warn};

use crate::lock::{LockHandle, LockRegistry};
use crate::walker::{Direction, Walker};

/// Timing knobs for a setup attempt.
#[derive(Debug, Clone, Copy)]
pub struct SetupOptions {
    /// Delay between shared-folder polling rounds.
    pub poll_interval: Duration,
    /// Wall-clock budget for the whole attempt.
    pub timeout: Duration,
}

impl SetupOptions {
    /// Builds the timing knobs from the `sync` section of the configuration.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.setup_poll_interval),
            timeout: Duration::from_secs(config.setup_timeout_minutes * 60),
        }
    }
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Drives the setup procedure for one account at a time.
pub struct SetupRunner {
    store: Arc<dyn AccountStore>,
    provider: Arc<dyn MirrorProvider>,
    locks: Arc<LockRegistry>,
    watch_control: Arc<dyn WatchControl>,
    walker: Walker,
    options: SetupOptions,
}

impl SetupRunner {
    pub fn new(
        store: Arc<dyn AccountStore>,
        provider: Arc<dyn MirrorProvider>,
        locks: Arc<LockRegistry>,
        watch_control: Arc<dyn WatchControl>,
        walker: Walker,
        options: SetupOptions,
    ) -> Self {
        Self {
            store,
            provider,
            locks,
            watch_control,
            walker,
            options,
        }
    }

    /// Runs setup for `account`, queueing behind any current lock holder.
    ///
    /// Handled cancellations (user backed out, timeout, ...) return `Ok`;
    /// their outcome is visible on the account record. `Err` means an
    /// unexpected failure, which is also recorded on the record when the
    /// account still exists.
    pub async fn run(&self, account: &AccountId, local_root: &Path) -> anyhow::Result<()> {
        let mut handle = self.locks.acquire(account).await;
        let outcome = self.run_locked(account, local_root, &handle).await;

        if let Err(err) = &outcome {
            error!(
                account = %account,
                error = format!("{err:#}"),
                "setup failed"
            );
            if let Ok(Some(mut record)) = self.store.get(account).await {
                // keep a more specific error if one was already recorded
                if record.error().is_none() {
                    record.record_error(format!("Setup failed: {err}"));
                }
                if let Err(store_err) = self.store.store(&record).await {
                    warn!(account = %account, error = %store_err, "recording setup error failed");
                }
            }
        }

        // preparing is cleared on every exit path
        if let Ok(Some(mut record)) = self.store.get(account).await {
            record.end_setup();
            record.set_transferring(false);
            if let Err(err) = self.store.store(&record).await {
                warn!(account = %account, error = %err, "clearing setup marker failed");
            }
        }
        handle.release();
        outcome
    }

    async fn run_locked(
        &self,
        account: &AccountId,
        local_root: &Path,
        handle: &LockHandle,
    ) -> anyhow::Result<()> {
        let mut record = self
            .store
            .get(account)
            .await?
            .with_context(|| format!("unknown account {account}"))?;
        let email = record
            .email()
            .map(str::to_string)
            .with_context(|| format!("account {account} has no claimed identity"))?;
        let identity = record
            .service_account_id()
            .unwrap_or(&email)
            .to_string();

        record.begin_setup(Utc::now());
        self.store.store(&record).await?;
        handle.status("Waiting for a shared folder").await;
        info!(account = %account, email = %email, "setup started");

        let continuation = SetupContinuation {
            store: self.store.clone(),
            account: account.clone(),
            email: email.clone(),
            started: Instant::now(),
            timeout: self.options.timeout,
        };

        // poll until a folder qualifies or the continuation stops us
        let folder = loop {
            if let Some(reason) = continuation.check().await {
                return self.handle_cancel(account, reason).await;
            }
            match self.poll_once(account, &email, &identity).await {
                Ok(Some(folder)) => break folder,
                Ok(None) => {}
                Err(err) => warn!(
                    account = %account,
                    error = format!("{err:#}"),
                    "shared-folder poll failed"
                ),
            }
            tokio::time::sleep(self.options.poll_interval).await;
        };

        let Some(mut record) = self.store.get(account).await? else {
            return self.handle_cancel(account, CancelReason::Disconnected).await;
        };
        record.claim_folder(&folder.id, &folder.name);
        record.set_transferring(true);
        self.store.store(&record).await?;
        info!(account = %account, folder_id = %folder.id, folder = %folder.name, "claimed shared folder");
        handle
            .status(&format!("Transferring \"{}\"", folder.name))
            .await;

        tokio::fs::create_dir_all(local_root)
            .await
            .with_context(|| format!("creating local root {}", local_root.display()))?;
        let report = self
            .walker
            .run(account, local_root, Direction::Pull, &continuation, handle)
            .await;
        if let Some(reason) = report.cancelled {
            return self.handle_cancel(account, reason).await;
        }

        let Some(mut record) = self.store.get(account).await? else {
            return self.handle_cancel(account, CancelReason::Disconnected).await;
        };
        if !report.succeeded() {
            record.set_transferring(false);
            record.record_error("Initial transfer failed");
            self.store.store(&record).await?;
            anyhow::bail!("initial transfer for {account} failed");
        }
        record.mark_setup_complete();
        self.store.store(&record).await?;

        self.watch_control
            .watch(account)
            .await
            .context("starting folder watch")?;
        info!(account = %account, "setup complete");
        Ok(())
    }

    /// One shared-folder listing round. Returns the first qualifying folder
    /// and records diagnostics for near misses.
    async fn poll_once(
        &self,
        account: &AccountId,
        email: &str,
        identity: &str,
    ) -> anyhow::Result<Option<SharedFolder>> {
        let folders = self.provider.list_shared_folders(identity).await?;
        let claimed_elsewhere: HashSet<String> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|r| r.id() != account)
            .filter_map(|r| r.folder_id().map(String::from))
            .collect();

        let mut non_empty_seen = false;
        let mut non_editor_seen = false;
        let mut qualifying = None;

        for folder in folders {
            if folder.owner_email != email
                || folder.has_parent
                || claimed_elsewhere.contains(&folder.id)
            {
                continue;
            }
            if !folder.writable {
                non_editor_seen = true;
                continue;
            }
            if !folder.is_empty {
                non_empty_seen = true;
                continue;
            }
            qualifying = Some(folder);
            break;
        }

        // near misses become diagnostic flags, never errors
        if qualifying.is_none() && (non_empty_seen || non_editor_seen) {
            if let Some(mut record) = self.store.get(account).await? {
                if non_empty_seen != record.non_empty_folder_shared()
                    || non_editor_seen != record.non_editor_permissions()
                {
                    record.set_non_empty_folder_shared(non_empty_seen);
                    record.set_non_editor_permissions(non_editor_seen);
                    self.store.store(&record).await?;
                }
            }
        }
        Ok(qualifying)
    }

    /// Unwinds a cancelled attempt. Benign reasons clear state; the rest
    /// leave a user-visible error.
    async fn handle_cancel(&self, account: &AccountId, reason: CancelReason) -> anyhow::Result<()> {
        info!(account = %account, reason = %reason, "setup stopped");
        let Some(mut record) = self.store.get(account).await? else {
            return Ok(());
        };
        record.set_transferring(false);
        if reason.is_benign() {
            record.clear_error();
        } else {
            // timeout is the only cancellation the user needs to hear about
            record.record_error("Setup timed out");
        }
        self.store.store(&record).await?;
        Ok(())
    }
}

/// Continuation watched by every step of a setup attempt.
struct SetupContinuation {
    store: Arc<dyn AccountStore>,
    account: AccountId,
    email: String,
    started: Instant,
    timeout: Duration,
}

#[async_trait::async_trait]
impl Continuation for SetupContinuation {
    async fn check(&self) -> Option<CancelReason> {
        if self.started.elapsed() >= self.timeout {
            return Some(CancelReason::TimedOut);
        }
        match self.store.get(&self.account).await {
            Ok(Some(record)) => {
                if record.email() != Some(self.email.as_str()) {
                    Some(CancelReason::IdentityChanged)
                } else if !record.preparing() {
                    Some(CancelReason::SetupCancelled)
                } else {
                    None
                }
            }
            Ok(None) => Some(CancelReason::Disconnected),
            // a transient store failure must not cancel a running setup
            Err(_) => None,
        }
    }
}
