//! Reconciliation walker
//!
//! Walks the local tree and the mirror tree in parallel, directory by
//! directory, and converges one side onto the other:
//!
//! - `Push` (local → mirror): the local tree wins. Mirror-only entries are
//!   deleted, local-only entries are created, and mismatches are re-uploaded.
//! - `Pull` (mirror → local): used only for the one-time initial transfer.
//!   The mirror wins, and nothing is ever deleted from the mirror.
//!
//! Entry names are compared NFC-normalized so a macOS-decomposed mirror name
//! and the locally-typed form count as the same entry.
//!
//! Every mutating step checks the continuation first and wraps the remote
//! call in the shared retry policy. A per-operation failure is recorded in
//! the [`WalkReport`] and the walk moves on; only a failure to list the root
//! aborts the whole walk.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use plumesync_core::cancel::{CancelReason, Continuation};
use plumesync_core::config::SyncConfig;
use plumesync_core::domain::{AccountId, FileEntry, MirrorPath};
use plumesync_core::ports::MirrorProvider;
use plumesync_remote::RetryPolicy;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Which side wins the reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local → mirror; steady-state direction.
    Push,
    /// Mirror → local; initial transfer only.
    Pull,
}

/// Callbacks surfacing walk progress to the caller.
#[async_trait::async_trait]
pub trait Reporter: Send + Sync {
    /// Human-readable progress message.
    async fn publish(&self, message: &str);
    /// A path whose state just changed.
    async fn update(&self, path: &MirrorPath);
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

#[async_trait::async_trait]
impl Reporter for NullReporter {
    async fn publish(&self, _message: &str) {}
    async fn update(&self, _path: &MirrorPath) {}
}

/// Tally of one reconciliation walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkReport {
    pub uploaded: u64,
    pub downloaded: u64,
    pub dirs_created: u64,
    pub deleted: u64,
    pub skipped_oversize: u64,
    pub failed: u64,
    pub cancelled: Option<CancelReason>,
}

impl WalkReport {
    /// True when the walk ran to completion without operation failures.
    pub fn succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled.is_none()
    }
}

/// Directory-recursive reconciliation between a local tree and the mirror.
pub struct Walker {
    provider: Arc<dyn MirrorProvider>,
    retry: RetryPolicy,
    max_file_size: u64,
}

impl Walker {
    pub fn new(provider: Arc<dyn MirrorProvider>, max_file_size: u64) -> Self {
        Self {
            provider,
            retry: RetryPolicy::walk_op(),
            max_file_size,
        }
    }

    /// Builds a walker from the `sync` section of the configuration:
    /// oversize cutoff from `max_file_size_mb`, per-operation retry budget
    /// from `walk_retry_attempts`.
    pub fn from_config(provider: Arc<dyn MirrorProvider>, config: &SyncConfig) -> Self {
        Self::new(provider, config.max_file_size_mb * 1024 * 1024)
            .with_retry(RetryPolicy::walk_op().with_attempts(config.walk_retry_attempts))
    }

    /// Overrides the per-operation retry schedule (tests use millisecond
    /// delays).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Runs one walk. Top-level failures are logged and reflected in the
    /// report, never propagated.
    pub async fn run(
        &self,
        account: &AccountId,
        local_root: &Path,
        direction: Direction,
        continuation: &dyn Continuation,
        reporter: &dyn Reporter,
    ) -> WalkReport {
        let mut report = WalkReport::default();
        info!(
            account = %account,
            direction = ?direction,
            root = %local_root.display(),
            "starting reconciliation walk"
        );

        let outcome = self
            .walk_dir(
                account,
                local_root.to_path_buf(),
                MirrorPath::root(),
                direction,
                continuation,
                reporter,
                &mut report,
            )
            .await;

        match outcome {
            Err(err) => {
                error!(
                    account = %account,
                    error = format!("{err:#}"),
                    "reconciliation walk failed"
                );
                report.failed += 1;
                reporter.publish("Sync failed").await;
            }
            Ok(()) => match report.cancelled {
                Some(reason) => {
                    info!(account = %account, reason = %reason, "reconciliation walk stopped");
                    reporter.publish(&format!("Sync stopped: {reason}")).await;
                }
                None => {
                    info!(
                        account = %account,
                        uploaded = report.uploaded,
                        downloaded = report.downloaded,
                        dirs_created = report.dirs_created,
                        deleted = report.deleted,
                        skipped = report.skipped_oversize,
                        failed = report.failed,
                        "reconciliation walk finished"
                    );
                    reporter.publish("Sync complete").await;
                }
            },
        }
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_dir<'a>(
        &'a self,
        account: &'a AccountId,
        local_dir: PathBuf,
        mirror_dir: MirrorPath,
        direction: Direction,
        continuation: &'a dyn Continuation,
        reporter: &'a dyn Reporter,
        report: &'a mut WalkReport,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if check_cancel(continuation, report).await {
                return Ok(());
            }

            let (local, remote) = tokio::join!(
                list_local(&local_dir),
                self.retry
                    .run("list mirror directory", || self
                        .provider
                        .list(account, &mirror_dir)),
            );

            // A listing failure must never look like an empty directory, or
            // a push walk would delete everything on the other side. The
            // root aborts the walk; a subdirectory is skipped and recorded.
            let local = match local {
                Ok(entries) => entries,
                Err(err) => {
                    if mirror_dir.is_root() {
                        return Err(err).context("listing local root");
                    }
                    warn!(
                        account = %account,
                        dir = %local_dir.display(),
                        error = format!("{err:#}"),
                        "skipping directory, local listing failed"
                    );
                    report.failed += 1;
                    return Ok(());
                }
            };
            let remote = match remote {
                Ok(entries) => entries,
                Err(err) => {
                    if mirror_dir.is_root() {
                        return Err(err).context("listing mirror root");
                    }
                    warn!(
                        account = %account,
                        dir = %mirror_dir,
                        error = format!("{err:#}"),
                        "skipping directory, mirror listing failed"
                    );
                    report.failed += 1;
                    return Ok(());
                }
            };

            match direction {
                Direction::Push => {
                    self.push_dir(
                        account,
                        &local_dir,
                        &mirror_dir,
                        local,
                        remote,
                        continuation,
                        reporter,
                        report,
                    )
                    .await
                }
                Direction::Pull => {
                    self.pull_dir(
                        account,
                        &local_dir,
                        &mirror_dir,
                        local,
                        remote,
                        continuation,
                        reporter,
                        report,
                    )
                    .await
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Push: local wins
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn push_dir(
        &self,
        account: &AccountId,
        local_dir: &Path,
        mirror_dir: &MirrorPath,
        local: Vec<FileEntry>,
        remote: Vec<FileEntry>,
        continuation: &dyn Continuation,
        reporter: &dyn Reporter,
        report: &mut WalkReport,
    ) -> anyhow::Result<()> {
        let mut remote_by_name: BTreeMap<String, FileEntry> = remote
            .into_iter()
            .map(|e| (e.normalized_name(), e))
            .collect();

        for entry in &local {
            if check_cancel(continuation, report).await {
                return Ok(());
            }
            let target = match mirror_dir.join(&entry.name) {
                Ok(path) => path,
                Err(err) => {
                    warn!(account = %account, name = %entry.name, error = %err, "skipping unrepresentable entry name");
                    report.failed += 1;
                    continue;
                }
            };
            let local_path = local_dir.join(&entry.name);
            let counterpart = remote_by_name.remove(&entry.normalized_name());

            match counterpart {
                Some(ref existing) if existing.is_directory == entry.is_directory => {
                    if entry.is_directory {
                        self.walk_dir(
                            account,
                            local_path,
                            target,
                            Direction::Push,
                            continuation,
                            reporter,
                            report,
                        )
                        .await?;
                    } else if entry.size != existing.size {
                        // content drifted, local wins
                        self.upload_file(account, &local_path, &target, entry.size, reporter, report)
                            .await;
                    }
                }
                Some(_) => {
                    // kind mismatch, local wins: clear the mirror entry then
                    // recreate it from the local side
                    if !self.delete_entry(account, &target, reporter, report).await {
                        continue;
                    }
                    self.create_from_local(
                        account,
                        &local_path,
                        &target,
                        entry,
                        continuation,
                        reporter,
                        report,
                    )
                    .await?;
                }
                None => {
                    self.create_from_local(
                        account,
                        &local_path,
                        &target,
                        entry,
                        continuation,
                        reporter,
                        report,
                    )
                    .await?;
                }
            }
            if report.cancelled.is_some() {
                return Ok(());
            }
        }

        // whatever remains in the map exists only on the mirror side
        for (_, stale) in remote_by_name {
            if check_cancel(continuation, report).await {
                return Ok(());
            }
            let target = match mirror_dir.join(&stale.name) {
                Ok(path) => path,
                Err(err) => {
                    warn!(account = %account, name = %stale.name, error = %err, "skipping unrepresentable mirror entry");
                    report.failed += 1;
                    continue;
                }
            };
            self.delete_entry(account, &target, reporter, report).await;
        }
        Ok(())
    }

    /// Creates a local-only entry on the mirror side. Directories recurse
    /// only after the mkdir succeeded.
    #[allow(clippy::too_many_arguments)]
    async fn create_from_local(
        &self,
        account: &AccountId,
        local_path: &Path,
        target: &MirrorPath,
        entry: &FileEntry,
        continuation: &dyn Continuation,
        reporter: &dyn Reporter,
        report: &mut WalkReport,
    ) -> anyhow::Result<()> {
        if entry.is_directory {
            match self
                .retry
                .run("create mirror directory", || {
                    self.provider.mkdir(account, target)
                })
                .await
            {
                Ok(()) => {
                    report.dirs_created += 1;
                    reporter.update(target).await;
                    self.walk_dir(
                        account,
                        local_path.to_path_buf(),
                        target.clone(),
                        Direction::Push,
                        continuation,
                        reporter,
                        report,
                    )
                    .await?;
                }
                Err(err) => {
                    error!(
                        account = %account,
                        path = %target,
                        error = format!("{err:#}"),
                        "mkdir failed, subtree not pushed"
                    );
                    report.failed += 1;
                }
            }
        } else {
            self.upload_file(account, local_path, target, entry.size, reporter, report)
                .await;
        }
        Ok(())
    }

    /// Uploads one local file, honoring the size limit. Failures are
    /// recorded, not propagated.
    async fn upload_file(
        &self,
        account: &AccountId,
        local_path: &Path,
        target: &MirrorPath,
        size: u64,
        reporter: &dyn Reporter,
        report: &mut WalkReport,
    ) {
        if size > self.max_file_size {
            warn!(
                account = %account,
                path = %target,
                bytes = size,
                limit = self.max_file_size,
                "skipping oversized file"
            );
            reporter
                .publish(&format!("Skipped oversized file {target}"))
                .await;
            report.skipped_oversize += 1;
            return;
        }

        let data = match tokio::fs::read(local_path).await {
            Ok(data) => data,
            Err(err) => {
                error!(
                    account = %account,
                    path = %local_path.display(),
                    error = %err,
                    "reading local file failed"
                );
                report.failed += 1;
                return;
            }
        };
        let mtime = tokio::fs::metadata(local_path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        match self
            .retry
            .run("upload file", || {
                self.provider.upload(account, target, &data, mtime)
            })
            .await
        {
            Ok(()) => {
                report.uploaded += 1;
                reporter.update(target).await;
            }
            Err(err) => {
                error!(
                    account = %account,
                    path = %target,
                    error = format!("{err:#}"),
                    "upload failed"
                );
                report.failed += 1;
            }
        }
    }

    /// Deletes one mirror entry with retries. Returns whether it succeeded.
    async fn delete_entry(
        &self,
        account: &AccountId,
        target: &MirrorPath,
        reporter: &dyn Reporter,
        report: &mut WalkReport,
    ) -> bool {
        match self
            .retry
            .run("delete mirror entry", || {
                self.provider.delete(account, target)
            })
            .await
        {
            Ok(()) => {
                report.deleted += 1;
                reporter.update(target).await;
                true
            }
            Err(err) => {
                error!(
                    account = %account,
                    path = %target,
                    error = format!("{err:#}"),
                    "delete failed"
                );
                report.failed += 1;
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Pull: mirror wins, mirror is never mutated
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn pull_dir(
        &self,
        account: &AccountId,
        local_dir: &Path,
        mirror_dir: &MirrorPath,
        local: Vec<FileEntry>,
        remote: Vec<FileEntry>,
        continuation: &dyn Continuation,
        reporter: &dyn Reporter,
        report: &mut WalkReport,
    ) -> anyhow::Result<()> {
        let local_by_name: BTreeMap<String, FileEntry> = local
            .into_iter()
            .map(|e| (e.normalized_name(), e))
            .collect();

        for entry in remote {
            if check_cancel(continuation, report).await {
                return Ok(());
            }
            let source = match mirror_dir.join(&entry.name) {
                Ok(path) => path,
                Err(err) => {
                    warn!(account = %account, name = %entry.name, error = %err, "skipping unrepresentable mirror entry");
                    report.failed += 1;
                    continue;
                }
            };
            let local_path = local_dir.join(&entry.name);
            let counterpart = local_by_name.get(&entry.normalized_name());

            match counterpart {
                Some(existing) if existing.is_directory == entry.is_directory => {
                    if entry.is_directory {
                        self.walk_dir(
                            account,
                            local_path,
                            source,
                            Direction::Pull,
                            continuation,
                            reporter,
                            report,
                        )
                        .await?;
                    } else if existing.size != entry.size {
                        // mirror wins
                        self.download_file(account, &source, &local_path, reporter, report)
                            .await;
                    }
                }
                Some(existing) => {
                    // kind mismatch, mirror wins: clear the local entry then
                    // materialize from the mirror
                    let removal = if existing.is_directory {
                        tokio::fs::remove_dir_all(&local_path).await
                    } else {
                        tokio::fs::remove_file(&local_path).await
                    };
                    if let Err(err) = removal {
                        error!(
                            account = %account,
                            path = %local_path.display(),
                            error = %err,
                            "clearing mismatched local entry failed"
                        );
                        report.failed += 1;
                        continue;
                    }
                    self.materialize(
                        account,
                        &source,
                        &local_path,
                        entry.is_directory,
                        continuation,
                        reporter,
                        report,
                    )
                    .await?;
                }
                None => {
                    self.materialize(
                        account,
                        &source,
                        &local_path,
                        entry.is_directory,
                        continuation,
                        reporter,
                        report,
                    )
                    .await?;
                }
            }
            if report.cancelled.is_some() {
                return Ok(());
            }
        }
        // local-only entries are left for the next push walk
        Ok(())
    }

    /// Creates a mirror-only entry locally.
    #[allow(clippy::too_many_arguments)]
    async fn materialize(
        &self,
        account: &AccountId,
        source: &MirrorPath,
        local_path: &Path,
        is_directory: bool,
        continuation: &dyn Continuation,
        reporter: &dyn Reporter,
        report: &mut WalkReport,
    ) -> anyhow::Result<()> {
        if is_directory {
            if let Err(err) = tokio::fs::create_dir_all(local_path).await {
                error!(
                    account = %account,
                    path = %local_path.display(),
                    error = %err,
                    "creating local directory failed"
                );
                report.failed += 1;
                return Ok(());
            }
            report.dirs_created += 1;
            reporter.update(source).await;
            self.walk_dir(
                account,
                local_path.to_path_buf(),
                source.clone(),
                Direction::Pull,
                continuation,
                reporter,
                report,
            )
            .await
        } else {
            self.download_file(account, source, local_path, reporter, report)
                .await;
            Ok(())
        }
    }

    /// Fetches one mirror file and writes it locally. Failures are
    /// recorded, not propagated.
    async fn download_file(
        &self,
        account: &AccountId,
        source: &MirrorPath,
        local_path: &Path,
        reporter: &dyn Reporter,
        report: &mut WalkReport,
    ) {
        let data = match self
            .retry
            .run("read mirror file", || self.provider.read(account, source))
            .await
        {
            Ok(data) => data,
            Err(err) => {
                error!(
                    account = %account,
                    path = %source,
                    error = format!("{err:#}"),
                    "reading mirror file failed"
                );
                report.failed += 1;
                return;
            }
        };
        if let Err(err) = tokio::fs::write(local_path, &data).await {
            error!(
                account = %account,
                path = %local_path.display(),
                error = %err,
                "writing local file failed"
            );
            report.failed += 1;
            return;
        }
        report.downloaded += 1;
        reporter.update(source).await;
    }
}

/// Lists one local directory as [`FileEntry`]s, sorted by name.
async fn list_local(dir: &Path) -> anyhow::Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading directory {}", dir.display()))?;
    while let Some(item) = read_dir.next_entry().await? {
        let name = item.file_name().to_string_lossy().into_owned();
        let meta = item.metadata().await?;
        if meta.is_dir() {
            entries.push(FileEntry::directory(name));
        } else {
            let mtime = meta.modified().ok().map(DateTime::<Utc>::from);
            entries.push(FileEntry::file(name, meta.len(), mtime));
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

async fn check_cancel(continuation: &dyn Continuation, report: &mut WalkReport) -> bool {
    if report.cancelled.is_some() {
        return true;
    }
    if let Some(reason) = continuation.check().await {
        report.cancelled = Some(reason);
        return true;
    }
    false
}

// ============================================================================
// Tests
// ============================================================================
