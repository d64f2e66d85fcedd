//! Watcher event pipeline
//!
//! One filesystem watcher per account, attached to the account's folder
//! under the data root. Raw notify events are classified, coalesced per
//! path until they settle, then applied: every observation updates the
//! [`FileIndex`], and once the account is `Ready` the event is also
//! forwarded to its dispatch queue.
//!
//! ```text
//! Unwatched ──watch()──> Scanning ──initial scan done──> Ready
//!     ▲                     │ events update index only      │ events update
//!     └──unwatch / root─────┴──────────────────────────────-┘ index + forward
//!            deleted
//! ```
//!
//! The watcher is attached *before* the initial scan, so a change racing
//! the scan is observed either by the scan or by the pipeline; neither
//! path loses it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use dashmap::DashMap;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use plumesync_core::domain::{AccountId, MirrorPath};
use plumesync_core::ports::{AccountStore, WatchControl};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::index::FileIndex;
use crate::queue::DispatchQueue;

// ============================================================================
// Events
// ============================================================================

/// A settled, classified change, path relative to the account root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A file the index did not know about appeared.
    Add { path: MirrorPath, size: u64 },
    /// A known file's content changed.
    Change { path: MirrorPath, size: u64 },
    /// A known file disappeared.
    Unlink { path: MirrorPath },
    /// A directory appeared.
    AddDir { path: MirrorPath },
    /// A directory (or an untracked entry) disappeared.
    UnlinkDir { path: MirrorPath },
}

/// What the raw watcher reported, before stat and index classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawKind {
    Created,
    Modified,
    Removed,
}

/// Maps a notify event to raw changes. A two-path rename becomes a
/// removal plus a creation; events with no actionable paths map to none.
fn classify(event: &notify::Event) -> Vec<(RawKind, PathBuf)> {
    if event.paths.is_empty() {
        return Vec::new();
    }
    match &event.kind {
        EventKind::Create(_) => vec![(RawKind::Created, event.paths[0].clone())],
        EventKind::Remove(_) => vec![(RawKind::Removed, event.paths[0].clone())],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => vec![
            (RawKind::Removed, event.paths[0].clone()),
            (RawKind::Created, event.paths[1].clone()),
        ],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            vec![(RawKind::Removed, event.paths[0].clone())]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            vec![(RawKind::Created, event.paths[0].clone())]
        }
        EventKind::Modify(_) => vec![(RawKind::Modified, event.paths[0].clone())],
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

// ============================================================================
// Coalescing
// ============================================================================

/// Holds raw changes per path until they stop arriving for `debounce`.
/// A new change for a pending path replaces it and resets the clock, so a
/// burst of writes to one file settles into a single change.
struct CoalescingQueue {
    pending: HashMap<PathBuf, (RawKind, Instant)>,
    debounce: Duration,
}

impl CoalescingQueue {
    fn new(debounce: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            debounce,
        }
    }

    fn push(&mut self, kind: RawKind, path: PathBuf) {
        self.pending.insert(path, (kind, Instant::now()));
    }

    /// Takes every settled change, parents before children.
    fn poll(&mut self) -> Vec<(RawKind, PathBuf)> {
        let now = Instant::now();
        let settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, seen))| now.duration_since(*seen) >= self.debounce)
            .map(|(path, _)| path.clone())
            .collect();
        let mut changes: Vec<(RawKind, PathBuf)> = settled
            .into_iter()
            .filter_map(|path| self.pending.remove(&path).map(|(kind, _)| (kind, path)))
            .collect();
        changes.sort_by(|a, b| a.1.cmp(&b.1));
        changes
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Scanning,
    Ready,
}

struct AccountWatch {
    root: PathBuf,
    state: Arc<Mutex<WatchState>>,
    // owns the notify watcher; aborting it closes the inotify handle
    pump: JoinHandle<()>,
}

/// Owns one watcher and event pump per watched account.
///
/// Accounts live under `data_root/<account-id>/`. Watching an account that
/// is already watched, or unwatching one that is not, is a logged no-op.
#[derive(Clone)]
pub struct WatcherRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    data_root: PathBuf,
    accounts: DashMap<AccountId, AccountWatch>,
    index: Arc<FileIndex>,
    store: Arc<dyn AccountStore>,
    queue: Arc<DispatchQueue>,
    debounce: Duration,
}

impl WatcherRegistry {
    pub fn new(
        data_root: impl Into<PathBuf>,
        index: Arc<FileIndex>,
        store: Arc<dyn AccountStore>,
        queue: Arc<DispatchQueue>,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                data_root: data_root.into(),
                accounts: DashMap::new(),
                index,
                store,
                queue,
                debounce,
            }),
        }
    }

    /// The local folder for an account.
    pub fn root_for(&self, account: &AccountId) -> PathBuf {
        self.inner.data_root.join(account.as_str())
    }

    pub fn is_watching(&self, account: &AccountId) -> bool {
        self.inner.accounts.contains_key(account)
    }

    /// Whether the account is watched and past its initial scan.
    pub fn is_ready(&self, account: &AccountId) -> bool {
        self.inner.accounts.get(account).is_some_and(|watch| {
            watch
                .state
                .lock()
                .map(|guard| *guard == WatchState::Ready)
                .unwrap_or(false)
        })
    }

    /// Attaches a watcher to the account folder and scans it into the index.
    ///
    /// Returns once the account is `Ready`; events observed while scanning
    /// update the index but are not forwarded.
    pub async fn watch(&self, account: &AccountId) -> anyhow::Result<()> {
        if self.is_watching(account) {
            info!(account = %account, "already watching, ignoring");
            return Ok(());
        }
        let root = self.root_for(account);
        anyhow::ensure!(
            root.is_dir(),
            "account folder {} does not exist",
            root.display()
        );

        let (raw_tx, raw_rx) = mpsc::channel::<notify::Event>(1024);
        let callback_account = account.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(event) => {
                    // pipeline gone means we are shutting down
                    let _ = raw_tx.blocking_send(event);
                }
                Err(err) => error!(account = %callback_account, error = %err, "watch error"),
            },
            notify::Config::default(),
        )
        .context("creating filesystem watcher")?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("watching {}", root.display()))?;

        let state = Arc::new(Mutex::new(WatchState::Scanning));
        let pump = tokio::spawn(Inner::pump(
            self.inner.clone(),
            watcher,
            account.clone(),
            root.clone(),
            state.clone(),
            raw_rx,
        ));
        self.inner.accounts.insert(
            account.clone(),
            AccountWatch {
                root: root.clone(),
                state: state.clone(),
                pump,
            },
        );

        let scanned = match scan_into_index(&self.inner.index, account, &root).await {
            Ok(scanned) => scanned,
            Err(err) => {
                self.unwatch(account);
                return Err(err);
            }
        };
        if let Ok(mut guard) = state.lock() {
            *guard = WatchState::Ready;
        }
        info!(account = %account, files = scanned, "watcher ready");
        Ok(())
    }

    /// Detaches the account's watcher, keeping its index entries.
    pub fn unwatch(&self, account: &AccountId) -> Option<PathBuf> {
        match self.inner.accounts.remove(account) {
            Some((_, watch)) => {
                watch.pump.abort();
                info!(account = %account, "watcher detached");
                Some(watch.root)
            }
            None => {
                info!(account = %account, "not watching, ignoring unwatch");
                None
            }
        }
    }

    /// Detaches the watcher and forgets everything about the account.
    pub fn disconnect(&self, account: &AccountId) {
        self.unwatch(account);
        self.inner.queue.remove(account);
        self.inner.index.remove_account(account);
    }

    /// Detaches every watcher.
    pub fn shutdown(&self) {
        let accounts: Vec<AccountId> = self
            .inner
            .accounts
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for account in accounts {
            self.unwatch(&account);
        }
    }
}

#[async_trait::async_trait]
impl WatchControl for WatcherRegistry {
    async fn watch(&self, account: &AccountId) -> anyhow::Result<()> {
        WatcherRegistry::watch(self, account).await
    }

    async fn disconnect(&self, account: &AccountId) -> anyhow::Result<()> {
        WatcherRegistry::disconnect(self, account);
        Ok(())
    }
}

impl Inner {
    /// Drains raw events into the coalescer and applies settled changes.
    async fn pump(
        self: Arc<Self>,
        watcher: RecommendedWatcher,
        account: AccountId,
        root: PathBuf,
        state: Arc<Mutex<WatchState>>,
        mut raw_rx: mpsc::Receiver<notify::Event>,
    ) {
        // keep the watcher alive for as long as the pump runs
        let _watcher = watcher;
        let mut coalesce = CoalescingQueue::new(self.debounce);
        let tick_every = (self.debounce / 4).max(Duration::from_millis(5));
        let mut tick = tokio::time::interval(tick_every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                received = raw_rx.recv() => match received {
                    Some(event) => {
                        for (kind, path) in classify(&event) {
                            coalesce.push(kind, path);
                        }
                    }
                    None => break,
                },
                _ = tick.tick() => {
                    for (kind, path) in coalesce.poll() {
                        if self.apply(&account, &root, &state, kind, &path).await.is_break() {
                            return;
                        }
                    }
                }
            }
        }
        debug!(account = %account, "event pump stopped");
    }

    async fn apply(
        self: &Arc<Self>,
        account: &AccountId,
        root: &Path,
        state: &Arc<Mutex<WatchState>>,
        kind: RawKind,
        abs: &Path,
    ) -> std::ops::ControlFlow<()> {
        if kind == RawKind::Removed && abs == root {
            self.root_removed(account).await;
            return std::ops::ControlFlow::Break(());
        }
        let Some(path) = relative_mirror_path(root, abs) else {
            debug!(account = %account, path = %abs.display(), "ignoring unmappable path");
            return std::ops::ControlFlow::Continue(());
        };

        let event = match kind {
            RawKind::Created | RawKind::Modified => match tokio::fs::metadata(abs).await {
                Ok(meta) if meta.is_dir() => {
                    if kind == RawKind::Created {
                        Some(PipelineEvent::AddDir { path })
                    } else {
                        // directory mtime churn carries no content
                        None
                    }
                }
                Ok(meta) => {
                    let size = meta.len();
                    if self.index.contains(account, &path) {
                        Some(PipelineEvent::Change { path, size })
                    } else {
                        Some(PipelineEvent::Add { path, size })
                    }
                }
                // settled and already gone again; the removal will follow
                Err(_) => None,
            },
            RawKind::Removed => {
                if self.index.contains(account, &path) {
                    Some(PipelineEvent::Unlink { path })
                } else {
                    Some(PipelineEvent::UnlinkDir { path })
                }
            }
        };
        let Some(event) = event else {
            return std::ops::ControlFlow::Continue(());
        };

        match &event {
            PipelineEvent::Add { path, size } | PipelineEvent::Change { path, size } => {
                self.index.record(account, path, *size);
            }
            PipelineEvent::Unlink { path } => self.index.remove(account, path),
            PipelineEvent::UnlinkDir { path } => self.index.remove_subtree(account, path),
            PipelineEvent::AddDir { .. } => {}
        }

        let ready = state
            .lock()
            .map(|guard| *guard == WatchState::Ready)
            .unwrap_or(false);
        if !ready {
            debug!(account = %account, event = ?event, "observed during scan, index only");
            return std::ops::ControlFlow::Continue(());
        }
        if !root.exists() {
            warn!(account = %account, event = ?event, "account folder missing, dropping event");
            return std::ops::ControlFlow::Continue(());
        }
        self.queue.enqueue(account, root, event);
        std::ops::ControlFlow::Continue(())
    }

    /// The watched folder itself was deleted: record the error and stop
    /// watching. The canonical side is left untouched.
    async fn root_removed(self: &Arc<Self>, account: &AccountId) {
        warn!(account = %account, "account folder was deleted, detaching watcher");
        match self.store.get(account).await {
            Ok(Some(mut record)) => {
                record.record_error("Account folder was deleted");
                if let Err(err) = self.store.store(&record).await {
                    warn!(account = %account, error = %err, "recording folder loss failed");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(account = %account, error = %err, "loading account failed"),
        }
        self.queue.remove(account);
        if let Some((_, watch)) = self.accounts.remove(account) {
            // we are that pump; aborting takes effect at the next await
            watch.pump.abort();
        }
    }
}

fn relative_mirror_path(root: &Path, abs: &Path) -> Option<MirrorPath> {
    let rel = abs.strip_prefix(root).ok()?;
    MirrorPath::new(rel.to_string_lossy()).ok()
}

/// Walks the tree under `root` and records every file into the index.
async fn scan_into_index(
    index: &FileIndex,
    account: &AccountId,
    root: &Path,
) -> anyhow::Result<usize> {
    let mut dirs = vec![root.to_path_buf()];
    let mut files = 0;
    while let Some(dir) = dirs.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("scanning {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                dirs.push(entry.path());
            } else if meta.is_file() {
                if let Some(path) = relative_mirror_path(root, &entry.path()) {
                    index.record(account, &path, meta.len());
                    files += 1;
                }
            }
        }
    }
    Ok(files)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use plumesync_core::domain::AccountRecord;
    use plumesync_core::ports::MemoryAccountStore;
    use tokio::sync::Mutex as AsyncMutex;

    use crate::queue::ChangeSink;

    fn account() -> AccountId {
        AccountId::new("a1").unwrap()
    }

    fn raw_event(kind: EventKind, paths: Vec<PathBuf>) -> notify::Event {
        notify::Event {
            kind,
            paths,
            attrs: Default::default(),
        }
    }

    // -- classify --

    #[test]
    fn create_and_remove_map_directly() {
        let created = classify(&raw_event(
            EventKind::Create(CreateKind::File),
            vec!["/r/a.md".into()],
        ));
        assert_eq!(created, vec![(RawKind::Created, PathBuf::from("/r/a.md"))]);

        let removed = classify(&raw_event(
            EventKind::Remove(RemoveKind::Any),
            vec!["/r/a.md".into()],
        ));
        assert_eq!(removed, vec![(RawKind::Removed, PathBuf::from("/r/a.md"))]);
    }

    #[test]
    fn two_path_rename_becomes_remove_plus_create() {
        let changes = classify(&raw_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec!["/r/old.md".into(), "/r/new.md".into()],
        ));
        assert_eq!(
            changes,
            vec![
                (RawKind::Removed, PathBuf::from("/r/old.md")),
                (RawKind::Created, PathBuf::from("/r/new.md")),
            ]
        );
    }

    #[test]
    fn data_and_metadata_modifications_map_to_modified() {
        for kind in [
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
        ] {
            let changes = classify(&raw_event(kind, vec!["/r/a.md".into()]));
            assert_eq!(changes, vec![(RawKind::Modified, PathBuf::from("/r/a.md"))]);
        }
    }

    #[test]
    fn access_and_empty_events_are_dropped() {
        let access = classify(&raw_event(
            EventKind::Access(notify::event::AccessKind::Any),
            vec!["/r/a.md".into()],
        ));
        assert!(access.is_empty());

        let empty = classify(&raw_event(EventKind::Create(CreateKind::File), vec![]));
        assert!(empty.is_empty());
    }

    // -- coalescing --

    #[test]
    fn burst_on_one_path_settles_into_the_latest_change() {
        let mut queue = CoalescingQueue::new(Duration::from_millis(5));
        queue.push(RawKind::Created, "/r/a.md".into());
        queue.push(RawKind::Modified, "/r/a.md".into());
        assert!(queue.poll().is_empty());

        std::thread::sleep(Duration::from_millis(10));
        let settled = queue.poll();
        assert_eq!(settled, vec![(RawKind::Modified, PathBuf::from("/r/a.md"))]);
        assert!(queue.poll().is_empty());
    }

    #[test]
    fn settled_changes_come_out_parents_first() {
        let mut queue = CoalescingQueue::new(Duration::ZERO);
        queue.push(RawKind::Created, "/r/sub/a.md".into());
        queue.push(RawKind::Created, "/r/sub".into());
        let order: Vec<PathBuf> = queue.poll().into_iter().map(|(_, p)| p).collect();
        assert_eq!(order, vec![PathBuf::from("/r/sub"), PathBuf::from("/r/sub/a.md")]);
    }

    // -- registry integration --

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SinkOp {
        Upload(MirrorPath, Vec<u8>),
        Mkdir(MirrorPath),
        Delete(MirrorPath),
    }

    #[derive(Default)]
    struct RecordingSink {
        ops: AsyncMutex<Vec<SinkOp>>,
    }

    #[async_trait::async_trait]
    impl ChangeSink for RecordingSink {
        async fn upload(
            &self,
            _account: &AccountId,
            path: &MirrorPath,
            body: Vec<u8>,
            _modified: Option<DateTime<Utc>>,
        ) -> anyhow::Result<()> {
            self.ops.lock().await.push(SinkOp::Upload(path.clone(), body));
            Ok(())
        }

        async fn mkdir(&self, _account: &AccountId, path: &MirrorPath) -> anyhow::Result<()> {
            self.ops.lock().await.push(SinkOp::Mkdir(path.clone()));
            Ok(())
        }

        async fn delete(&self, _account: &AccountId, path: &MirrorPath) -> anyhow::Result<()> {
            self.ops.lock().await.push(SinkOp::Delete(path.clone()));
            Ok(())
        }
    }

    struct Harness {
        _data_root: tempfile::TempDir,
        root: PathBuf,
        sink: Arc<RecordingSink>,
        index: Arc<FileIndex>,
        store: Arc<MemoryAccountStore>,
        registry: WatcherRegistry,
    }

    async fn harness() -> Harness {
        let data_root = tempfile::tempdir().unwrap();
        let root = data_root.path().join("a1");
        std::fs::create_dir(&root).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let index = Arc::new(FileIndex::new());
        let store = Arc::new(MemoryAccountStore::new());
        store.store(&AccountRecord::new(account())).await.unwrap();
        let queue = Arc::new(DispatchQueue::new(sink.clone(), 64, Duration::ZERO));
        let registry = WatcherRegistry::new(
            data_root.path(),
            index.clone(),
            store.clone(),
            queue,
            Duration::from_millis(20),
        );
        Harness {
            _data_root: data_root,
            root,
            sink,
            index,
            store,
            registry,
        }
    }

    async fn wait_for<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..300 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within the deadline");
    }

    #[tokio::test]
    async fn initial_scan_seeds_the_index_without_forwarding() {
        let h = harness().await;
        std::fs::create_dir(h.root.join("sub")).unwrap();
        std::fs::write(h.root.join("sub/a.md"), b"hello").unwrap();
        std::fs::write(h.root.join("b.md"), b"hi").unwrap();

        h.registry.watch(&account()).await.unwrap();

        assert!(h.registry.is_watching(&account()));
        assert_eq!(h.index.account_usage(&account()), 7);
        // pre-existing files are already canonical; nothing is dispatched
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.sink.ops.lock().await.is_empty());
    }

    #[tokio::test]
    async fn new_file_is_indexed_and_uploaded() {
        let h = harness().await;
        h.registry.watch(&account()).await.unwrap();

        std::fs::write(h.root.join("post.md"), b"# Title").unwrap();

        wait_for(|| async { !h.sink.ops.lock().await.is_empty() }).await;
        let ops = h.sink.ops.lock().await.clone();
        let expected = MirrorPath::new("post.md").unwrap();
        assert_eq!(ops, vec![SinkOp::Upload(expected.clone(), b"# Title".to_vec())]);
        assert!(h.index.contains(&account(), &expected));
    }

    #[tokio::test]
    async fn new_directory_with_file_dispatches_mkdir_before_upload() {
        let h = harness().await;
        h.registry.watch(&account()).await.unwrap();

        std::fs::create_dir(h.root.join("drafts")).unwrap();
        std::fs::write(h.root.join("drafts/one.md"), b"x").unwrap();

        wait_for(|| async { h.sink.ops.lock().await.len() >= 2 }).await;
        let ops = h.sink.ops.lock().await.clone();
        assert_eq!(ops[0], SinkOp::Mkdir(MirrorPath::new("drafts").unwrap()));
        assert_eq!(
            ops[1],
            SinkOp::Upload(MirrorPath::new("drafts/one.md").unwrap(), b"x".to_vec())
        );
    }

    #[tokio::test]
    async fn deleting_a_file_dispatches_delete_and_drops_it_from_the_index() {
        let h = harness().await;
        std::fs::write(h.root.join("a.md"), b"hello").unwrap();
        h.registry.watch(&account()).await.unwrap();

        std::fs::remove_file(h.root.join("a.md")).unwrap();

        let expected = MirrorPath::new("a.md").unwrap();
        wait_for(|| async { !h.sink.ops.lock().await.is_empty() }).await;
        let ops = h.sink.ops.lock().await.clone();
        assert_eq!(ops, vec![SinkOp::Delete(expected.clone())]);
        assert!(!h.index.contains(&account(), &expected));
    }

    #[tokio::test]
    async fn watching_twice_is_a_no_op() {
        let h = harness().await;
        h.registry.watch(&account()).await.unwrap();
        h.registry.watch(&account()).await.unwrap();
        assert!(h.registry.is_watching(&account()));
        assert!(h.registry.is_ready(&account()));
    }

    #[tokio::test]
    async fn unwatching_an_unwatched_account_is_a_no_op() {
        let h = harness().await;
        assert!(h.registry.unwatch(&account()).is_none());
    }

    #[tokio::test]
    async fn unwatch_keeps_the_index_and_disconnect_forgets_it() {
        let h = harness().await;
        std::fs::write(h.root.join("a.md"), b"hello").unwrap();
        h.registry.watch(&account()).await.unwrap();
        assert_eq!(h.index.account_usage(&account()), 5);

        let root = h.registry.unwatch(&account()).unwrap();
        assert_eq!(root, h.root);
        assert_eq!(h.index.account_usage(&account()), 5);

        h.registry.disconnect(&account());
        assert_eq!(h.index.account_usage(&account()), 0);
    }

    #[tokio::test]
    async fn deleting_the_account_folder_records_an_error_and_detaches() {
        let h = harness().await;
        std::fs::write(h.root.join("a.md"), b"hello").unwrap();
        h.registry.watch(&account()).await.unwrap();

        std::fs::remove_dir_all(&h.root).unwrap();

        wait_for(|| async { !h.registry.is_watching(&account()) }).await;
        wait_for(|| async {
            h.store
                .get(&account())
                .await
                .unwrap()
                .unwrap()
                .error()
                .is_some()
        })
        .await;
        let record = h.store.get(&account()).await.unwrap().unwrap();
        assert_eq!(record.error(), Some("Account folder was deleted"));
    }
}
