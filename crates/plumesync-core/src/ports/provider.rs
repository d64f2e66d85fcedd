//! Mirror provider port (driven/secondary port)
//!
//! Abstracts the remote side of a reconciliation walk: listing, reading and
//! mutating the mirror tree, plus the sharing-handshake queries the setup
//! poller needs. The sync engine only ever talks to this trait, so swapping
//! storage backends (or substituting the in-memory double in tests) never
//! touches walker or setup code.
//!
//! ## Contract
//!
//! - All paths are relative to the account's claimed folder root.
//! - `delete` of an absent path succeeds; re-issuing a delete after a retry
//!   must not fail the walk.
//! - `mkdir` of an existing directory succeeds for the same reason.
//! - `free_local_copy` drops the locally cached bytes of a file while
//!   keeping its logical entry; a subsequent `read` re-fetches content.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::domain::{AccountId, FileEntry, MirrorPath};

/// A candidate shared folder visible to the service account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFolder {
    /// Provider-side folder id
    pub id: String,
    /// Display name
    pub name: String,
    /// Email address of the user who shared the folder
    pub owner_email: String,
    /// Whether the folder sits inside another shared folder
    pub has_parent: bool,
    /// Whether the folder currently has no entries
    pub is_empty: bool,
    /// Whether the service account was granted write permission
    pub writable: bool,
}

/// Port trait for the remote mirror store.
#[async_trait::async_trait]
pub trait MirrorProvider: Send + Sync {
    /// Lists the entries of a mirror directory.
    async fn list(&self, account: &AccountId, dir: &MirrorPath) -> anyhow::Result<Vec<FileEntry>>;

    /// Reads the full content of a mirror file.
    async fn read(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<Vec<u8>>;

    /// Creates or replaces a mirror file.
    async fn upload(
        &self,
        account: &AccountId,
        path: &MirrorPath,
        data: &[u8],
        mtime: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()>;

    /// Creates a mirror directory. Succeeds if it already exists.
    async fn mkdir(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()>;

    /// Removes a mirror entry (recursively for directories). Succeeds if the
    /// entry is already gone.
    async fn delete(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()>;

    /// Lists folders shared with the given service account identity.
    async fn list_shared_folders(&self, service_account: &str)
        -> anyhow::Result<Vec<SharedFolder>>;

    /// Releases the locally cached bytes of a mirror file without removing
    /// the entry itself.
    async fn free_local_copy(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// Operation observed by [`MemoryMirrorProvider`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedOp {
    Upload(MirrorPath),
    Mkdir(MirrorPath),
    Delete(MirrorPath),
    FreeLocalCopy(MirrorPath),
}

#[derive(Debug, Clone)]
struct MemNode {
    is_directory: bool,
    data: Vec<u8>,
    mtime: Option<DateTime<Utc>>,
    evicted: bool,
}

/// In-memory `MirrorProvider` backing unit tests and local development.
///
/// Keeps one flat path-keyed tree per account and records every mutating
/// call so tests can assert call order (e.g. a directory is created before
/// its children are uploaded) and exact call counts.
#[derive(Debug, Default)]
pub struct MemoryMirrorProvider {
    trees: DashMap<AccountId, BTreeMap<String, MemNode>>,
    shared_folders: Mutex<Vec<SharedFolder>>,
    ops: Mutex<Vec<RecordedOp>>,
    fail_uploads: AtomicUsize,
}

impl MemoryMirrorProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a mirror file without recording an op.
    pub fn seed_file(&self, account: &AccountId, path: &MirrorPath, data: &[u8]) {
        self.trees.entry(account.clone()).or_default().insert(
            path.as_str().to_string(),
            MemNode {
                is_directory: false,
                data: data.to_vec(),
                mtime: None,
                evicted: false,
            },
        );
    }

    /// Seeds a mirror directory without recording an op.
    pub fn seed_dir(&self, account: &AccountId, path: &MirrorPath) {
        self.trees.entry(account.clone()).or_default().insert(
            path.as_str().to_string(),
            MemNode {
                is_directory: true,
                data: Vec::new(),
                mtime: None,
                evicted: false,
            },
        );
    }

    /// Replaces the shared-folder listing returned to the setup poller.
    pub fn set_shared_folders(&self, folders: Vec<SharedFolder>) {
        *self.shared_folders.lock().unwrap() = folders;
    }

    /// Makes the next `n` uploads fail before applying.
    pub fn fail_next_uploads(&self, n: usize) {
        self.fail_uploads.store(n, Ordering::SeqCst);
    }

    /// Snapshot of all recorded mutating calls, in order.
    pub fn ops(&self) -> Vec<RecordedOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Sorted snapshot of an account's tree as `(path, is_directory, size)`.
    pub fn snapshot(&self, account: &AccountId) -> Vec<(String, bool, u64)> {
        self.trees
            .get(account)
            .map(|tree| {
                tree.iter()
                    .map(|(p, n)| (p.clone(), n.is_directory, n.data.len() as u64))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a file's cached bytes were released.
    pub fn is_evicted(&self, account: &AccountId, path: &MirrorPath) -> bool {
        self.trees
            .get(account)
            .and_then(|tree| tree.get(path.as_str()).map(|n| n.evicted))
            .unwrap_or(false)
    }

    fn record(&self, op: RecordedOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn parent_of(path: &str) -> &str {
        match path.rfind('/') {
            Some(i) => &path[..i],
            None => "",
        }
    }
}

#[async_trait::async_trait]
impl MirrorProvider for MemoryMirrorProvider {
    async fn list(&self, account: &AccountId, dir: &MirrorPath) -> anyhow::Result<Vec<FileEntry>> {
        let Some(tree) = self.trees.get(account) else {
            return Ok(Vec::new());
        };
        let entries = tree
            .iter()
            .filter(|(p, _)| Self::parent_of(p) == dir.as_str())
            .map(|(p, n)| {
                let name = p.rsplit('/').next().unwrap_or(p).to_string();
                if n.is_directory {
                    FileEntry::directory(name)
                } else {
                    FileEntry::file(name, n.data.len() as u64, n.mtime)
                }
            })
            .collect();
        Ok(entries)
    }

    async fn read(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<Vec<u8>> {
        let tree = self
            .trees
            .get(account)
            .ok_or_else(|| anyhow::anyhow!("no tree for account {account}"))?;
        let node = tree
            .get(path.as_str())
            .ok_or_else(|| anyhow::anyhow!("no such mirror file: {path}"))?;
        Ok(node.data.clone())
    }

    async fn upload(
        &self,
        account: &AccountId,
        path: &MirrorPath,
        data: &[u8],
        mtime: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) > 0 {
            self.fail_uploads.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("injected upload failure for {path}");
        }
        self.record(RecordedOp::Upload(path.clone()));
        self.trees.entry(account.clone()).or_default().insert(
            path.as_str().to_string(),
            MemNode {
                is_directory: false,
                data: data.to_vec(),
                mtime,
                evicted: false,
            },
        );
        Ok(())
    }

    async fn mkdir(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()> {
        self.record(RecordedOp::Mkdir(path.clone()));
        self.trees
            .entry(account.clone())
            .or_default()
            .entry(path.as_str().to_string())
            .or_insert(MemNode {
                is_directory: true,
                data: Vec::new(),
                mtime: None,
                evicted: false,
            });
        Ok(())
    }

    async fn delete(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()> {
        self.record(RecordedOp::Delete(path.clone()));
        if let Some(mut tree) = self.trees.get_mut(account) {
            let prefix = format!("{}/", path.as_str());
            tree.retain(|p, _| p != path.as_str() && !p.starts_with(&prefix));
        }
        Ok(())
    }

    async fn list_shared_folders(
        &self,
        _service_account: &str,
    ) -> anyhow::Result<Vec<SharedFolder>> {
        Ok(self.shared_folders.lock().unwrap().clone())
    }

    async fn free_local_copy(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()> {
        self.record(RecordedOp::FreeLocalCopy(path.clone()));
        if let Some(mut tree) = self.trees.get_mut(account) {
            if let Some(node) = tree.get_mut(path.as_str()) {
                node.evicted = true;
            }
        }
        Ok(())
    }
}
