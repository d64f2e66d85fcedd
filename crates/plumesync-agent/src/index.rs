//! Local-copy index
//!
//! Tracks which files are materialized in each account's local folder,
//! their sizes, and when the pipeline last saw them touched. The index is
//! process-local and rebuilt from the initial scan on every watch; it never
//! persists, so a restart simply re-learns the tree.
//!
//! Only the event pipeline writes to the index. The evictor reads usage
//! aggregates from it and asks for eviction candidates ordered
//! largest-first, least-recently-touched first.

use std::collections::BTreeMap;
use std::time::Instant;

use dashmap::DashMap;
use plumesync_core::domain::{AccountId, MirrorPath};

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size: u64,
    last_access: Instant,
}

/// A file the evictor may free, with the ordering keys it was picked by.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub path: MirrorPath,
    pub size: u64,
    pub last_access: Instant,
}

/// Per-account map of materialized files.
#[derive(Default)]
pub struct FileIndex {
    accounts: DashMap<AccountId, BTreeMap<MirrorPath, IndexEntry>>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a file observation, updating its size and touch time.
    pub fn record(&self, account: &AccountId, path: &MirrorPath, size: u64) {
        self.accounts.entry(account.clone()).or_default().insert(
            path.clone(),
            IndexEntry {
                size,
                last_access: Instant::now(),
            },
        );
    }

    /// Returns whether the index knows `path` as a file.
    pub fn contains(&self, account: &AccountId, path: &MirrorPath) -> bool {
        self.accounts
            .get(account)
            .is_some_and(|files| files.contains_key(path))
    }

    /// Drops one file from the index.
    pub fn remove(&self, account: &AccountId, path: &MirrorPath) {
        if let Some(mut files) = self.accounts.get_mut(account) {
            files.remove(path);
        }
    }

    /// Drops every file at or under `prefix` (a directory was removed).
    pub fn remove_subtree(&self, account: &AccountId, prefix: &MirrorPath) {
        if let Some(mut files) = self.accounts.get_mut(account) {
            let dir = format!("{}/", prefix.as_str());
            files.retain(|path, _| path != prefix && !path.as_str().starts_with(&dir));
        }
    }

    /// Forgets an account entirely (it was disconnected).
    pub fn remove_account(&self, account: &AccountId) {
        self.accounts.remove(account);
    }

    /// Total bytes of local copies for one account.
    pub fn account_usage(&self, account: &AccountId) -> u64 {
        self.accounts
            .get(account)
            .map(|files| files.values().map(|e| e.size).sum())
            .unwrap_or(0)
    }

    /// Total bytes of local copies across every account.
    pub fn total_usage(&self) -> u64 {
        self.accounts
            .iter()
            .map(|entry| entry.value().values().map(|e| e.size).sum::<u64>())
            .sum()
    }

    /// Accounts ordered by local usage, heaviest first.
    pub fn accounts_by_usage(&self) -> Vec<(AccountId, u64)> {
        let mut usage: Vec<(AccountId, u64)> = self
            .accounts
            .iter()
            .map(|entry| {
                let total = entry.value().values().map(|e| e.size).sum();
                (entry.key().clone(), total)
            })
            .collect();
        usage.sort_by(|a, b| b.1.cmp(&a.1));
        usage
    }

    /// Eviction candidates for one account: largest first, ties broken by
    /// the staler touch time.
    pub fn candidates(&self, account: &AccountId) -> Vec<EvictionCandidate> {
        let Some(files) = self.accounts.get(account) else {
            return Vec::new();
        };
        let mut candidates: Vec<EvictionCandidate> = files
            .iter()
            .map(|(path, entry)| EvictionCandidate {
                path: path.clone(),
                size: entry.size,
                last_access: entry.last_access,
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.size
                .cmp(&a.size)
                .then_with(|| a.last_access.cmp(&b.last_access))
        });
        candidates
    }
}
