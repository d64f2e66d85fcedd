//! File-backed account store
//!
//! The watcher host keeps its account records in a single JSON file under
//! the data root, so watchers survive a daemon restart. Records are held in
//! a concurrent map; every mutation rewrites the file through a temp-file
//! rename so a crash mid-write never leaves a torn store behind.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use dashmap::DashMap;
use plumesync_core::domain::{AccountId, AccountRecord};
use plumesync_core::ports::AccountStore;
use tokio::sync::Mutex;
use tracing::debug;

/// `AccountStore` persisted as a JSON file.
pub struct JsonAccountStore {
    path: PathBuf,
    records: DashMap<AccountId, AccountRecord>,
    // serializes whole-file rewrites; the map itself is lock-free
    write_lock: Mutex<()>,
}

impl JsonAccountStore {
    /// Opens the store at `path`, creating parent directories and loading
    /// any records a previous run left there.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating store directory {}", parent.display()))?;
        }

        let records = DashMap::new();
        if path.exists() {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading account store {}", path.display()))?;
            let loaded: Vec<AccountRecord> = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing account store {}", path.display()))?;
            for record in loaded {
                records.insert(record.id().clone(), record);
            }
        }
        debug!(path = %path.display(), accounts = records.len(), "account store opened");

        Ok(Self {
            path,
            records,
            write_lock: Mutex::new(()),
        })
    }

    async fn persist(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let records: Vec<AccountRecord> = self.records.iter().map(|r| r.clone()).collect();
        let json = serde_json::to_vec_pretty(&records).context("serializing account records")?;

        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("writing account store {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing account store {}", self.path.display()))?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[async_trait::async_trait]
impl AccountStore for JsonAccountStore {
    async fn get(&self, id: &AccountId) -> anyhow::Result<Option<AccountRecord>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn store(&self, record: &AccountRecord) -> anyhow::Result<()> {
        self.records.insert(record.id().clone(), record.clone());
        self.persist().await
    }

    async fn remove(&self, id: &AccountId) -> anyhow::Result<()> {
        if self.records.remove(id).is_some() {
            self.persist().await?;
        }
        Ok(())
    }

    async fn list_all(&self) -> anyhow::Result<Vec<AccountRecord>> {
        Ok(self.records.iter().map(|r| r.clone()).collect())
    }
}
