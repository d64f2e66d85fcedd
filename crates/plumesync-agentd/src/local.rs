//! Local-disk mirror adapter
//!
//! The watcher host's view of the mirror is its own data root: one folder
//! per account under `data_root/<account-id>/`. The evictor frees space
//! through this adapter; freeing a local copy removes the file's bytes
//! here while the canonical copy stays at the provider.
//!
//! `list_shared_folders` is not available on the watcher host; the sharing
//! handshake runs on the engine side.

use std::path::PathBuf;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use plumesync_core::domain::{AccountId, FileEntry, MirrorPath};
use plumesync_core::ports::{MirrorProvider, SharedFolder};
use tracing::debug;

pub struct LocalMirrorAdapter {
    data_root: PathBuf,
}

impl LocalMirrorAdapter {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    fn resolve(&self, account: &AccountId, path: &MirrorPath) -> PathBuf {
        self.data_root
            .join(account.as_str())
            .join(path.as_rel_path())
    }
}

#[async_trait::async_trait]
impl MirrorProvider for LocalMirrorAdapter {
    async fn list(&self, account: &AccountId, dir: &MirrorPath) -> anyhow::Result<Vec<FileEntry>> {
        let local = self.resolve(account, dir);
        let mut entries = tokio::fs::read_dir(&local)
            .await
            .with_context(|| format!("listing {}", local.display()))?;
        let mut listing = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if meta.is_dir() {
                listing.push(FileEntry::directory(name));
            } else if meta.is_file() {
                let mtime = meta.modified().ok().map(DateTime::<Utc>::from);
                listing.push(FileEntry::file(name, meta.len(), mtime));
            }
        }
        Ok(listing)
    }

    async fn read(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<Vec<u8>> {
        let local = self.resolve(account, path);
        tokio::fs::read(&local)
            .await
            .with_context(|| format!("reading {}", local.display()))
    }

    async fn upload(
        &self,
        account: &AccountId,
        path: &MirrorPath,
        data: &[u8],
        _mtime: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        let local = self.resolve(account, path);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, data)
            .await
            .with_context(|| format!("writing {}", local.display()))
    }

    async fn mkdir(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()> {
        let local = self.resolve(account, path);
        tokio::fs::create_dir_all(&local)
            .await
            .with_context(|| format!("creating {}", local.display()))
    }

    async fn delete(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()> {
        let local = self.resolve(account, path);
        let result = match tokio::fs::metadata(&local).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&local).await,
            Ok(_) => tokio::fs::remove_file(&local).await,
            // already gone
            Err(_) => return Ok(()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {}", local.display())),
        }
    }

    async fn list_shared_folders(
        &self,
        _service_account: &str,
    ) -> anyhow::Result<Vec<SharedFolder>> {
        anyhow::bail!("the sharing handshake is not available on the watcher host")
    }

    async fn free_local_copy(&self, account: &AccountId, path: &MirrorPath) -> anyhow::Result<()> {
        let local = self.resolve(account, path);
        match tokio::fs::remove_file(&local).await {
            Ok(()) => {
                debug!(account = %account, path = %path, "freed local copy");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("freeing {}", local.display())),
        }
    }
}
