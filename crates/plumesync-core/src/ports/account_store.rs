//! Account store port (driven/secondary port)
//!
//! Key-value persistence for [`AccountRecord`]s with get/store/iterate-all
//! semantics. Reads and writes are atomic per record; callers must never
//! cache a record across a suspension point — re-read, narrow the update to
//! the fields they own, and store.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific and
//!   don't need domain-level classification.
//! - `list_all` exists for the watcher host's startup pass and maintenance
//!   scripts that re-list every account in a given state.

use dashmap::DashMap;

use crate::domain::{AccountId, AccountRecord};

/// Port trait for account record persistence.
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// Retrieves an account record by id.
    async fn get(&self, id: &AccountId) -> anyhow::Result<Option<AccountRecord>>;

    /// Saves an account record (insert or update).
    async fn store(&self, record: &AccountRecord) -> anyhow::Result<()>;

    /// Removes an account record. Removing an absent record is a no-op.
    async fn remove(&self, id: &AccountId) -> anyhow::Result<()>;

    /// Returns every stored account record.
    async fn list_all(&self) -> anyhow::Result<Vec<AccountRecord>>;
}

/// In-memory `AccountStore` over a concurrent map.
///
/// The engine's persistence contract is plain get/store/iterate-all; this
/// implementation backs tests and single-process deployments where account
/// state is re-seeded at startup.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    records: DashMap<AccountId, AccountRecord>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get(&self, id: &AccountId) -> anyhow::Result<Option<AccountRecord>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn store(&self, record: &AccountRecord) -> anyhow::Result<()> {
        self.records.insert(record.id().clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, id: &AccountId) -> anyhow::Result<()> {
        self.records.remove(id);
        Ok(())
    }

    async fn list_all(&self) -> anyhow::Result<Vec<AccountRecord>> {
        Ok(self.records.iter().map(|r| r.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    #[tokio::test]
    async fn store_and_get_roundtrip() {
        let store = MemoryAccountStore::new();
        let record = AccountRecord::new(id("a1"));
        store.store(&record).await.unwrap();

        let loaded = store.get(&id("a1")).await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = MemoryAccountStore::new();
        assert!(store.get(&id("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_overwrites_existing() {
        let store = MemoryAccountStore::new();
        let mut record = AccountRecord::new(id("a1"));
        store.store(&record).await.unwrap();

        record.record_error("boom");
        store.store(&record).await.unwrap();

        let loaded = store.get(&id("a1")).await.unwrap().unwrap();
        assert_eq!(loaded.error(), Some("boom"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = MemoryAccountStore::new();
        store.store(&AccountRecord::new(id("a1"))).await.unwrap();
        store.remove(&id("a1")).await.unwrap();
        store.remove(&id("a1")).await.unwrap();
        assert!(store.get(&id("a1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_all_returns_every_record() {
        let store = MemoryAccountStore::new();
        store.store(&AccountRecord::new(id("a1"))).await.unwrap();
        store.store(&AccountRecord::new(id("a2"))).await.unwrap();
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
