//! Disk-pressure evictor
//!
//! Periodically checks aggregate local usage against the configured cap
//! and, when it crosses the threshold, frees local copies until usage is
//! back under it. Candidates come from the [`FileIndex`] largest-first,
//! least-recently-touched first, heaviest accounts first.
//!
//! An account's watcher is detached while its files are being freed, so
//! the pipeline never mistakes an eviction for a user deletion, and
//! re-attached afterwards. Only local copies are freed; the canonical
//! side is never touched.

use std::sync::Arc;

use plumesync_core::config::EvictionConfig;
use plumesync_core::domain::AccountId;
use plumesync_core::ports::MirrorProvider;
use tracing::{debug, info, warn};

use crate::index::FileIndex;
use crate::pipeline::WatcherRegistry;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvictionReport {
    pub files_freed: u64,
    pub bytes_freed: u64,
    pub failures: u64,
}

pub struct Evictor {
    index: Arc<FileIndex>,
    provider: Arc<dyn MirrorProvider>,
    registry: WatcherRegistry,
    max_usage_bytes: u64,
    threshold_percent: u64,
}

impl Evictor {
    pub fn new(
        index: Arc<FileIndex>,
        provider: Arc<dyn MirrorProvider>,
        registry: WatcherRegistry,
        config: &EvictionConfig,
    ) -> Self {
        Self {
            index,
            provider,
            registry,
            max_usage_bytes: config.max_usage_mb * 1024 * 1024,
            threshold_percent: u64::from(config.threshold_percent),
        }
    }

    /// Usage above this many bytes triggers eviction; sweeps free copies
    /// until usage is back at or under it.
    pub fn threshold_bytes(&self) -> u64 {
        self.max_usage_bytes / 100 * self.threshold_percent
    }

    /// One sweep. Does nothing while usage is at or under the threshold.
    pub async fn sweep(&self) -> EvictionReport {
        let mut report = EvictionReport::default();
        let threshold = self.threshold_bytes();
        let mut usage = self.index.total_usage();
        if usage <= threshold {
            debug!(usage, threshold, "local usage under threshold");
            return report;
        }
        info!(usage, threshold, "local usage over threshold, freeing local copies");

        for (account, _) in self.index.accounts_by_usage() {
            if usage <= threshold {
                break;
            }
            usage = self.evict_from(&account, usage, threshold, &mut report).await;
        }

        info!(
            files = report.files_freed,
            bytes = report.bytes_freed,
            failures = report.failures,
            usage,
            "eviction sweep finished"
        );
        report
    }

    async fn evict_from(
        &self,
        account: &AccountId,
        mut usage: u64,
        threshold: u64,
        report: &mut EvictionReport,
    ) -> u64 {
        // detach the watcher so freeing copies is not observed as deletions
        let suspended = self.registry.unwatch(account).is_some();

        for candidate in self.index.candidates(account) {
            if usage <= threshold {
                break;
            }
            match self.provider.free_local_copy(account, &candidate.path).await {
                Ok(()) => {
                    self.index.remove(account, &candidate.path);
                    usage = usage.saturating_sub(candidate.size);
                    report.files_freed += 1;
                    report.bytes_freed += candidate.size;
                    debug!(account = %account, path = %candidate.path, size = candidate.size, "freed local copy");
                }
                Err(err) => {
                    report.failures += 1;
                    warn!(
                        account = %account,
                        path = %candidate.path,
                        error = format!("{err:#}"),
                        "freeing local copy failed"
                    );
                }
            }
        }

        if suspended {
            if let Err(err) = self.registry.watch(account).await {
                warn!(
                    account = %account,
                    error = format!("{err:#}"),
                    "re-attaching watcher after eviction failed"
                );
            }
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use plumesync_core::domain::MirrorPath;
    use plumesync_core::ports::{MemoryAccountStore, MemoryMirrorProvider, RecordedOp};

    use crate::queue::{ChangeSink, DispatchQueue};

    fn account(id: &str) -> AccountId {
        AccountId::new(id).unwrap()
    }

    fn path(s: &str) -> MirrorPath {
        MirrorPath::new(s).unwrap()
    }

    struct NullSink;

    #[async_trait::async_trait]
    impl ChangeSink for NullSink {
        async fn upload(
            &self,
            _account: &AccountId,
            _path: &MirrorPath,
            _body: Vec<u8>,
            _modified: Option<chrono::DateTime<chrono::Utc>>,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn mkdir(&self, _account: &AccountId, _path: &MirrorPath) -> anyhow::Result<()> {
            Ok(())
        }

        async fn delete(&self, _account: &AccountId, _path: &MirrorPath) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        index: Arc<FileIndex>,
        provider: Arc<MemoryMirrorProvider>,
        registry: WatcherRegistry,
        data_root: tempfile::TempDir,
    }

    /// Cap 1 MiB, threshold 50% (512 KiB).
    fn harness() -> Harness {
        let index = Arc::new(FileIndex::new());
        let provider = Arc::new(MemoryMirrorProvider::new());
        let data_root = tempfile::tempdir().unwrap();
        let registry = WatcherRegistry::new(
            data_root.path(),
            index.clone(),
            Arc::new(MemoryAccountStore::new()),
            Arc::new(DispatchQueue::new(Arc::new(NullSink), 16, Duration::ZERO)),
            Duration::from_millis(20),
        );
        Harness {
            index,
            provider,
            registry,
            data_root,
        }
    }

    fn evictor(h: &Harness) -> Evictor {
        Evictor::new(
            h.index.clone(),
            h.provider.clone() as Arc<dyn MirrorProvider>,
            h.registry.clone(),
            &EvictionConfig {
                max_usage_mb: 1,
                threshold_percent: 50,
                sweep_interval_minutes: 30,
            },
        )
    }

    const KIB: u64 = 1024;

    #[tokio::test]
    async fn sweep_below_threshold_frees_nothing() {
        let h = harness();
        h.index.record(&account("a1"), &path("a.md"), 100 * KIB);

        let report = evictor(&h).sweep().await;

        assert_eq!(report, EvictionReport::default());
        assert!(h.provider.ops().is_empty());
        assert_eq!(h.index.total_usage(), 100 * KIB);
    }

    #[tokio::test]
    async fn sweep_frees_largest_stalest_first_until_under_threshold() {
        let h = harness();
        let a1 = account("a1");
        h.index.record(&a1, &path("big.bin"), 600 * KIB);
        std::thread::sleep(Duration::from_millis(2));
        h.index.record(&a1, &path("medium.bin"), 200 * KIB);
        h.index.record(&a1, &path("small.md"), 4 * KIB);

        let report = evictor(&h).sweep().await;

        // freeing big.bin alone lands usage at 204 KiB, under the 512 KiB
        // threshold, so the rest survive
        assert_eq!(report.files_freed, 1);
        assert_eq!(report.bytes_freed, 600 * KIB);
        assert_eq!(h.provider.ops(), vec![RecordedOp::FreeLocalCopy(path("big.bin"))]);
        assert!(!h.index.contains(&a1, &path("big.bin")));
        assert!(h.index.contains(&a1, &path("medium.bin")));
        assert_eq!(h.index.total_usage(), 204 * KIB);
    }

    #[tokio::test]
    async fn sweep_spills_into_the_next_account_when_one_is_not_enough() {
        let h = harness();
        h.index.record(&account("heavy"), &path("h.bin"), 700 * KIB);
        h.index.record(&account("light"), &path("l.bin"), 600 * KIB);

        let report = evictor(&h).sweep().await;

        // freeing heavy alone leaves 600 KiB, still over the 512 KiB
        // threshold, so the sweep moves on to the next account
        assert_eq!(report.files_freed, 2);
        assert_eq!(report.bytes_freed, 1300 * KIB);
        assert_eq!(h.index.total_usage(), 0);
    }

    #[tokio::test]
    async fn failed_frees_are_counted_and_skipped() {
        let h = harness();
        let a1 = account("a1");
        h.index.record(&a1, &path("a.bin"), 600 * KIB);

        struct FailingProvider(Arc<MemoryMirrorProvider>);

        #[async_trait::async_trait]
        impl MirrorProvider for FailingProvider {
            async fn list(
                &self,
                account: &AccountId,
                dir: &MirrorPath,
            ) -> anyhow::Result<Vec<plumesync_core::domain::FileEntry>> {
                self.0.list(account, dir).await
            }

            async fn read(
                &self,
                account: &AccountId,
                p: &MirrorPath,
            ) -> anyhow::Result<Vec<u8>> {
                self.0.read(account, p).await
            }

            async fn upload(
                &self,
                account: &AccountId,
                p: &MirrorPath,
                data: &[u8],
                modified: Option<chrono::DateTime<chrono::Utc>>,
            ) -> anyhow::Result<()> {
                self.0.upload(account, p, data, modified).await
            }

            async fn mkdir(&self, account: &AccountId, p: &MirrorPath) -> anyhow::Result<()> {
                self.0.mkdir(account, p).await
            }

            async fn delete(&self, account: &AccountId, p: &MirrorPath) -> anyhow::Result<()> {
                self.0.delete(account, p).await
            }

            async fn list_shared_folders(
                &self,
                service_account: &str,
            ) -> anyhow::Result<Vec<plumesync_core::ports::SharedFolder>> {
                self.0.list_shared_folders(service_account).await
            }

            async fn free_local_copy(
                &self,
                _account: &AccountId,
                _path: &MirrorPath,
            ) -> anyhow::Result<()> {
                anyhow::bail!("placeholder write failed")
            }
        }

        let evictor = Evictor::new(
            h.index.clone(),
            Arc::new(FailingProvider(h.provider.clone())),
            h.registry.clone(),
            &EvictionConfig {
                max_usage_mb: 1,
                threshold_percent: 50,
                sweep_interval_minutes: 30,
            },
        );
        let report = evictor.sweep().await;

        assert_eq!(report.files_freed, 0);
        assert_eq!(report.failures, 1);
        // the entry stays indexed for the next sweep
        assert!(h.index.contains(&a1, &path("a.bin")));
    }

    #[tokio::test]
    async fn watched_account_is_reattached_after_eviction() {
        let h = harness();
        let a1 = account("a1");
        let root: PathBuf = h.data_root.path().join("a1");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("keep.md"), b"x").unwrap();
        h.registry.watch(&a1).await.unwrap();
        // pressure comes from an entry whose local copy is long gone from
        // disk but still indexed
        h.index.record(&a1, &path("big.bin"), 700 * KIB);

        let report = evictor(&h).sweep().await;

        assert!(report.files_freed >= 1);
        assert!(h.registry.is_watching(&a1));
        assert!(h.index.total_usage() <= 512 * KIB);
    }
}
