//! Plumesync watcher-host daemon
//!
//! Runs as a background service on the mirror host and keeps:
//! - one filesystem watcher per connected account, forwarding settled
//!   changes to the canonical side through the remote agent client
//! - the live file index of local copies
//! - the periodic disk-pressure eviction sweep
//!
//! The daemon loads its configuration, attaches watchers for every account
//! already past setup, then idles on the sweep interval until SIGTERM or
//! SIGINT cancels the shutdown token.

mod local;
mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use plumesync_agent::{DispatchQueue, Evictor, FileIndex, WatcherRegistry};
use plumesync_core::config::Config;
use plumesync_core::ports::{AccountStore, MirrorProvider};
use plumesync_remote::AgentClient;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::local::LocalMirrorAdapter;
use crate::store::JsonAccountStore;

/// Wires the watcher-host subsystems together and runs the sweep loop.
struct AgentService {
    config: Config,
    store: Arc<dyn AccountStore>,
    registry: WatcherRegistry,
    evictor: Evictor,
    shutdown: CancellationToken,
}

impl AgentService {
    fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let max_upload_bytes = config.sync.max_file_size_mb * 1024 * 1024;
        let client = AgentClient::new(&config.remote, max_upload_bytes)
            .context("building remote agent client")?;

        let store_path = config.sync.data_root.join("accounts.json");
        let store: Arc<dyn AccountStore> =
            Arc::new(JsonAccountStore::open(store_path).context("opening account store")?);
        let index = Arc::new(FileIndex::new());
        let queue = Arc::new(DispatchQueue::new(
            Arc::new(client),
            config.watcher.queue_capacity,
            Duration::from_millis(config.watcher.dispatch_spacing_ms),
        ));
        let registry = WatcherRegistry::new(
            &config.sync.data_root,
            index.clone(),
            store.clone(),
            queue,
            Duration::from_millis(config.watcher.debounce_ms),
        );
        let provider: Arc<dyn MirrorProvider> =
            Arc::new(LocalMirrorAdapter::new(&config.sync.data_root));
        let evictor = Evictor::new(index, provider, registry.clone(), &config.eviction);

        Ok(Self {
            config,
            store,
            registry,
            evictor,
            shutdown,
        })
    }

    async fn run(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.sync.data_root)
            .await
            .with_context(|| {
                format!(
                    "creating data root {}",
                    self.config.sync.data_root.display()
                )
            })?;

        self.watch_known_accounts().await;
        let result = self.sweep_loop().await;

        self.registry.shutdown();
        result
    }

    /// Attaches watchers for every account that already finished setup.
    async fn watch_known_accounts(&self) {
        let records = match self.store.list_all().await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = format!("{err:#}"), "listing accounts failed");
                return;
            }
        };
        for record in records.iter().filter(|r| r.setup_complete()) {
            if let Err(err) = self.registry.watch(record.id()).await {
                warn!(
                    account = %record.id(),
                    error = format!("{err:#}"),
                    "attaching watcher failed"
                );
            }
        }
        info!(
            accounts = records.iter().filter(|r| r.setup_complete()).count(),
            "startup watch pass finished"
        );
    }

    /// Runs eviction sweeps on the configured interval until shutdown.
    async fn sweep_loop(&self) -> Result<()> {
        let period = Duration::from_secs(self.config.eviction.sweep_interval_minutes * 60);
        info!(
            sweep_interval_minutes = self.config.eviction.sweep_interval_minutes,
            threshold_bytes = self.evictor.threshold_bytes(),
            "starting eviction sweep loop"
        );

        let mut interval = tokio::time::interval(period);
        // the immediate first tick would sweep an index that is still empty
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.evictor.sweep().await;
                    if report.failures > 0 {
                        warn!(failures = report.failures, "eviction sweep had failures");
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Cancels the token on SIGTERM or SIGINT.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "installing Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "installing SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(config_path = %config_path.display(), "plumesync watcher host starting");

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(field = %problem.field, "{}", problem.message);
        }
        anyhow::bail!("configuration is invalid ({} problems)", problems.len());
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = AgentService::new(config, shutdown)?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("watcher host shut down gracefully"),
        Err(err) => error!(error = format!("{err:#}"), "watcher host exiting with error"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_token_propagates_to_children() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn service_builds_from_the_default_config() {
        let mut config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        config.sync.data_root = dir.path().to_path_buf();
        let service = AgentService::new(config, CancellationToken::new()).unwrap();
        assert_eq!(service.store.list_all().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn startup_reattaches_watchers_for_persisted_accounts() {
        use plumesync_core::domain::{AccountId, AccountRecord};

        let mut config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        config.sync.data_root = dir.path().to_path_buf();
        let account = AccountId::new("a1").unwrap();
        std::fs::create_dir(dir.path().join("a1")).unwrap();

        // a previous run left a finished account behind
        {
            let store = JsonAccountStore::open(dir.path().join("accounts.json")).unwrap();
            let mut record = AccountRecord::new(account.clone());
            record.mark_setup_complete();
            store.store(&record).await.unwrap();
        }

        let service = AgentService::new(config, CancellationToken::new()).unwrap();
        service.watch_known_accounts().await;
        assert!(service.registry.is_watching(&account));
        service.registry.shutdown();
    }
}
