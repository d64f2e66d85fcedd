//! Watch control port (driving the watcher host)
//!
//! The setup poller finishes by asking the watcher host to start observing
//! the account's local folder, and account removal asks it to stop. The
//! watcher host lives behind an HTTP surface in production and behind an
//! in-process stub in tests, so the dependency is inverted through this
//! trait.

use crate::domain::AccountId;

/// Port trait for starting and stopping per-account folder watches.
#[async_trait::async_trait]
pub trait WatchControl: Send + Sync {
    /// Starts watching the account's local folder. Watching an
    /// already-watched account is a logged no-op.
    async fn watch(&self, account: &AccountId) -> anyhow::Result<()>;

    /// Tells the watcher host the account is gone; its folder watch stops.
    /// Disconnecting an unwatched account is a logged no-op.
    async fn disconnect(&self, account: &AccountId) -> anyhow::Result<()>;
}
