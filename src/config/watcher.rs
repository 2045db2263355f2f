//! Keeper configuration watcher for hot reload.
//!
//! Only settings read per request (admin key, reachability timeouts) take
//! effect on reload; paths and restarter timings need a daemon restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use arc_swap::ArcSwap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use crate::config::loader::load_config;
use crate::config::schema::KeeperConfig;

/// Monitors the keeper configuration file and publishes validated updates.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<KeeperConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<KeeperConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (Self {
            path: path.to_path_buf(),
            update_tx,
        }, update_rx)
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(move |res: notify::Result<Event>| {
            match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?path, "Keeper config change detected, reloading");
                    match load_config(&path) {
                        Ok(new_config) => {
                            let _ = tx.send(new_config);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            }
        }, Config::default().with_poll_interval(Duration::from_secs(2)))?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Apply updates from the watcher to the shared configuration until the
/// channel closes.
pub async fn apply_updates(
    shared: Arc<ArcSwap<KeeperConfig>>,
    mut updates: mpsc::UnboundedReceiver<KeeperConfig>,
) {
    while let Some(config) = updates.recv().await {
        shared.store(Arc::new(config));
        tracing::info!("Keeper configuration reloaded");
    }
}
