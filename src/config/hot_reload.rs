//! Config Watcher — Restart Trigger on config.toml Changes
//!
//! Periodically re-reads config.toml and compares it with the last
//! seen contents. When a meaningful change is detected the new config
//! is broadcast via a `tokio::sync::watch` channel; the supervisor
//! treats that as a restart condition and rebuilds the engine with the
//! new parameters, without replacing the process.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use super::AppConfig;

/// How often the config file is polled. A poll, not a filesystem
/// watcher: inotify-style APIs behave differently across
/// Linux/macOS/Docker volumes.
const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Watches config.toml for changes and broadcasts updates.
pub struct ConfigWatcher {
    /// Path to config.toml.
    config_path: String,
    /// Watch channel sender for config updates.
    config_tx: watch::Sender<AppConfig>,
    /// Last known content hash (for diff detection).
    last_hash: Option<u64>,
}

impl ConfigWatcher {
    /// Create a new config watcher.
    ///
    /// Returns the watcher and a watch::Receiver the engine selects on
    /// to learn about config changes.
    pub fn new(
        config_path: &str,
        initial_config: AppConfig,
    ) -> (Self, watch::Receiver<AppConfig>) {
        let (config_tx, config_rx) = watch::channel(initial_config);

        let watcher = Self {
            config_path: config_path.to_string(),
            config_tx,
            last_hash: None,
        };

        (watcher, config_rx)
    }

    /// Run the config watcher loop until shutdown.
    ///
    /// On change, the file is reloaded through the full validation
    /// path; an invalid edit keeps the running config and logs.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(
        &mut self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!(
            path = %self.config_path,
            interval_secs = CHECK_INTERVAL.as_secs(),
            "Config watcher started"
        );

        // Compute initial hash
        self.last_hash = self.compute_hash().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Config watcher shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(CHECK_INTERVAL) => {
                    self.check_and_reload().await;
                }
            }
        }
    }

    /// Check if config has changed and reload if so.
    async fn check_and_reload(&mut self) {
        let new_hash = self.compute_hash().await;

        if new_hash == self.last_hash {
            debug!("Config unchanged");
            return;
        }

        info!("Config change detected, reloading");

        match super::loader::load_config(&self.config_path) {
            Ok(new_config) => {
                self.last_hash = new_hash;
                if self.config_tx.send(new_config).is_err() {
                    warn!("No config watchers — update dropped");
                } else {
                    info!("Config reloaded; engine will restart");
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to reload config — keeping current"
                );
            }
        }
    }

    /// Hash of the config file contents for diff detection.
    async fn compute_hash(&self) -> Option<u64> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let content = tokio::fs::read_to_string(&self.config_path)
            .await
            .ok()?;

        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Some(hasher.finish())
    }
}
