//! Configuration file watcher for hot reload.
//!
//! # Design Decisions
//! - Watches the parent directory so editors that save by rename are seen
//! - One save emits several events; they are collapsed into one reload
//! - Command-line overrides are re-applied to every reloaded config

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config_with;
use crate::config::overrides::Overrides;
use crate::config::schema::GatewayConfig;

/// Quiet period after the last file event before reloading.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Reloads the configuration file when it changes.
pub struct ConfigWatcher {
    path: PathBuf,
    overrides: Overrides,
    debounce: Duration,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiver reloaded configs arrive on.
    pub fn new(
        path: &Path,
        overrides: Overrides,
    ) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            overrides,
            debounce: DEFAULT_DEBOUNCE,
            update_tx,
        };
        (watcher, update_rx)
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Must be called from within a Tokio runtime; the
    /// returned handle stops the watch when dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(OsString::from);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = (event.kind.is_modify() || event.kind.is_create())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == file_name.as_deref());
                    if relevant {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, debounce = ?self.debounce, "Config watcher started");
        tokio::spawn(self.reload_on_change(event_rx));
        Ok(watcher)
    }

    async fn reload_on_change(self, mut events: mpsc::UnboundedReceiver<()>) {
        while events.recv().await.is_some() {
            // Let the burst from a single save settle, then drop what queued up.
            tokio::time::sleep(self.debounce).await;
            while events.try_recv().is_ok() {}

            match load_config_with(&self.path, &self.overrides) {
                Ok(config) => {
                    tracing::info!(path = ?self.path, "Config file changed, reloading");
                    if self.update_tx.send(config).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Failed to reload config, keeping current configuration"
                    );
                }
            }
        }
    }
}
