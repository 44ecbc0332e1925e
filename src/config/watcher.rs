//! Config file hot reload
//!
//! The directory holding the config file is watched rather than the file
//! itself: editors that save through a temporary file and a rename replace
//! the inode, and a watch on the old one goes quiet. Events for other files in
//! the directory are ignored. Bursts of events are coalesced into one reload
//! once the file has been quiet for [`SETTLE_DELAY`].

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Quiet period after the last file event before reloading
pub const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Delivers a freshly validated [`AppConfig`] each time the file changes
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load the config at `config_path` and start watching it
    pub async fn new(config_path: PathBuf) -> Result<(Self, AppConfig)> {
        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        let file_name = config_path
            .file_name()
            .map(OsString::from)
            .with_context(|| format!("Not a file path: {}", config_path.display()))?;
        let watch_dir = match config_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // notify calls back on its own thread; it only signals, the runtime
        // task does the loading
        let (touch_tx, touch_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if touches(&event, &file_name) => {
                    debug!("Config file event: {:?}", event.kind);
                    let _ = touch_tx.send(());
                }
                Ok(_) => {}
                Err(e) => error!("Watch error: {}", e),
            }
        })?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch directory: {}", watch_dir.display()))?;

        let (config_tx, rx) = mpsc::channel(4);
        tokio::spawn(reload_loop(
            config_path.clone(),
            initial_config.clone(),
            touch_rx,
            config_tx,
        ));

        info!("Config file watcher started for: {}", config_path.display());

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            initial_config,
        ))
    }

    /// Wait for the next config update.
    /// Returns None if the watcher has been closed
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

fn touches(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str()))
}

/// Ends when the watcher is dropped (signal sender gone) or nobody listens
async fn reload_loop(
    config_path: PathBuf,
    mut current: AppConfig,
    mut touched: mpsc::UnboundedReceiver<()>,
    configs: mpsc::Sender<AppConfig>,
) {
    while touched.recv().await.is_some() {
        // Wait until the burst is over
        loop {
            match tokio::time::timeout(SETTLE_DELAY, touched.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        let Some(new_config) = reload(&config_path).await else {
            continue;
        };
        if new_config == current {
            debug!("Config file touched without changes");
            continue;
        }

        info!("Configuration reloaded successfully");
        current = new_config.clone();
        if configs.send(new_config).await.is_err() {
            return;
        }
    }
}

async fn reload(config_path: &Path) -> Option<AppConfig> {
    match AppConfig::load(config_path).await {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("Failed to reload config (keeping old config): {:#}", e);
            None
        }
    }
}
