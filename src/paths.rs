//! Application path resolution
//!
//! The config file is looked up in this order:
//!
//! 1. an explicit `--config` path (or `KEYMIDI_CONFIG`);
//! 2. `keymidi.yaml` in the current working directory;
//! 3. `<config dir>/keymidi/config.yaml` (`~/.config` on Linux, `%APPDATA%` on Windows).
//!
//! Logs always go to `<local data dir>/keymidi/logs`, because the terminal is
//! busy drawing the keyboard while playing.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application name used for directories
const APP_NAME: &str = "keymidi";

/// Config file name looked up in the working directory
pub const LOCAL_CONFIG: &str = "keymidi.yaml";

/// Resolved application paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Path to the configuration file (may not exist)
    pub config: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
}

impl AppPaths {
    /// Resolve paths for this run.
    pub fn detect(explicit_config: Option<PathBuf>) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::resolve(explicit_config, &cwd, dirs::config_dir(), dirs::data_local_dir())
    }

    fn resolve(
        explicit_config: Option<PathBuf>,
        cwd: &Path,
        config_dir: Option<PathBuf>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        let logs_dir = data_dir
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_NAME)
            .join("logs");

        let config = explicit_config.unwrap_or_else(|| {
            let local = cwd.join(LOCAL_CONFIG);
            if local.exists() {
                local
            } else {
                config_dir
                    .map(|dir| dir.join(APP_NAME).join("config.yaml"))
                    .unwrap_or(local)
            }
        });

        Self { config, logs_dir }
    }

    /// Ensure the logs directory exists.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir).with_context(|| {
                format!("Failed to create logs directory {}", self.logs_dir.display())
            })?;
        }
        Ok(())
    }

    /// Ensure the config file's parent directory exists (for `--init-config`)
    pub fn ensure_config_dir(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.config.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating config directory: {}", parent.display());
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory {}", parent.display())
                })?;
            }
        }
        Ok(())
    }
}
