//! Application path management.
//!
//! ## Mode Detection
//!
//! - **Local mode**: `config.yaml` exists in the current working directory;
//!   config and logs live next to it. This is the normal case when the
//!   gateway is started from its checkout or install folder.
//! - **Installed mode** (default): config and logs live in the platform
//!   config directory (`~/.config/Mixer GW` on Linux, `%APPDATA%\Mixer GW`
//!   on Windows).

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application name used for directories in installed mode
const APP_NAME: &str = "Mixer GW";

const CONFIG_FILE: &str = "config.yaml";

/// Application paths for config and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Path to the logs directory
    pub logs_dir: PathBuf,
    /// Whether the config was found in the working directory
    pub is_local: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// Called before logging is initialized.
    pub fn detect() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let installed = dirs::config_dir().map(|dir| dir.join(APP_NAME));
        Self::resolve(&cwd, installed)
    }

    /// Paths for an explicitly given config file; logs go next to it
    pub fn for_config(config: impl Into<PathBuf>) -> Self {
        let config = config.into();
        let base = config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            logs_dir: base.join("logs"),
            config,
            is_local: true,
        }
    }

    fn resolve(cwd: &Path, installed: Option<PathBuf>) -> Self {
        let local_config = cwd.join(CONFIG_FILE);
        if local_config.exists() {
            return Self::for_config(local_config);
        }

        // Without a platform directory, fall back to the working directory
        let base = installed.unwrap_or_else(|| cwd.to_path_buf());
        Self {
            config: base.join(CONFIG_FILE),
            logs_dir: base.join("logs"),
            is_local: false,
        }
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Create the logs directory if needed
    pub fn ensure_logs_dir(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir).with_context(|| {
                format!("Failed to create logs directory {}", self.logs_dir.display())
            })?;
        }
        Ok(())
    }
}
