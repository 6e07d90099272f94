//! Daemon configuration.
//!
//! Operational parameters load from a TOML file and may be overridden
//! field-by-field from the command line. A missing file falls back to the
//! built-in defaults; a malformed file is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PodError;
use crate::manager::PollSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// USB vendor id to scan for.
    pub vendor_id: u16,
    /// USB product id to scan for.
    pub product_id: u16,
    /// Fixed device path. Disables scanning; the daemon exits when this
    /// device disconnects.
    pub device: Option<String>,
    /// Milliseconds between update cycles.
    pub update_interval_ms: u64,
    /// Milliseconds between device rescans (0 disables).
    pub scan_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vendor_id: 0x04d8,
            product_id: 0xf12d,
            device: None,
            update_interval_ms: 5,
            scan_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Parses the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, PodError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PodError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| PodError::Config(format!("{}: {e}", path.display())))
    }

    /// Loads `path` if it exists; built-in defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, PodError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// `podd/config.toml` under the platform config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("podd")
            .join("config.toml")
    }
}

impl From<&Config> for PollSettings {
    fn from(cfg: &Config) -> Self {
        PollSettings {
            vendor_id: cfg.vendor_id,
            product_id: cfg.product_id,
            device_path: cfg.device.clone(),
            // The loop needs a nonzero cadence.
            update_interval: Duration::from_millis(cfg.update_interval_ms.max(1)),
            scan_interval: Duration::from_millis(cfg.scan_interval_ms),
        }
    }
}

/// Expands a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
