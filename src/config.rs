//! # Configuration Management Module
//!
//! Persistent scanner settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `scan_duration_secs`: How long a scan session runs before stopping on its own
//! - `scan_on_startup`: Start a scan as soon as the application opens
//! - `adapter_index`: Which Bluetooth adapter to scan with when several exist
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/ble-scout/config.toml
//! - Linux: ~/.config/ble-scout/config.toml
//! - Windows: %APPDATA%\ble-scout\config.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::ConfigError;

/// Two minutes, long enough to catch peripherals with slow advertising intervals
const DEFAULT_SCAN_DURATION_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan_duration_secs: u64,
    pub scan_on_startup: bool,
    pub adapter_index: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_duration_secs: DEFAULT_SCAN_DURATION_SECS,
            scan_on_startup: true,
            adapter_index: 0,
        }
    }
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ble-scout")
            .join("config.toml")
    }

    /// Load config from the default location, or create it with defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, writing a default file if none exists
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let mut config: Config = toml::from_str(&contents)
                    .map_err(ConfigError::ParseFailed)?;
                if config.scan_duration_secs == 0 {
                    log::warn!("scan_duration_secs = 0 in {}, using 1 second", path.display());
                    config.scan_duration_secs = 1;
                }
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                log::info!("Created default config at {}", path.display());
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string)
            .map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }
}
