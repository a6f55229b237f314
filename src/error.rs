//! # Error Types Module
//!
//! Centralized error handling for ble-scout.
//!
//! ## Error Types
//! - `ScanError`: scan session and device registry failures
//! - `ConfigError`: Configuration file I/O and parsing errors
//!
//! ## Usage Examples
//! ```rust
//! // Scan controller surfaces radio failures to the caller
//! pub fn start_scan(&mut self) -> Result<(), ScanError> { ... }
//!
//! // Registry lookups fail on a bad row
//! pub fn at(&self, index: usize) -> Result<&DiscoveredDevice, ScanError> { ... }
//!
//! // Config module uses ConfigError
//! pub fn load() -> Result<Config, ConfigError> { ... }
//! ```
//!
//! None of these are retried internally. A failed start leaves the session
//! idle and the caller decides whether to try again.

use std::fmt;

/// Errors that can occur while scanning or reading scan results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// No Bluetooth adapter present, or the adapter is switched off
    RadioUnavailable,
    /// The radio rejected the request to start discovery
    StartFailed(String),
    /// Registry position past the end of the list
    IndexOutOfRange { index: usize, len: usize },
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::RadioUnavailable => {
                write!(f, "No Bluetooth adapter available. Please ensure Bluetooth is enabled.")
            }
            ScanError::StartFailed(reason) => {
                write!(f, "Failed to start scan: {}", reason)
            }
            ScanError::IndexOutOfRange { index, len } => {
                write!(f, "Device index {} out of range ({} devices)", index, len)
            }
        }
    }
}

impl std::error::Error for ScanError {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}
