//! # Sync Configuration
//!
//! Configuration for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                           │
//! │                                                                     │
//! │  1. Environment Variables (highest priority)                        │
//! │     TALLY_SERVER_URL=https://pos.example.com/api                    │
//! │     TALLY_DEVICE_ID=abc-123                                         │
//! │                                                                     │
//! │  2. TOML Config File                                                │
//! │     ~/.config/tally-pos/sync.toml (Linux)                           │
//! │     ~/Library/Application Support/com.tally.pos/sync.toml (macOS)   │
//! │                                                                     │
//! │  3. Default Values (lowest priority)                                │
//! │     auto-generated device id, 5 retries, 10 min dup window          │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [server]
//! base_url = "https://pos.example.com/api"
//! connect_timeout_secs = 10
//! request_timeout_secs = 30
//!
//! [sync]
//! max_retry_attempts = 5
//! duplicate_window_secs = 600
//! fetch_interval_secs = 300
//! cleanup_interval_secs = 1800
//! ```
//!
//! The four timing knobs deliberately have the shipped defaults rather than
//! being hard constants: stores with slow back offices widen the duplicate
//! window, kiosks on good networks shorten the fetch interval.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Register 1", "Back Office").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Server Settings
// =============================================================================

/// Where and how to reach the authoritative server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base URL of the REST API, e.g. `https://pos.example.com/api`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Failed attempts before a mutation is evicted from its queue.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Window within which two content-identical submissions are treated
    /// as the same sale rung up twice (seconds).
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window_secs: u64,

    /// A reconciliation fetch runs when the last one is older than this
    /// (seconds), even if no mutation pass made progress.
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_secs: u64,

    /// Periodic sweep interval for mutations stuck past the retry cap
    /// (seconds).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_max_retry_attempts() -> u32 {
    5
}
fn default_duplicate_window() -> u64 {
    600
}
fn default_fetch_interval() -> u64 {
    300
}
fn default_cleanup_interval() -> u64 {
    1800
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            max_retry_attempts: default_max_retry_attempts(),
            duplicate_window_secs: default_duplicate_window(),
            fetch_interval_secs: default_fetch_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Authoritative server settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Sync behavior settings.
    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// Creates a config with defaults and a generated device id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns defaults if loading fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::InvalidConfig(
                "Device id must not be empty".into(),
            ));
        }

        if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            return Err(SyncError::InvalidConfig(format!(
                "Server base_url must start with http:// or https://, got: {}",
                self.server.base_url
            )));
        }

        if self.sync.max_retry_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_retry_attempts must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("TALLY_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device id from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("TALLY_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(url) = std::env::var("TALLY_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.base_url = url;
        }

        if let Ok(raw) = std::env::var("TALLY_MAX_RETRY_ATTEMPTS") {
            match raw.parse::<u32>() {
                Ok(v) => self.sync.max_retry_attempts = v,
                Err(_) => warn!(value = %raw, "Ignoring non-numeric TALLY_MAX_RETRY_ATTEMPTS"),
            }
        }

        if let Ok(raw) = std::env::var("TALLY_FETCH_INTERVAL_SECS") {
            match raw.parse::<u64>() {
                Ok(v) => self.sync.fetch_interval_secs = v,
                Err(_) => warn!(value = %raw, "Ignoring non-numeric TALLY_FETCH_INTERVAL_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "pos")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The content-duplicate window as a chrono duration.
    pub fn duplicate_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sync.duplicate_window_secs as i64)
    }

    /// The fetch staleness threshold as a chrono duration.
    pub fn fetch_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sync.fetch_interval_secs as i64)
    }

    /// The cleanup sweep interval as a std duration (timer-facing).
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.sync.cleanup_interval_secs)
    }

    /// The retry cap.
    pub fn max_retries(&self) -> u32 {
        self.sync.max_retry_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.device.id.is_empty()); // Auto-generated
        assert_eq!(config.sync.max_retry_attempts, 5);
        assert_eq!(config.sync.duplicate_window_secs, 600);
        assert_eq!(config.sync.fetch_interval_secs, 300);
        assert_eq!(config.sync.cleanup_interval_secs, 1800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.device.id = String::new();
        assert!(config.validate().is_err());

        config.device.id = "dev-1".to_string();
        config.server.base_url = "ftp://nope".to_string();
        assert!(config.validate().is_err());

        config.server.base_url = "https://pos.example.com/api".to_string();
        config.sync.max_retry_attempts = 0;
        assert!(config.validate().is_err());

        config.sync.max_retry_attempts = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SyncConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[device]"));
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[sync]"));

        let back: SyncConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.sync.max_retry_attempts, config.sync.max_retry_attempts);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [sync]
            duplicate_window_secs = 120
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.duplicate_window_secs, 120);
        assert_eq!(config.sync.max_retry_attempts, 5);
        assert_eq!(config.server.base_url, "http://localhost:8080/api");
    }
}
