//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\xr-player\config.toml
//! - macOS: ~/Library/Application Support/xr-player/config.toml
//! - Linux: ~/.config/xr-player/config.toml
//!
//! Every value has a default, so an empty or partial file is valid. The
//! timing constants here drive the readiness gate and the XR synchronizer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Readiness gate timing
    pub preload: PreloadConfig,

    /// XR synchronizer timing
    pub sync: SyncConfig,

    /// State store settings
    pub store: StoreConfig,
}

/// Readiness gate timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Delay before the play-pause-rewind probe (ms)
    pub probe_delay_ms: u64,

    /// Delay between the two seek nudges when the probe is refused (ms)
    pub nudge_delay_ms: u64,

    /// Ready-state polling period (ms)
    pub poll_interval_ms: u64,

    /// Maximum number of ready-state samples
    pub poll_samples: u32,

    /// Hard ceiling after which a preload resolves unconfirmed (ms)
    pub timeout_ms: u64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            probe_delay_ms: 100,
            nudge_delay_ms: 100,
            poll_interval_ms: 500,
            poll_samples: 10,
            timeout_ms: 10_000,
        }
    }
}

impl PreloadConfig {
    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_ms)
    }

    pub fn nudge_delay(&self) -> Duration {
        Duration::from_millis(self.nudge_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// XR synchronizer timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum audio/video divergence before the video is snapped (seconds)
    pub drift_tolerance_secs: f64,

    /// Drift check period while XR is active (ms)
    pub interval_ms: u64,

    /// Step used by the skip buttons (seconds)
    pub skip_secs: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_tolerance_secs: 0.3,
            interval_ms: 250,
            skip_secs: 10.0,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// State store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of error records kept (oldest evicted first)
    pub error_log_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            error_log_capacity: 256,
        }
    }
}

impl Config {
    /// Serialize to pretty TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("xr-player"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from the default location
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match load_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            tracing::warn!("Using default configuration");
            Config::default()
        }
    }
}

/// Load configuration from an explicit file.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    let config =
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
    tracing::info!("Loaded config from {:?}", path);
    Ok(config)
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
}

// ============================================================================
// Tests
// ============================================================================
