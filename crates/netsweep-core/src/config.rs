//! Configuration management for netsweep.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
///
/// Loaded from `~/.config/netsweep/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scan execution settings
    pub scanning: ScanningConfig,
    /// External tool settings
    pub tool: ToolConfig,
    /// Progress heuristic settings
    pub progress: ProgressConfig,
    /// Persistence settings
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `NETSWEEP_MAX_CONCURRENT_SCANS`: Override the concurrent scan cap
    /// - `NETSWEEP_TOOL_PATH`: Override the scan tool binary path
    /// - `NETSWEEP_GRACE_PERIOD_SECS`: Override the cancellation grace period
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;

        if let Ok(val) = std::env::var("NETSWEEP_MAX_CONCURRENT_SCANS") {
            if let Ok(cap) = val.parse() {
                config.scanning.max_concurrent_scans = cap;
                tracing::debug!("Override max_concurrent_scans from env: {}", cap);
            }
        }

        if let Ok(val) = std::env::var("NETSWEEP_TOOL_PATH") {
            config.tool.path = Some(PathBuf::from(val));
            tracing::debug!("Override tool.path from env");
        }

        if let Ok(val) = std::env::var("NETSWEEP_GRACE_PERIOD_SECS") {
            if let Ok(secs) = val.parse() {
                config.scanning.cancel_grace_secs = secs;
                tracing::debug!("Override cancel_grace_secs from env: {}", secs);
            }
        }

        Ok(config)
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/netsweep/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("org", "netsweep", "netsweep").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path (database location).
    ///
    /// Uses XDG base directories: `~/.local/share/netsweep`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("org", "netsweep", "netsweep").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Scan execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    /// Maximum number of concurrently running tool invocations
    pub max_concurrent_scans: usize,
    /// Seconds to wait after a graceful stop before force-killing the tool
    pub cancel_grace_secs: u64,
    /// Minimum confidence (0-100) for an OS guess to enter the primary list
    pub min_os_confidence: u8,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: 4,
            cancel_grace_secs: 5,
            min_os_confidence: 70,
        }
    }
}

impl ScanningConfig {
    /// The cancellation grace period as a `Duration`.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Binary name searched for on `PATH`
    pub binary: String,
    /// Explicit binary path, bypassing the `PATH` search
    pub path: Option<PathBuf>,
    /// Minimum acceptable tool version, e.g. "7.80" (unenforced when unset)
    pub minimum_version: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: "nmap".to_string(),
            path: None,
            minimum_version: None,
        }
    }
}

/// Progress heuristic settings: expected wall-clock duration per profile,
/// in seconds, used for elapsed-time progress estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Expected duration of a quick scan
    pub quick_secs: u64,
    /// Expected duration of a full port-range scan
    pub full_secs: u64,
    /// Expected duration of a ping sweep
    pub ping_secs: u64,
    /// Expected duration of a service-detection scan
    pub service_secs: u64,
    /// Expected duration of an OS-detection scan
    pub os_detection_secs: u64,
    /// Expected duration of a comprehensive scan
    pub comprehensive_secs: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            quick_secs: 30,
            full_secs: 600,
            ping_secs: 10,
            service_secs: 120,
            os_detection_secs: 90,
            comprehensive_secs: 300,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path; defaults to `<data_dir>/netsweep.db` when unset
    pub path: Option<PathBuf>,
    /// Maximum connections in the pool
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.scanning.max_concurrent_scans, 4);
        assert_eq!(config.scanning.cancel_grace(), Duration::from_secs(5));
        assert_eq!(config.tool.binary, "nmap");
        assert!(config.tool.minimum_version.is_none());
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [scanning]
            max_concurrent_scans = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.scanning.max_concurrent_scans, 2);
        assert_eq!(config.scanning.cancel_grace_secs, 5);
        assert_eq!(config.tool.binary, "nmap");
    }

    #[test]
    fn test_round_trip() {
        let config = AppConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let restored: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(
            restored.scanning.max_concurrent_scans,
            config.scanning.max_concurrent_scans
        );
        assert_eq!(restored.progress.quick_secs, config.progress.quick_secs);
    }
}
