//! Centralized configuration for the simcat core.
//!
//! Constant holders group the fixed parameters of each subsystem. The
//! `ServiceConfig` struct carries the per-deployment settings and can be
//! loaded from a JSON file.

use crate::error::{Result, SimcatError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "simcat";
}

/// Model catalog configuration.
pub struct CatalogConfig;

impl CatalogConfig {
    /// Extension of model database files discovered by a refresh.
    pub const DB_FILE_EXTENSION: &'static str = "sqlite";
    /// Files SQLite keeps next to a database and which go away with it.
    pub const DB_SIDECAR_SUFFIXES: &'static [&'static str] = &["-wal", "-shm", "-journal"];
    pub const BUSY_TIMEOUT_MS: u32 = 30_000;
}

/// Paged read and conversion configuration.
pub struct ReadConfig;

impl ReadConfig {
    pub const DEFAULT_DOUBLE_FORMAT: &'static str = "%.15g";
    /// Code of the "total" item of a table dimension.
    pub const TOTAL_ENUM_CODE: &'static str = "all";
    pub const NULL_VALUE: &'static str = "null";
}

/// Database cleanup configuration.
pub struct CleanupConfig;

impl CleanupConfig {
    pub const LOG_PREFIX: &'static str = "db-cleanup.";
    pub const LOG_SUFFIX: &'static str = ".console.txt";
    pub const LOG_TIMESTAMP_FORMAT: &'static str = "%Y_%m_%d_%H_%M_%S_%3f";
    pub const DONE_MARKER: &'static str = "Done.";
    pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(1);
    pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;
}

/// Disk usage monitoring configuration.
pub struct DiskConfig;

impl DiskConfig {
    pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(300);
}

/// Per-deployment settings of the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Root directory scanned for model database files.
    pub model_dir: PathBuf,
    /// Directory for cleanup logs, defaults to the model directory.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// printf-style format of floating point values in CSV output.
    #[serde(default = "default_double_format")]
    pub double_format: String,
    /// External database cleanup command.
    #[serde(default)]
    pub cleanup_command: Option<PathBuf>,
    /// Disk usage limit of the model directory in bytes, 0 is unlimited.
    #[serde(default)]
    pub disk_limit_bytes: u64,
    #[serde(default = "default_scan_interval_secs")]
    pub disk_scan_interval_secs: u64,
}

fn default_double_format() -> String {
    ReadConfig::DEFAULT_DOUBLE_FORMAT.to_string()
}

fn default_scan_interval_secs() -> u64 {
    DiskConfig::DEFAULT_SCAN_INTERVAL.as_secs()
}

impl ServiceConfig {
    /// Create a configuration with defaults for everything but the model directory.
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            log_dir: None,
            double_format: default_double_format(),
            cleanup_command: None,
            disk_limit_bytes: 0,
            disk_scan_interval_secs: default_scan_interval_secs(),
        }
    }

    /// Load the configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|e| SimcatError::io_with_path(e, path))?;
        let config: ServiceConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Directory where cleanup logs are written.
    pub fn model_log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.model_dir.clone())
    }

    pub fn disk_scan_interval(&self) -> Duration {
        Duration::from_secs(self.disk_scan_interval_secs.max(1))
    }

    /// Check the settings the service cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.model_dir.as_os_str().is_empty() {
            return Err(SimcatError::Config {
                message: "no model directory configured".to_string(),
            });
        }
        if !self.model_dir.is_dir() {
            return Err(SimcatError::Config {
                message: format!(
                    "model directory does not exist: {}",
                    self.model_dir.display()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_applies_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("simcat.json");
        std::fs::write(&path, r#"{ "modelDir": "/srv/models" }"#).unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.double_format, "%.15g");
        assert_eq!(config.model_log_dir(), PathBuf::from("/srv/models"));
        assert!(config.cleanup_command.is_none());
    }

    #[test]
    fn test_validate_requires_model_dir() {
        let config = ServiceConfig::new("");
        assert!(matches!(
            config.validate(),
            Err(SimcatError::Config { .. })
        ));

        let temp_dir = TempDir::new().unwrap();
        assert!(ServiceConfig::new(temp_dir.path()).validate().is_ok());
    }
}
