//! Configuration loading.
//!
//! Resolution order for the database location:
//! 1. `LIBMAN_DB_PATH` environment variable
//! 2. `database_path` in the TOML config file
//! 3. `<data dir>/libman/library.db`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const ENV_DB_PATH: &str = "LIBMAN_DB_PATH";
pub const ENV_CONFIG: &str = "LIBMAN_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub worker: WorkerConfig,
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Idle wait between queue polls
    pub poll_interval_ms: u64,
    /// Upper bound on how long `stop()` waits for the loop to exit
    pub stop_timeout_ms: u64,
    /// Fail jobs left `running` by a previous process when the worker starts
    pub fail_interrupted_jobs: bool,
    /// Store a SHA-256 of each analysed file
    pub compute_file_hash: bool,
    /// Path to Chromaprint's `fpcalc`; fingerprinting is off when unset
    pub fpcalc_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScannerConfig {
    pub recursive: bool,
    /// Skip files that already have a pending/running job or a track
    pub skip_already_queued: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            worker: WorkerConfig::default(),
            scanner: ScannerConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            stop_timeout_ms: 5000,
            fail_interrupted_jobs: true,
            compute_file_hash: false,
            fpcalc_path: None,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            skip_already_queued: false,
        }
    }
}

/// Platform data directory location of the library database
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("libman")
        .join("library.db")
}

/// Default config file location, `<config dir>/libman/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("libman").join("config.toml"))
}

impl Config {
    /// Load from `path` if it exists, otherwise defaults. Environment
    /// overrides are applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            debug!(path = %db_path, "Database path overridden from environment");
            self.database_path = PathBuf::from(db_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.database_path.ends_with("libman/library.db"));
        assert_eq!(config.worker.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.worker.stop_timeout(), Duration::from_secs(5));
        assert!(config.worker.fail_interrupted_jobs);
        assert!(!config.worker.compute_file_hash);
        assert!(config.worker.fpcalc_path.is_none());
        assert!(config.scanner.recursive);
        assert!(!config.scanner.skip_already_queued);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            database_path = "/srv/music/library.db"

            [worker]
            poll_interval_ms = 250
            fpcalc_path = "/usr/bin/fpcalc"

            [scanner]
            skip_already_queued = true
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/srv/music/library.db"));
        assert_eq!(config.worker.poll_interval_ms, 250);
        assert_eq!(config.worker.stop_timeout_ms, 5000);
        assert_eq!(config.worker.fpcalc_path, Some(PathBuf::from("/usr/bin/fpcalc")));
        assert!(config.scanner.recursive);
        assert!(config.scanner.skip_already_queued);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let mut config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        config.database_path = default_database_path();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_invalid_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "worker = [not valid").unwrap();

        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_override() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == ENV_DB_PATH).then(|| "/tmp/override.db".to_string()));
        assert_eq!(config.database_path, PathBuf::from("/tmp/override.db"));

        let mut untouched = Config::default();
        untouched.apply_overrides(|_| Some(String::new()));
        assert_eq!(untouched.database_path, default_database_path());
    }
}
