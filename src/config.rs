use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::storage::{StorageError, StorageResult};

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    Memory,

    /// In-memory storage persisted to a snapshot file
    File {
        /// Path to the snapshot file
        #[serde(default = "default_snapshot_path")]
        path: PathBuf,

        /// Seconds between snapshots, 0 writes the snapshot after every accepted write
        #[serde(default = "default_flush_interval_secs")]
        flush_interval_secs: u64,

        /// Load the snapshot into memory on startup
        #[serde(default = "default_restore")]
        restore: bool,
    },

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Deadline for each database call
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,

        /// Waits between attempts of a failing call
        #[serde(default = "default_retry_delays_ms")]
        retry_delays_ms: Vec<u64>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File {
            path: default_snapshot_path(),
            flush_interval_secs: default_flush_interval_secs(),
            restore: default_restore(),
        }
    }
}

impl StorageConfig {
    /// Reject values no backend could work with
    pub fn validate(&self) -> StorageResult<()> {
        match self {
            StorageConfig::Memory => Ok(()),
            StorageConfig::File { path, .. } => {
                if path.as_os_str().is_empty() {
                    return Err(StorageError::InvalidConfig(
                        "snapshot path is empty".to_string(),
                    ));
                }
                Ok(())
            }
            StorageConfig::Sqlite {
                path,
                timeout_secs,
                retry_delays_ms,
            } => {
                if path.as_os_str().is_empty() {
                    return Err(StorageError::InvalidConfig(
                        "database path is empty".to_string(),
                    ));
                }
                if *timeout_secs == 0 {
                    return Err(StorageError::InvalidConfig(
                        "database timeout must be at least one second".to_string(),
                    ));
                }
                if retry_delays_ms.is_empty() {
                    return Err(StorageError::InvalidConfig(
                        "retry schedule is empty".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Short name of the selected backend, for logs
    pub fn backend_name(&self) -> &'static str {
        match self {
            StorageConfig::Memory => "memory",
            StorageConfig::File { .. } => "file",
            StorageConfig::Sqlite { .. } => "sqlite",
        }
    }

    /// Retry schedule of the sqlite backend as durations
    pub fn retry_delays(&self) -> Option<Vec<Duration>> {
        match self {
            StorageConfig::Sqlite {
                retry_delays_ms, ..
            } => Some(
                retry_delays_ms
                    .iter()
                    .copied()
                    .map(Duration::from_millis)
                    .collect(),
            ),
            _ => None,
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("Metrics.data")
}

fn default_flush_interval_secs() -> u64 {
    300
}

fn default_restore() -> bool {
    true
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./metrics.db")
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![1000, 3000, 5000]
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    pub storage: Option<StorageConfig>,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_file_backend_defaults() {
        let config: StorageConfig = serde_json::from_str(r#"{"backend": "file"}"#).unwrap();
        assert_eq!(config, StorageConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sqlite_backend_overrides() {
        let config: StorageConfig = serde_json::from_str(
            r#"{"backend": "sqlite", "path": "/tmp/m.db", "retry_delays_ms": [10, 20]}"#,
        )
        .unwrap();

        assert_eq!(config.backend_name(), "sqlite");
        assert_eq!(
            config.retry_delays(),
            Some(vec![Duration::from_millis(10), Duration::from_millis(20)])
        );
        assert_matches!(config, StorageConfig::Sqlite { timeout_secs: 5, .. });
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        let config = StorageConfig::File {
            path: PathBuf::new(),
            flush_interval_secs: 0,
            restore: false,
        };
        assert_matches!(config.validate(), Err(StorageError::InvalidConfig(_)));

        let config = StorageConfig::Sqlite {
            path: default_sqlite_path(),
            timeout_secs: 5,
            retry_delays_ms: vec![],
        };
        assert_matches!(config.validate(), Err(StorageError::InvalidConfig(_)));
    }

    #[test]
    fn test_read_config_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"storage": {"backend": "memory"}}"#).unwrap();

        let config = read_config_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.storage, Some(StorageConfig::Memory));

        std::fs::write(&path, r#"{"storage": {"backend": "redis"}}"#).unwrap();
        assert!(read_config_file(path.to_str().unwrap()).is_err());
    }
}
