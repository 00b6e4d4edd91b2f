//! Process-wide configuration, loaded once from `config.json` and shared
//! by reference with the subsystems that need it.
//!
//! Persistence follows the same write-temp-then-rename protocol as the
//! [`crate::registry::Registry`] and the cache index: never edited in
//! place, and a corrupt file produces safe defaults rather than a hard
//! failure.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::BackendPreference;

/// Process-wide configuration (see `SPEC_FULL.md` §3 Config).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_python_version: String,
    pub preferred_backend: BackendPreference,
    pub environments_path: PathBuf,
    pub cache: CachePolicy,
    pub offline_mode: bool,
    pub max_parallel_jobs: u8,
}

/// Cache-related knobs under `Config`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub max_size_mb: u64,
    pub cleanup_interval_days: u32,
    pub compression: bool,
    pub enabled: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_size_mb: 5000,
            cleanup_interval_days: 90,
            compression: true,
            enabled: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_python_version: "3.11".to_string(),
            preferred_backend: BackendPreference::Auto,
            environments_path: default_environments_path(),
            cache: CachePolicy::default(),
            offline_mode: false,
            max_parallel_jobs: 4,
        }
    }
}

fn default_environments_path() -> PathBuf {
    crate::platform_adapter::app_data_dir().join("environments")
}

impl Config {
    /// Load the configuration from `path`, falling back to defaults (and
    /// backing up the unreadable file) if it is missing or malformed.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(error) => {
                    log::warn!(
                        "config file at {path:?} could not be parsed ({error}); backing it up and using defaults"
                    );
                    let _ = fs::copy(path, path.with_extension("json.bak"));
                    Self::default()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(error) => {
                log::warn!("config file at {path:?} could not be read ({error}); using defaults");
                Self::default()
            }
        }
    }

    /// Persist the configuration to `path` via write-temp-then-rename.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|io_error| ConfigError::Io {
                path: parent.to_path_buf(),
                io_error,
            })?;
        }

        let serialized = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, serialized).map_err(|io_error| ConfigError::Io {
            path: temp_path.clone(),
            io_error,
        })?;
        fs::rename(&temp_path, path).map_err(|io_error| ConfigError::Io {
            path: path.to_path_buf(),
            io_error,
        })
    }
}

/// Errors that can occur when persisting a [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to serialize configuration: {0}")]
    Serialize(serde_json::Error),
    #[error("I/O error writing configuration at {path:?}: {io_error}")]
    Io {
        path: PathBuf,
        io_error: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.max_parallel_jobs = 8;
        config.offline_mode = true;
        config.preferred_backend = BackendPreference::Uv;
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path), config);
    }

    #[test]
    fn load_corrupted_file_backs_up_and_returns_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not valid json").unwrap();

        let config = Config::load(&path);

        assert_eq!(config, Config::default());
        assert!(path.with_extension("json.bak").exists());
    }
}
