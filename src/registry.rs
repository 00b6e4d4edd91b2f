//! The authoritative `env_name -> EnvironmentInfo` mapping.
//!
//! The Registry is the only place an [`EnvironmentInfo`] is stored
//! long-term; every other component receives value copies. Persistence
//! follows the write-temp-then-rename protocol used throughout this crate.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::EnvironmentInfo;

/// The on-disk document backing a [`Registry`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct RegistryDocument {
    environments: BTreeMap<String, EnvironmentInfo>,
    active_env: Option<String>,
    default_python: Option<String>,
    settings: BTreeMap<String, String>,
}

/// The environment registry: an in-memory mirror of the on-disk document,
/// rewritten atomically on every mutation.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    document: RegistryDocument,
}

impl Registry {
    /// Load the registry from `path`, starting from an empty state (and
    /// backing up the bad file) if it is missing or malformed.
    pub fn load(path: &Path) -> Self {
        let document = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(document) => document,
                Err(error) => {
                    log::warn!(
                        "registry file at {path:?} could not be parsed ({error}); backing it up and starting empty"
                    );
                    let _ = fs::copy(path, path.with_extension("json.bak"));
                    RegistryDocument::default()
                }
            },
            Err(_) => RegistryDocument::default(),
        };

        Self {
            path: path.to_path_buf(),
            document,
        }
    }

    /// Register a brand-new environment.
    pub fn add(&mut self, env: EnvironmentInfo) -> Result<(), RegistryError> {
        if self.document.environments.contains_key(&env.name) {
            return Err(RegistryError::AlreadyExists(env.name));
        }
        self.document.environments.insert(env.name.clone(), env);
        self.persist()
    }

    /// Overwrite an existing entry in place.
    pub fn update(&mut self, env: EnvironmentInfo) -> Result<(), RegistryError> {
        if !self.document.environments.contains_key(&env.name) {
            return Err(RegistryError::NotFound(env.name));
        }
        self.document.environments.insert(env.name.clone(), env);
        self.persist()
    }

    /// Remove an entry, clearing `active_env` if it pointed to it.
    pub fn remove(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.document.environments.remove(name).is_none() {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        if self.document.active_env.as_deref() == Some(name) {
            self.document.active_env = None;
        }
        self.persist()
    }

    /// Mark `name` as the sole active entry, clearing the flag on every
    /// other entry.
    pub fn set_active(&mut self, name: &str) -> Result<(), RegistryError> {
        if !self.document.environments.contains_key(name) {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        for (entry_name, entry) in &mut self.document.environments {
            entry.is_active = entry_name == name;
        }
        self.document.active_env = Some(name.to_string());
        self.persist()
    }

    /// Clear the active pointer and every entry's `is_active` flag.
    pub fn clear_active(&mut self) -> Result<(), RegistryError> {
        for entry in self.document.environments.values_mut() {
            entry.is_active = false;
        }
        self.document.active_env = None;
        self.persist()
    }

    /// Fetch a value copy of one entry.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<EnvironmentInfo> {
        self.document.environments.get(name).cloned()
    }

    /// Fetch value copies of every entry, ordered by name.
    #[must_use]
    pub fn list(&self) -> Vec<EnvironmentInfo> {
        self.document.environments.values().cloned().collect()
    }

    /// The name of the currently active entry, if any.
    #[must_use]
    pub fn active_name(&self) -> Option<&str> {
        self.document.active_env.as_deref()
    }

    fn persist(&self) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|io_error| {
                RegistryError::Io(crate::error::PathIoError {
                    path: parent.to_path_buf(),
                    io_error,
                })
            })?;
        }

        let serialized = serde_json::to_string_pretty(&self.document).map_err(|error| {
            log::error!("failed to serialize registry document: {error}");
            RegistryError::Corrupted(self.path.clone())
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, serialized).map_err(|io_error| {
            RegistryError::Io(crate::error::PathIoError {
                path: temp_path.clone(),
                io_error,
            })
        })?;
        fs::rename(&temp_path, &self.path).map_err(|io_error| {
            RegistryError::Io(crate::error::PathIoError {
                path: self.path.clone(),
                io_error,
            })
        })
    }
}

/// Errors raised by [`Registry`] mutations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no environment named {0:?} is registered")]
    NotFound(String),
    #[error("an environment named {0:?} is already registered")]
    AlreadyExists(String),
    #[error("registry file at {0:?} is corrupted")]
    Corrupted(PathBuf),
    #[error(transparent)]
    Io(#[from] crate::error::PathIoError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackendPreference, Health, SourceFileType};
    use time::OffsetDateTime;

    fn sample(name: &str) -> EnvironmentInfo {
        let now = OffsetDateTime::UNIX_EPOCH;
        EnvironmentInfo {
            name: name.to_string(),
            path: PathBuf::from(format!("/envs/{name}")),
            python_version: "3.11".to_string(),
            backend_type: BackendPreference::Pip,
            source_file_type: SourceFileType::RequirementsTxt,
            pyproject_info: None,
            packages: Vec::new(),
            dependency_groups: BTreeMap::new(),
            lock_file_path: None,
            health: Health::Unknown,
            is_active: false,
            created_at: now,
            updated_at: now,
            last_used: now,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn add_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(&dir.path().join("registry.json"));

        registry.add(sample("demo")).unwrap();

        assert_eq!(registry.get("demo").unwrap().name, "demo");
    }

    #[test]
    fn add_duplicate_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(&dir.path().join("registry.json"));
        registry.add(sample("demo")).unwrap();

        let result = registry.add(sample("demo"));

        assert!(matches!(result, Err(RegistryError::AlreadyExists(_))));
    }

    #[test]
    fn set_active_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(&dir.path().join("registry.json"));
        registry.add(sample("a")).unwrap();
        registry.add(sample("b")).unwrap();

        registry.set_active("a").unwrap();
        registry.set_active("b").unwrap();

        assert!(!registry.get("a").unwrap().is_active);
        assert!(registry.get("b").unwrap().is_active);
        assert_eq!(registry.active_name(), Some("b"));
    }

    #[test]
    fn remove_clears_active_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(&dir.path().join("registry.json"));
        registry.add(sample("demo")).unwrap();
        registry.set_active("demo").unwrap();

        registry.remove("demo").unwrap();

        assert_eq!(registry.active_name(), None);
        assert!(registry.get("demo").is_none());
    }

    #[test]
    fn persisted_state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        {
            let mut registry = Registry::load(&path);
            registry.add(sample("demo")).unwrap();
            registry.set_active("demo").unwrap();
        }

        let reloaded = Registry::load(&path);

        assert_eq!(reloaded.active_name(), Some("demo"));
        assert!(reloaded.get("demo").unwrap().is_active);
    }

    #[test]
    fn corrupted_file_backs_up_and_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "{ not json").unwrap();

        let registry = Registry::load(&path);

        assert!(registry.list().is_empty());
        assert!(path.with_extension("json.bak").exists());
    }
}
