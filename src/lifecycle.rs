//! Environment Lifecycle: the only component allowed to mutate both disk
//! and the Registry in one step, and the sole entry point every
//! user-visible operation funnels through.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::backend::{selector, CapabilityRequirements, InstallOptions, PackageBackend};
use crate::cache::CacheStore;
use crate::error::{GestvenvError, NotFoundError, PermissionError, ValidationError};
use crate::models::{
    BackendPreference, EnvironmentInfo, Health, PackageInfo, PyProjectInfo, SourceFileType, RESERVED_NAMES,
};
use crate::platform_adapter;
use crate::pyproject;
use crate::registry::Registry;

/// Directories that must never be deleted, regardless of name matching.
/// Mirrors the curated protected-path list from the Delete contract.
#[cfg(unix)]
const PROTECTED_PATHS: [&str; 7] = ["/", "/usr", "/bin", "/etc", "/var", "/home", "/tmp"];
#[cfg(windows)]
const PROTECTED_PATHS: [&str; 3] = ["C:\\", "C:\\Windows", "C:\\Program Files"];

/// Options accepted by [`Lifecycle::create`].
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    pub custom_path: Option<PathBuf>,
    pub preference: BackendPreference,
    pub pyproject_path: Option<PathBuf>,
    pub initial_packages: Vec<String>,
}

/// The outcome of [`Lifecycle::create`].
#[derive(Clone, Debug)]
pub struct CreateOutcome {
    pub environment: EnvironmentInfo,
    pub failed_packages: Vec<(String, String)>,
}

/// Orchestrates environment creation, destruction, activation, package
/// mutation and sync across the Platform Adapter, Backend Selector, Cache
/// Store and Registry, maintaining the cross-cutting invariants.
pub struct Lifecycle<'a> {
    registry: &'a mut Registry,
    cache: &'a mut CacheStore,
    backends: &'a [Box<dyn PackageBackend>],
    environments_root: &'a Path,
}

impl<'a> Lifecycle<'a> {
    pub fn new(
        registry: &'a mut Registry,
        cache: &'a mut CacheStore,
        backends: &'a [Box<dyn PackageBackend>],
        environments_root: &'a Path,
    ) -> Self {
        Self {
            registry,
            cache,
            backends,
            environments_root,
        }
    }

    /// The Cache Store backing this lifecycle, for callers (the Diagnostic
    /// Engine) that need to read it without mutating anything here.
    pub fn cache(&self) -> &CacheStore {
        self.cache
    }

    /// Validate `name` against the naming rules shared by every operation
    /// that accepts an environment name.
    pub fn validate_name(name: &str) -> Result<(), ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::EmptyName(name.to_string()));
        }
        if name.len() > 100 {
            return Err(ValidationError::NameTooLong(name.to_string()));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(ValidationError::InvalidNameCharacters(name.to_string()));
        }
        if RESERVED_NAMES.contains(&name.to_ascii_lowercase().as_str()) {
            return Err(ValidationError::ReservedName(name.to_string()));
        }
        Ok(())
    }

    /// Validate a `python_version` string, rejecting anything older than
    /// 3.6.
    pub fn validate_python_version(version: &str) -> Result<(), ValidationError> {
        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 || !parts.iter().all(|part| part.chars().all(|c| c.is_ascii_digit()) && !part.is_empty()) {
            return Err(ValidationError::InvalidPythonVersion(version.to_string()));
        }

        let major: u32 = parts[0].parse().unwrap_or(0);
        let minor: u32 = parts[1].parse().unwrap_or(0);
        if major < 3 || (major == 3 && minor < 6) {
            return Err(ValidationError::PythonVersionTooOld(version.to_string()));
        }
        Ok(())
    }

    /// Create a new environment: validate, resolve the target directory,
    /// select a backend, create it on disk, optionally install initial
    /// packages, then register.
    pub fn create(
        &mut self,
        name: &str,
        python_version: &str,
        options: CreateOptions,
    ) -> Result<CreateOutcome, GestvenvError> {
        Self::validate_name(name)?;
        Self::validate_python_version(python_version)?;

        let pyproject_info = options
            .pyproject_path
            .as_ref()
            .map(|path| pyproject::parse(path))
            .transpose()
            .map_err(|error| GestvenvError::Validation(ValidationError::InvalidRequirement(error.to_string())))?;

        let target_path = options
            .custom_path
            .clone()
            .unwrap_or_else(|| self.environments_root.join(name));
        if target_path.exists() {
            return Err(GestvenvError::Validation(ValidationError::PathAlreadyExists(
                target_path,
            )));
        }

        let backend = selector::select(
            self.backends,
            options.preference,
            None,
            options.pyproject_path.as_deref().and_then(Path::parent),
            None,
        )?;

        if let Err(error) = backend.create_environment(&target_path, python_version) {
            let _ = std::fs::remove_dir_all(&target_path);
            return Err(error.into());
        }

        let mut requirements = options.initial_packages.clone();
        if let Some(info) = &pyproject_info {
            requirements.extend(info.dependencies.iter().cloned());
        }

        let mut packages = Vec::new();
        let mut failed_packages = Vec::new();
        for requirement in &requirements {
            match backend.install_package(&target_path, requirement, &InstallOptions::default()) {
                Ok(result) => {
                    packages.extend(result.packages_installed);
                    failed_packages.extend(result.packages_failed);
                }
                Err(error) => failed_packages.push((requirement.clone(), error.to_string())),
            }
        }

        let now = OffsetDateTime::now_utc();
        let health = if failed_packages.is_empty() {
            Health::Healthy
        } else {
            Health::HasWarnings
        };

        let environment = EnvironmentInfo {
            name: name.to_string(),
            path: target_path,
            python_version: python_version.to_string(),
            backend_type: backend_preference_of(backend.kind()),
            source_file_type: pyproject_info
                .as_ref()
                .map_or(SourceFileType::RequirementsTxt, |_| SourceFileType::PyprojectToml),
            pyproject_info,
            packages,
            dependency_groups: BTreeMap::new(),
            lock_file_path: None,
            health,
            is_active: false,
            created_at: now,
            updated_at: now,
            last_used: now,
            metadata: BTreeMap::new(),
        };

        self.registry.add(environment.clone())?;

        Ok(CreateOutcome {
            environment,
            failed_packages,
        })
    }

    /// Resolve the entry, verify the interpreter exists, and return the
    /// activation snippet the caller must run, marking it active in the
    /// Registry. Advisory only: this process does not touch the parent
    /// shell.
    pub fn activate(&mut self, name: &str) -> Result<String, GestvenvError> {
        let environment = self
            .registry
            .get(name)
            .ok_or_else(|| NotFoundError::Environment(name.to_string()))?;

        platform_adapter::interpreter_path(&environment.path)?;
        let command = platform_adapter::activation_command(&environment.path);

        self.registry.set_active(name)?;
        Ok(command)
    }

    /// Clear the active pointer.
    pub fn deactivate(&mut self) -> Result<(), GestvenvError> {
        self.registry.clear_active()?;
        Ok(())
    }

    /// Remove an environment's directory and unregister it, refusing to
    /// touch anything that is not a recognized, non-system environment
    /// directory.
    pub fn delete(&mut self, name: &str) -> Result<(), GestvenvError> {
        let environment = self
            .registry
            .get(name)
            .ok_or_else(|| NotFoundError::Environment(name.to_string()))?;

        guard_deletable_path(&environment.path)?;

        std::fs::remove_dir_all(&environment.path).map_err(|io_error| {
            GestvenvError::Permission(PermissionError::Insufficient {
                path: environment.path.clone(),
                detail: io_error.to_string(),
            })
        })?;

        self.registry.remove(name)?;
        Ok(())
    }

    /// Install one requirement, preferring a Cache Store hit when online
    /// install is not forced.
    pub fn install_package(
        &mut self,
        name: &str,
        requirement: &str,
        force_online: bool,
    ) -> Result<PackageInfo, GestvenvError> {
        let mut environment = self
            .registry
            .get(name)
            .ok_or_else(|| NotFoundError::Environment(name.to_string()))?;

        let backend = selector::select(self.backends, environment.backend_type, Some(&environment), None, None)?;
        let package_name = requirement_name(requirement);

        let cache_hit = (!force_online)
            .then(|| self.cache.get(&package_name, None))
            .flatten();

        let install_result = if let Some(cached_path) = cache_hit {
            let staging_dir = tempfile::tempdir().map_err(|io_error| {
                GestvenvError::Permission(PermissionError::Insufficient {
                    path: cached_path.clone(),
                    detail: io_error.to_string(),
                })
            })?;
            let staged_path = staging_dir.path().join(
                cached_path
                    .file_name()
                    .ok_or_else(|| NotFoundError::Environment(package_name.clone()))?,
            );
            std::fs::copy(&cached_path, &staged_path).map_err(|io_error| {
                GestvenvError::Permission(PermissionError::Insufficient {
                    path: staged_path.clone(),
                    detail: io_error.to_string(),
                })
            })?;
            backend.install_package(&environment.path, &staged_path.to_string_lossy(), &InstallOptions::default())?
        } else {
            // A backend-downloaded artifact isn't exposed as a standalone file by
            // `PackageBackend::install_package` (it lands straight in site-packages), so there is
            // nothing to opportunistically add to the cache here.
            backend.install_package(&environment.path, requirement, &InstallOptions::default())?
        };

        let installed = install_result
            .packages_installed
            .into_iter()
            .next()
            .ok_or_else(|| NotFoundError::Environment(name.to_string()))?;

        environment.upsert_package(installed.clone());
        environment.updated_at = OffsetDateTime::now_utc();
        self.registry.update(environment)?;

        Ok(installed)
    }

    /// Remove a package from an environment and from the registered
    /// record.
    pub fn remove_package(&mut self, name: &str, package_name: &str) -> Result<(), GestvenvError> {
        let mut environment = self
            .registry
            .get(name)
            .ok_or_else(|| NotFoundError::Environment(name.to_string()))?;

        let backend = selector::select(self.backends, environment.backend_type, Some(&environment), None, None)?;
        backend.uninstall_package(&environment.path, package_name)?;

        environment.packages.retain(|package| package.name != package_name);
        environment.updated_at = OffsetDateTime::now_utc();
        self.registry.update(environment)?;
        Ok(())
    }

    /// Update one installed package.
    pub fn update_package(&mut self, name: &str, package_name: &str) -> Result<(), GestvenvError> {
        let mut environment = self
            .registry
            .get(name)
            .ok_or_else(|| NotFoundError::Environment(name.to_string()))?;

        let backend = selector::select(self.backends, environment.backend_type, Some(&environment), None, None)?;
        backend.update_package(&environment.path, package_name)?;

        let refreshed = backend.list_packages(&environment.path)?;
        environment.packages = refreshed;
        environment.updated_at = OffsetDateTime::now_utc();
        self.registry.update(environment)?;
        Ok(())
    }

    /// Recompute the requirement set from `pyproject_info` across the
    /// requested groups, install what's missing, update what's
    /// out-of-date, and (in strict mode) remove anything installed that
    /// is no longer declared.
    pub fn sync(&mut self, name: &str, groups: &[String], strict: bool) -> Result<(), GestvenvError> {
        let mut environment = self
            .registry
            .get(name)
            .ok_or_else(|| NotFoundError::Environment(name.to_string()))?;

        let pyproject_info = environment
            .pyproject_info
            .clone()
            .ok_or_else(|| NotFoundError::Environment(name.to_string()))?;

        let expected = expected_requirement_names(&pyproject_info, groups);
        let installed: std::collections::HashSet<String> =
            environment.packages.iter().map(|package| package.name.clone()).collect();

        let backend = selector::select(
            self.backends,
            environment.backend_type,
            Some(&environment),
            None,
            Some(CapabilityRequirements {
                pyproject_sync: true,
                ..CapabilityRequirements::default()
            }),
        )?;

        for requirement in pyproject_info.dependencies.iter().chain(
            groups
                .iter()
                .filter_map(|group| pyproject_info.optional_dependencies.get(group))
                .flatten(),
        ) {
            let package_name = requirement_name(requirement);
            if !installed.contains(&package_name) {
                if let Ok(result) = backend.install_package(&environment.path, requirement, &InstallOptions::default()) {
                    for package in result.packages_installed {
                        environment.upsert_package(package);
                    }
                }
            }
        }

        if strict {
            let extras: Vec<String> = installed.difference(&expected).cloned().collect();
            for extra in extras {
                let _ = backend.uninstall_package(&environment.path, &extra);
                environment.packages.retain(|package| package.name != extra);
            }
        }

        environment.updated_at = OffsetDateTime::now_utc();
        self.registry.update(environment)?;
        Ok(())
    }

    /// Return every registered environment.
    #[must_use]
    pub fn list(&self) -> Vec<EnvironmentInfo> {
        self.registry.list()
    }

    /// Return one registered environment's record.
    pub fn info(&self, name: &str) -> Result<EnvironmentInfo, GestvenvError> {
        self.registry
            .get(name)
            .ok_or_else(|| GestvenvError::from(NotFoundError::Environment(name.to_string())))
    }
}

fn backend_preference_of(kind: crate::backend::BackendKind) -> BackendPreference {
    match kind {
        crate::backend::BackendKind::Pip => BackendPreference::Pip,
        crate::backend::BackendKind::Uv => BackendPreference::Uv,
        crate::backend::BackendKind::Poetry => BackendPreference::Poetry,
        crate::backend::BackendKind::Pdm => BackendPreference::Pdm,
    }
}

fn requirement_name(requirement: &str) -> String {
    requirement
        .split(|c: char| "=<>!~[; ".contains(c))
        .next()
        .unwrap_or(requirement)
        .trim()
        .to_string()
}

fn expected_requirement_names(info: &PyProjectInfo, groups: &[String]) -> std::collections::HashSet<String> {
    let mut names: std::collections::HashSet<String> =
        info.dependencies.iter().map(|dep| requirement_name(dep)).collect();
    for group in groups {
        if let Some(deps) = info.optional_dependencies.get(group) {
            names.extend(deps.iter().map(|dep| requirement_name(dep)));
        }
    }
    names
}

/// Refuse to delete anything that isn't a recognized environment
/// directory, or that is (or is outside a `gestvenv`/`environments`
/// ancestor and) a curated system path.
fn guard_deletable_path(path: &Path) -> Result<(), PermissionError> {
    let is_recognized_environment = platform_adapter::interpreter_path(path).is_ok()
        || path.join("pyvenv.cfg").exists()
        || path.join("bin").exists()
        || path.join("Scripts").exists();

    if !is_recognized_environment {
        return Err(PermissionError::NotAnEnvironment(path.to_path_buf()));
    }

    let has_managed_ancestor = path
        .components()
        .any(|component| matches!(component.as_os_str().to_str(), Some("gestvenv" | "environments")));

    for protected in PROTECTED_PATHS {
        let protected_path = Path::new(protected);
        let is_protected = path == protected_path || (path.starts_with(protected_path) && !has_managed_ancestor);
        if is_protected {
            return Err(PermissionError::ProtectedPath(path.to_path_buf()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_rejects_empty() {
        assert!(matches!(
            Lifecycle::validate_name(""),
            Err(ValidationError::EmptyName(_))
        ));
    }

    #[test]
    fn validate_name_rejects_reserved_words() {
        assert!(matches!(
            Lifecycle::validate_name("CON"),
            Err(ValidationError::ReservedName(_))
        ));
    }

    #[test]
    fn validate_name_rejects_bad_characters() {
        assert!(matches!(
            Lifecycle::validate_name("my env!"),
            Err(ValidationError::InvalidNameCharacters(_))
        ));
    }

    #[test]
    fn validate_name_accepts_well_formed_names() {
        assert!(Lifecycle::validate_name("my-project_v2.1").is_ok());
    }

    #[test]
    fn validate_python_version_rejects_too_old() {
        assert!(matches!(
            Lifecycle::validate_python_version("2.7"),
            Err(ValidationError::PythonVersionTooOld(_))
        ));
        assert!(matches!(
            Lifecycle::validate_python_version("3.5"),
            Err(ValidationError::PythonVersionTooOld(_))
        ));
    }

    #[test]
    fn validate_python_version_accepts_modern_versions() {
        assert!(Lifecycle::validate_python_version("3.11").is_ok());
        assert!(Lifecycle::validate_python_version("3.11.4").is_ok());
    }

    #[test]
    fn guard_refuses_non_environment_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = guard_deletable_path(dir.path());
        assert!(matches!(result, Err(PermissionError::NotAnEnvironment(_))));
    }

    #[cfg(unix)]
    #[test]
    fn guard_refuses_protected_system_paths() {
        let result = guard_deletable_path(Path::new("/usr"));
        assert!(result.is_err());
    }
}
