//! `EnvironmentManager`: the public façade wiring Config, Registry, Cache
//! Store, backends, Lifecycle and Diagnostic together. Every CLI command
//! maps onto exactly one method here.

use std::path::{Path, PathBuf};

use crate::backend::pdm::Pdm;
use crate::backend::pip::Pip;
use crate::backend::poetry::Poetry;
use crate::backend::uv::Uv;
use crate::backend::{selector, CapabilityRequirements, PackageBackend};
use crate::cache::CacheStore;
use crate::config::Config;
use crate::diagnostic::{self, DiagnosticMode, DiagnosticReport, RepairOutcome};
use crate::error::{GestvenvError, NotFoundError};
use crate::lifecycle::{CreateOptions, CreateOutcome, Lifecycle};
use crate::models::{EnvironmentInfo, PackageInfo};
use crate::registry::Registry;

/// The public entry point: owns every subsystem and never exposes its
/// fields, so the CLI (and tests) only ever talk to this type.
pub struct EnvironmentManager {
    config_path: PathBuf,
    config: Config,
    registry: Registry,
    cache: CacheStore,
    backends: Vec<Box<dyn PackageBackend>>,
}

impl EnvironmentManager {
    /// Load (or initialize) every subsystem from `app_dir`, the
    /// platform-conventional application directory.
    pub fn open(app_dir: &Path) -> Result<Self, GestvenvError> {
        let config_path = app_dir.join("config.json");
        let config = Config::load(&config_path);
        let registry = Registry::load(&app_dir.join("environments.json"));
        let cache = CacheStore::open(&app_dir.join("cache"))?;

        let backends: Vec<Box<dyn PackageBackend>> = vec![
            Box::new(Uv::new()),
            Box::new(Poetry::new()),
            Box::new(Pdm::new()),
            Box::new(Pip::new()),
        ];

        Ok(Self {
            config_path,
            config,
            registry,
            cache,
            backends,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace and persist the configuration.
    pub fn set_config(&mut self, config: Config) -> Result<(), GestvenvError> {
        config.save(&self.config_path)?;
        self.config = config;
        Ok(())
    }

    pub fn create(
        &mut self,
        name: &str,
        python_version: &str,
        options: CreateOptions,
    ) -> Result<CreateOutcome, GestvenvError> {
        let mut lifecycle = self.lifecycle();
        lifecycle.create(name, python_version, options)
    }

    pub fn activate(&mut self, name: &str) -> Result<String, GestvenvError> {
        self.lifecycle().activate(name)
    }

    pub fn deactivate(&mut self) -> Result<(), GestvenvError> {
        self.lifecycle().deactivate()
    }

    pub fn delete(&mut self, name: &str) -> Result<(), GestvenvError> {
        self.lifecycle().delete(name)
    }

    pub fn install_package(
        &mut self,
        name: &str,
        requirement: &str,
        force_online: bool,
    ) -> Result<PackageInfo, GestvenvError> {
        self.lifecycle().install_package(name, requirement, force_online)
    }

    pub fn remove_package(&mut self, name: &str, package_name: &str) -> Result<(), GestvenvError> {
        self.lifecycle().remove_package(name, package_name)
    }

    pub fn update_package(&mut self, name: &str, package_name: &str) -> Result<(), GestvenvError> {
        self.lifecycle().update_package(name, package_name)
    }

    pub fn sync(&mut self, name: &str, groups: &[String], strict: bool) -> Result<(), GestvenvError> {
        self.lifecycle().sync(name, groups, strict)
    }

    #[must_use]
    pub fn list(&self) -> Vec<EnvironmentInfo> {
        self.registry.list()
    }

    pub fn info(&self, name: &str) -> Result<EnvironmentInfo, GestvenvError> {
        self.registry
            .get(name)
            .ok_or_else(|| GestvenvError::from(NotFoundError::Environment(name.to_string())))
    }

    /// Run the Diagnostic & Repair Engine's checks against `name` without
    /// changing anything.
    pub fn diagnose(&self, name: &str, mode: DiagnosticMode) -> Result<DiagnosticReport, GestvenvError> {
        let environment = self
            .registry
            .get(name)
            .ok_or_else(|| GestvenvError::from(NotFoundError::Environment(name.to_string())))?;
        let backend = selector::select(&self.backends, environment.backend_type, Some(&environment), None, None)?;
        Ok(diagnostic::diagnose(&environment, backend, &self.cache, mode))
    }

    /// Diagnose `name` and, if `auto_fix`, apply the recommended repairs
    /// through the Lifecycle, re-diagnosing afterward.
    pub fn repair(&mut self, name: &str, auto_fix: bool) -> Result<RepairOutcome, GestvenvError> {
        let environment = self
            .registry
            .get(name)
            .ok_or_else(|| GestvenvError::from(NotFoundError::Environment(name.to_string())))?;
        let backend = selector::select(&self.backends, environment.backend_type, Some(&environment), None, None)?;

        let mut lifecycle = Lifecycle::new(
            &mut self.registry,
            &mut self.cache,
            &self.backends,
            &self.config.environments_path,
        );
        diagnostic::repair(&mut lifecycle, name, backend, auto_fix)
    }

    /// Evict cached artifacts down to the configured size policy.
    pub fn clean_cache(&mut self) -> (usize, u64) {
        let policy = &self.config.cache;
        self.cache
            .clean(u64::from(policy.cleanup_interval_days), policy.max_size_mb, 1)
    }

    /// How many of `name`'s declared packages the Cache Store currently
    /// holds an artifact for, out of the total declared.
    pub fn cache_coherence(&self, name: &str) -> Result<(usize, usize), GestvenvError> {
        let environment = self
            .registry
            .get(name)
            .ok_or_else(|| GestvenvError::from(NotFoundError::Environment(name.to_string())))?;
        Ok(diagnostic::cache_coherence(&environment, &self.cache))
    }

    /// Which backends are currently available on this machine, in the
    /// fixed priority order.
    #[must_use]
    pub fn available_backends(&self) -> Vec<&'static str> {
        self.backends
            .iter()
            .filter(|backend| backend.is_available())
            .map(|backend| backend.kind().as_str())
            .collect()
    }

    /// Require `pyproject_sync` support when selecting a backend for
    /// `name` — used by the `sync` CLI command to surface a clear error
    /// before attempting anything.
    pub fn backend_for(
        &self,
        name: &str,
        requirements: Option<CapabilityRequirements>,
    ) -> Result<&str, GestvenvError> {
        let environment = self
            .registry
            .get(name)
            .ok_or_else(|| GestvenvError::from(NotFoundError::Environment(name.to_string())))?;
        let backend = selector::select(&self.backends, environment.backend_type, Some(&environment), None, requirements)?;
        Ok(backend.kind().as_str())
    }

    fn lifecycle(&mut self) -> Lifecycle<'_> {
        Lifecycle::new(
            &mut self.registry,
            &mut self.cache,
            &self.backends,
            &self.config.environments_path,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_initializes_empty_manager() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EnvironmentManager::open(dir.path()).unwrap();

        assert!(manager.list().is_empty());
        assert_eq!(manager.config().max_parallel_jobs, 4);
    }

    #[test]
    fn info_on_unknown_environment_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EnvironmentManager::open(dir.path()).unwrap();

        let result = manager.info("does-not-exist");

        assert!(matches!(result, Err(GestvenvError::NotFound(_))));
    }
}
