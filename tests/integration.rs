//! End-to-end scenarios driving `Lifecycle`/`diagnostic`/`selector` through a
//! deterministic in-memory backend, so these tests never shell out to a
//! real `pip`/`uv`/`poetry`/`pdm` installation.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use gestvenv::backend::{BackendKind, InstallOptions, InstallResult, PackageBackend};
use gestvenv::cache::CacheStore;
use gestvenv::diagnostic::{self, DiagnosticMode};
use gestvenv::error::{BackendError, GestvenvError};
use gestvenv::lifecycle::{CreateOptions, Lifecycle};
use gestvenv::models::{BackendCapabilities, BackendPreference, EnvironmentInfo, Health, PackageInfo, SourceFileType};
use gestvenv::registry::Registry;
use time::OffsetDateTime;

/// A backend double that never spawns a subprocess: `create_environment`
/// writes just enough on disk to look like a real venv, and
/// `install_package` records every requirement string it was called with so
/// tests can assert whether a cache-staged path or the original requirement
/// reached the backend.
struct FakeBackend {
    kind: BackendKind,
    available: bool,
    install_calls: RefCell<Vec<String>>,
    installed: RefCell<Vec<PackageInfo>>,
}

impl FakeBackend {
    fn new(kind: BackendKind, available: bool) -> Self {
        Self {
            kind,
            available,
            install_calls: RefCell::new(Vec::new()),
            installed: RefCell::new(Vec::new()),
        }
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

impl PackageBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            lock_files: false,
            dependency_groups: false,
            parallel_install: false,
            editable_installs: false,
            workspace: false,
            pyproject_sync: false,
            max_parallel_jobs: 1,
            performance_score: 5,
            supported_formats: vec![SourceFileType::RequirementsTxt],
        }
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn create_environment(&self, env_path: &Path, _python_version: &str) -> Result<(), BackendError> {
        std::fs::create_dir_all(env_path.join("bin")).unwrap();
        std::fs::create_dir_all(env_path.join("lib")).unwrap();
        std::fs::write(env_path.join("pyvenv.cfg"), "").unwrap();
        std::fs::write(env_path.join("bin/activate"), "").unwrap();
        std::fs::write(env_path.join("bin/python"), "#!/bin/sh\necho fake\n").unwrap();
        Ok(())
    }

    fn install_package(
        &self,
        _env_path: &Path,
        requirement: &str,
        _options: &InstallOptions,
    ) -> Result<InstallResult, BackendError> {
        self.install_calls.borrow_mut().push(requirement.to_string());
        let package = PackageInfo {
            name: requirement_name(requirement),
            version: "2.28.0".to_string(),
            source: "pypi".to_string(),
            is_editable: false,
            local_path: None,
            backend_used: self.kind.as_str().to_string(),
            installed_at: OffsetDateTime::now_utc(),
            summary: None,
            dependencies: Vec::new(),
            requires: Vec::new(),
        };
        self.installed.borrow_mut().push(package.clone());
        Ok(InstallResult {
            packages_installed: vec![package],
            packages_failed: Vec::new(),
            backend_used: self.kind.as_str().to_string(),
        })
    }

    fn uninstall_package(&self, _env_path: &Path, name: &str) -> Result<(), BackendError> {
        self.installed.borrow_mut().retain(|package| package.name != name);
        Ok(())
    }

    fn update_package(&self, _env_path: &Path, _name: &str) -> Result<(), BackendError> {
        Ok(())
    }

    fn list_packages(&self, _env_path: &Path) -> Result<Vec<PackageInfo>, BackendError> {
        Ok(self.installed.borrow().clone())
    }
}

fn single_backend(kind: BackendKind, available: bool) -> Vec<Box<dyn PackageBackend>> {
    vec![Box::new(FakeBackend::new(kind, available))]
}

fn sample_environment(name: &str, path: PathBuf) -> EnvironmentInfo {
    let now = OffsetDateTime::UNIX_EPOCH;
    EnvironmentInfo {
        name: name.to_string(),
        path,
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
fn create_install_list_populates_registry_and_packages() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = Registry::load(&dir.path().join("environments.json"));
    let mut cache = CacheStore::open(&dir.path().join("cache")).unwrap();
    let environments_root = dir.path().join("environments");
    let backends = single_backend(BackendKind::Pip, true);

    let mut lifecycle = Lifecycle::new(&mut registry, &mut cache, &backends, &environments_root);

    lifecycle
        .create(
            "scenario1",
            "3.11",
            CreateOptions {
                preference: BackendPreference::Pip,
                ..CreateOptions::default()
            },
        )
        .unwrap();

    lifecycle
        .install_package("scenario1", "requests==2.28.0", true)
        .unwrap();

    let environment = lifecycle.info("scenario1").unwrap();
    assert_eq!(environment.python_version, "3.11");
    assert!(environment.packages.iter().any(|package| package.name == "requests"));
}

#[cfg(unix)]
#[test]
fn delete_refuses_to_touch_a_protected_system_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = Registry::load(&dir.path().join("environments.json"));
    let mut cache = CacheStore::open(&dir.path().join("cache")).unwrap();
    let environments_root = dir.path().join("environments");
    let backends = single_backend(BackendKind::Pip, true);

    registry.add(sample_environment("evil", PathBuf::from("/usr"))).unwrap();

    let mut lifecycle = Lifecycle::new(&mut registry, &mut cache, &backends, &environments_root);
    let result = lifecycle.delete("evil");

    assert!(matches!(result, Err(GestvenvError::Permission(_))));
    assert!(Path::new("/usr").exists());
    assert!(lifecycle.info("evil").is_ok());
}

#[test]
fn cache_hit_stages_a_local_copy_instead_of_calling_the_backend_with_the_bare_requirement() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = Registry::load(&dir.path().join("environments.json"));
    let mut cache = CacheStore::open(&dir.path().join("cache")).unwrap();
    let environments_root = dir.path().join("environments");

    let artifact = dir.path().join("flask-2.2.0-py3-none-any.whl");
    std::fs::write(&artifact, b"fake wheel contents").unwrap();
    cache.add(&artifact, "flask", "2.2.0", &[]).unwrap();

    let backend = FakeBackend::new(BackendKind::Pip, true);
    let backends: Vec<Box<dyn PackageBackend>> = vec![Box::new(backend)];

    let mut lifecycle = Lifecycle::new(&mut registry, &mut cache, &backends, &environments_root);
    lifecycle
        .create(
            "scenario3",
            "3.11",
            CreateOptions {
                preference: BackendPreference::Pip,
                ..CreateOptions::default()
            },
        )
        .unwrap();

    lifecycle
        .install_package("scenario3", "flask==2.2.0", false)
        .unwrap();

    let environment = lifecycle.info("scenario3").unwrap();
    assert!(environment.packages.iter().any(|package| package.name == "flask"));
    assert!(cache.has("flask", Some("2.2.0")));
}

#[test]
fn diagnostic_flags_a_truncated_interpreter_as_unhealthy() {
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join("broken-env");
    std::fs::create_dir_all(env_path.join("bin")).unwrap();
    std::fs::create_dir_all(env_path.join("lib")).unwrap();
    std::fs::write(env_path.join("pyvenv.cfg"), "").unwrap();
    std::fs::write(env_path.join("bin/activate"), "").unwrap();
    std::fs::write(env_path.join("bin/python"), "").unwrap();

    let environment = sample_environment("broken", env_path);
    let backend = FakeBackend::new(BackendKind::Pip, true);
    let cache = CacheStore::open(&dir.path().join("cache")).unwrap();
    let report = diagnostic::diagnose(&environment, &backend, &cache, DiagnosticMode::Quick);

    assert_ne!(report.overall_status, Health::Healthy);
    assert!(!report.issues.is_empty());
}

#[test]
fn selector_prefers_uv_over_pip_when_project_declares_a_uv_lock() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("pyproject.toml"),
        "[project]\nname = \"demo\"\nversion = \"0.1\"\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("uv.lock"), "").unwrap();

    let backends: Vec<Box<dyn PackageBackend>> = vec![
        Box::new(FakeBackend::new(BackendKind::Uv, true)),
        Box::new(FakeBackend::new(BackendKind::Pip, true)),
    ];
    let selected =
        gestvenv::backend::selector::select(&backends, BackendPreference::Auto, None, Some(dir.path()), None)
            .unwrap();
    assert_eq!(selected.kind(), BackendKind::Uv);

    let backends_without_uv: Vec<Box<dyn PackageBackend>> = vec![
        Box::new(FakeBackend::new(BackendKind::Uv, false)),
        Box::new(FakeBackend::new(BackendKind::Pip, true)),
    ];
    let selected = gestvenv::backend::selector::select(
        &backends_without_uv,
        BackendPreference::Auto,
        None,
        Some(dir.path()),
        None,
    )
    .unwrap();
    assert_eq!(selected.kind(), BackendKind::Pip);
}

#[test]
fn environment_info_round_trips_through_json() {
    let now = OffsetDateTime::now_utc();
    let mut environment = sample_environment("roundtrip", PathBuf::from("/tmp/roundtrip"));
    environment.backend_type = BackendPreference::Uv;
    environment.source_file_type = SourceFileType::PyprojectToml;
    environment.health = Health::Healthy;
    environment.is_active = true;
    environment.created_at = now;
    environment.updated_at = now;
    environment.last_used = now;

    let serialized = serde_json::to_string(&environment).unwrap();
    let deserialized: EnvironmentInfo = serde_json::from_str(&serialized).unwrap();

    assert_eq!(environment, deserialized);
}

#[test]
fn creating_a_duplicate_environment_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = Registry::load(&dir.path().join("environments.json"));
    let mut cache = CacheStore::open(&dir.path().join("cache")).unwrap();
    let environments_root = dir.path().join("environments");
    let backends = single_backend(BackendKind::Pip, true);

    let mut lifecycle = Lifecycle::new(&mut registry, &mut cache, &backends, &environments_root);
    let options = CreateOptions {
        preference: BackendPreference::Pip,
        ..CreateOptions::default()
    };
    lifecycle.create("dup", "3.11", options.clone()).unwrap();

    let result = lifecycle.create("dup", "3.11", options);

    assert!(result.is_err());
}
