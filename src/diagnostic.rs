//! Diagnostic & Repair Engine: eleven graded checks producing a
//! severity-tagged report, plus a `repair` routine that maps issues to
//! Lifecycle actions.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::backend::{InstallOptions, PackageBackend};
use crate::cache::CacheStore;
use crate::error::GestvenvError;
use crate::lifecycle::{CreateOptions, Lifecycle};
use crate::models::{EnvironmentInfo, Health, IssueLevel};
use crate::platform_adapter::{self, CommandOutcome};

/// Packages whose absence or import failure is expected/benign and never
/// reported as broken.
const DENYLIST: [&str; 6] = ["pip", "setuptools", "wheel", "pkg-resources", "distribute", "argparse"];

const INTERPRETER_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const IMPORT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether [`diagnose`] should run the (slower) package-integrity check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiagnosticMode {
    Quick,
    Full,
}

/// One issue surfaced by a check.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Issue {
    pub level: IssueLevel,
    pub category: String,
    pub description: String,
    pub solution: Option<String>,
    pub auto_fixable: bool,
    pub repair_action: Option<RepairAction>,
}

/// A suggested command the caller may run, with an estimated impact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Recommendation {
    pub command: String,
    pub impact_score: u8,
    pub safe_to_apply: bool,
}

/// The fixed set of repair actions a check may recommend.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    RecreateEnvironment,
    ReinstallInterpreter,
    InstallInstaller,
    RepairInstaller,
    InstallMissingPackages,
    ReinstallBrokenPackages,
    FixPermissions,
    RepairStructure,
    RepairActivationScript,
}

/// The output of [`diagnose`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub overall_status: Health,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<Recommendation>,
    pub details: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub execution_time: Duration,
}

/// The outcome of [`repair`].
#[derive(Clone, Debug)]
pub struct RepairOutcome {
    pub actions_taken: Vec<RepairAction>,
    pub success: bool,
    pub follow_up_report: DiagnosticReport,
}

/// Run every applicable check against `environment`.
pub fn diagnose(
    environment: &EnvironmentInfo,
    backend: &dyn PackageBackend,
    cache: &CacheStore,
    mode: DiagnosticMode,
) -> DiagnosticReport {
    let started = Instant::now();
    let mut issues = Vec::new();
    let mut details = BTreeMap::new();

    check_physical_existence(environment, &mut issues);
    if environment.path.exists() {
        check_directory_structure(environment, &mut issues);
        check_interpreter(environment, &mut issues);
        check_installer_executable(environment, &mut issues);
        check_activation_script(environment, &mut issues);
        check_permissions(environment, &mut issues);
        if mode == DiagnosticMode::Full {
            check_package_integrity(environment, &mut issues);
        }
        check_configured_vs_installed(environment, backend, &mut issues, &mut details);
        check_updates_available(environment, backend, &mut issues);
        check_disk_space(environment, &mut issues, &mut details);
        check_cache_coherence(environment, cache, &mut issues, &mut details);
    }

    let overall_status = overall_status_from(&issues);
    let recommendations = issues
        .iter()
        .filter_map(|issue| issue.solution.clone().map(|solution| Recommendation {
            command: solution,
            impact_score: severity_weight(issue.level),
            safe_to_apply: issue.auto_fixable,
        }))
        .collect();

    DiagnosticReport {
        overall_status,
        issues,
        recommendations,
        details,
        generated_at: OffsetDateTime::now_utc(),
        execution_time: started.elapsed(),
    }
}

/// Count how many of `environment`'s declared packages the Cache Store
/// currently holds an artifact for.
pub fn cache_coherence(environment: &EnvironmentInfo, cache: &crate::cache::CacheStore) -> (usize, usize) {
    let present = environment
        .packages
        .iter()
        .filter(|package| cache.has(&package.name, Some(&package.version)))
        .count();
    (present, environment.packages.len())
}

fn overall_status_from(issues: &[Issue]) -> Health {
    let max_level = issues.iter().map(|issue| issue.level).max_by_key(|level| severity_weight(*level));
    match max_level {
        Some(IssueLevel::Critical) => Health::Corrupted,
        Some(IssueLevel::Error) => Health::HasErrors,
        Some(IssueLevel::Warning) => Health::HasWarnings,
        _ => Health::Healthy,
    }
}

fn severity_weight(level: IssueLevel) -> u8 {
    match level {
        IssueLevel::Info => 1,
        IssueLevel::Warning => 2,
        IssueLevel::Error => 3,
        IssueLevel::Critical => 4,
    }
}

fn check_physical_existence(environment: &EnvironmentInfo, issues: &mut Vec<Issue>) {
    if !environment.path.exists() {
        issues.push(Issue {
            level: IssueLevel::Critical,
            category: "physical_existence".to_string(),
            description: format!("environment directory {:?} does not exist", environment.path),
            solution: Some("recreate the environment".to_string()),
            auto_fixable: true,
            repair_action: Some(RepairAction::RecreateEnvironment),
        });
    }
}

fn check_directory_structure(environment: &EnvironmentInfo, issues: &mut Vec<Issue>) {
    let bin_dir_ok = environment.path.join("bin").exists() || environment.path.join("Scripts").exists();
    let lib_dir_ok = environment.path.join("lib").exists() || environment.path.join("Lib").exists();
    let config_ok = environment.path.join("pyvenv.cfg").exists();

    if !bin_dir_ok || !lib_dir_ok || !config_ok {
        issues.push(Issue {
            level: IssueLevel::Error,
            category: "directory_structure".to_string(),
            description: format!("{:?} is missing an expected venv subdirectory or config file", environment.path),
            solution: Some("repair the environment's directory structure".to_string()),
            auto_fixable: true,
            repair_action: Some(RepairAction::RepairStructure),
        });
    }
}

fn check_interpreter(environment: &EnvironmentInfo, issues: &mut Vec<Issue>) {
    let Ok(interpreter) = platform_adapter::interpreter_path(&environment.path) else {
        issues.push(Issue {
            level: IssueLevel::Critical,
            category: "interpreter".to_string(),
            description: "interpreter executable is missing".to_string(),
            solution: Some("reinstall the interpreter".to_string()),
            auto_fixable: true,
            repair_action: Some(RepairAction::ReinstallInterpreter),
        });
        return;
    };

    let interpreter_str = interpreter.to_string_lossy().into_owned();
    let responds = matches!(
        platform_adapter::run(&interpreter_str, &["--version"], None, &[], INTERPRETER_PROBE_TIMEOUT),
        Ok(CommandOutcome::Completed(_))
    );
    if !responds {
        issues.push(Issue {
            level: IssueLevel::Critical,
            category: "interpreter".to_string(),
            description: "interpreter did not respond to --version within the timeout".to_string(),
            solution: Some("reinstall the interpreter".to_string()),
            auto_fixable: true,
            repair_action: Some(RepairAction::ReinstallInterpreter),
        });
    }
}

fn check_installer_executable(environment: &EnvironmentInfo, issues: &mut Vec<Issue>) {
    let installer_name = match environment.backend_type.as_str() {
        "uv" => "uv",
        _ => "pip",
    };

    let Ok(installer) = platform_adapter::installer_path(&environment.path, installer_name) else {
        issues.push(Issue {
            level: IssueLevel::Error,
            category: "installer_executable".to_string(),
            description: format!("{installer_name} executable is missing"),
            solution: Some(format!("install {installer_name}")),
            auto_fixable: true,
            repair_action: Some(RepairAction::InstallInstaller),
        });
        return;
    };

    let installer_str = installer.to_string_lossy().into_owned();
    let responds = matches!(
        platform_adapter::run(&installer_str, &["--version"], None, &[], INTERPRETER_PROBE_TIMEOUT),
        Ok(CommandOutcome::Completed(_))
    );
    if !responds {
        issues.push(Issue {
            level: IssueLevel::Warning,
            category: "installer_executable".to_string(),
            description: format!("{installer_name} did not respond to --version"),
            solution: Some(format!("repair {installer_name}")),
            auto_fixable: true,
            repair_action: Some(RepairAction::RepairInstaller),
        });
    }
}

fn check_activation_script(environment: &EnvironmentInfo, issues: &mut Vec<Issue>) {
    let activation_script = if cfg!(windows) {
        environment.path.join("Scripts").join("activate.bat")
    } else {
        environment.path.join("bin").join("activate")
    };

    if !activation_script.exists() {
        issues.push(Issue {
            level: IssueLevel::Warning,
            category: "activation_script".to_string(),
            description: format!("activation script {activation_script:?} is missing"),
            solution: Some("repair the activation script".to_string()),
            auto_fixable: true,
            repair_action: Some(RepairAction::RepairActivationScript),
        });
    }
}

fn check_permissions(environment: &EnvironmentInfo, issues: &mut Vec<Issue>) {
    let Ok(snapshot) = platform_adapter::check_permissions(&environment.path) else {
        return;
    };
    if !snapshot.read || !snapshot.write {
        issues.push(Issue {
            level: IssueLevel::Error,
            category: "permissions".to_string(),
            description: format!("missing read or write permission on {:?}", environment.path),
            solution: Some("fix permissions on the environment directory".to_string()),
            auto_fixable: true,
            repair_action: Some(RepairAction::FixPermissions),
        });
    }
}

fn check_package_integrity(environment: &EnvironmentInfo, issues: &mut Vec<Issue>) {
    let Ok(interpreter) = platform_adapter::interpreter_path(&environment.path) else {
        return;
    };
    let interpreter_str = interpreter.to_string_lossy().into_owned();

    let mut broken = Vec::new();
    for package in &environment.packages {
        if DENYLIST.contains(&package.name.to_ascii_lowercase().as_str()) {
            continue;
        }
        let module_name = package.name.replace('-', "_");
        let import_statement = format!("import {module_name}");
        let outcome = platform_adapter::run(
            &interpreter_str,
            &["-c", &import_statement],
            None,
            &[],
            IMPORT_PROBE_TIMEOUT,
        );
        if !matches!(outcome, Ok(CommandOutcome::Completed(_))) {
            broken.push(package.name.clone());
        }
    }

    if !broken.is_empty() {
        issues.push(Issue {
            level: IssueLevel::Error,
            category: "broken_packages".to_string(),
            description: format!("failed to import: {}", broken.join(", ")),
            solution: Some("reinstall the broken packages".to_string()),
            auto_fixable: true,
            repair_action: Some(RepairAction::ReinstallBrokenPackages),
        });
    }
}

fn check_configured_vs_installed(
    environment: &EnvironmentInfo,
    backend: &dyn PackageBackend,
    issues: &mut Vec<Issue>,
    details: &mut BTreeMap<String, String>,
) {
    let Ok(actual) = backend.list_packages(&environment.path) else {
        return;
    };
    let actual_names: std::collections::HashSet<&str> = actual.iter().map(|package| package.name.as_str()).collect();
    let missing: Vec<&str> = environment
        .packages
        .iter()
        .map(|package| package.name.as_str())
        .filter(|name| !actual_names.contains(name))
        .collect();

    details.insert("installed_package_count".to_string(), actual.len().to_string());

    if !missing.is_empty() {
        issues.push(Issue {
            level: IssueLevel::Warning,
            category: "configured_vs_installed".to_string(),
            description: format!("declared but not installed: {}", missing.join(", ")),
            solution: Some("install the missing packages".to_string()),
            auto_fixable: true,
            repair_action: Some(RepairAction::InstallMissingPackages),
        });
    }
}

/// Major-version component of a version string, e.g. `"2.31.0"` -> `2`.
/// Versions that don't start with an integer sort as equal (no bump
/// detected) rather than failing the check.
fn major_version(version: &str) -> Option<u64> {
    version.split('.').next()?.parse().ok()
}

fn check_updates_available(environment: &EnvironmentInfo, backend: &dyn PackageBackend, issues: &mut Vec<Issue>) {
    let Ok(outdated) = backend.list_outdated(&environment.path) else {
        return;
    };

    if outdated.is_empty() {
        return;
    }

    let major_bump = outdated.iter().any(|package| {
        match (major_version(&package.current_version), major_version(&package.latest_version)) {
            (Some(current), Some(latest)) => latest > current,
            _ => false,
        }
    });

    let description = format!(
        "updates available: {}",
        outdated
            .iter()
            .map(|package| format!("{} {} -> {}", package.name, package.current_version, package.latest_version))
            .collect::<Vec<_>>()
            .join(", ")
    );

    issues.push(Issue {
        level: if major_bump { IssueLevel::Error } else { IssueLevel::Warning },
        category: "updates_available".to_string(),
        description,
        solution: Some("update the outdated packages".to_string()),
        auto_fixable: false,
        repair_action: None,
    });
}

fn check_cache_coherence(
    environment: &EnvironmentInfo,
    cache: &CacheStore,
    issues: &mut Vec<Issue>,
    details: &mut BTreeMap<String, String>,
) {
    let (present, total) = cache_coherence(environment, cache);
    if total == 0 {
        return;
    }
    details.insert("cache_coherent_packages".to_string(), format!("{present}/{total}"));

    let ratio = present as f64 / total as f64;
    if ratio < 0.5 {
        issues.push(Issue {
            level: IssueLevel::Warning,
            category: "cache_coherence".to_string(),
            description: format!("only {present} of {total} declared packages have a cached artifact"),
            solution: Some("re-run install to repopulate the cache".to_string()),
            auto_fixable: false,
            repair_action: None,
        });
    }
}

fn check_disk_space(environment: &EnvironmentInfo, issues: &mut Vec<Issue>, details: &mut BTreeMap<String, String>) {
    let free_bytes = platform_adapter::free_disk_bytes(&environment.path);
    let free_mb = free_bytes / (1024 * 1024);
    details.insert("free_disk_mb".to_string(), free_mb.to_string());

    if free_mb < 100 {
        issues.push(Issue {
            level: IssueLevel::Error,
            category: "disk_space".to_string(),
            description: format!("only {free_mb} MB free"),
            solution: None,
            auto_fixable: false,
            repair_action: None,
        });
    } else if free_mb < 500 {
        issues.push(Issue {
            level: IssueLevel::Warning,
            category: "disk_space".to_string(),
            description: format!("only {free_mb} MB free"),
            solution: None,
            auto_fixable: false,
            repair_action: None,
        });
    }
}

/// Run [`diagnose`], then — if `auto_fix` is set — invoke the Lifecycle
/// routine matching each issue's repair action, and run a second
/// diagnostic pass to decide the returned success flag.
pub fn repair(
    lifecycle: &mut Lifecycle<'_>,
    name: &str,
    backend: &dyn PackageBackend,
    auto_fix: bool,
) -> Result<RepairOutcome, GestvenvError> {
    let environment = lifecycle.info(name)?;
    let report = diagnose(&environment, backend, lifecycle.cache(), DiagnosticMode::Full);

    if !auto_fix {
        return Ok(RepairOutcome {
            actions_taken: Vec::new(),
            success: report.overall_status == Health::Healthy,
            follow_up_report: report,
        });
    }

    let mut actions_taken = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for issue in &report.issues {
        let Some(action) = issue.repair_action else { continue };
        if !seen.insert(action) {
            continue;
        }
        apply_repair_action(lifecycle, &environment, backend, action)?;
        actions_taken.push(action);
    }

    let environment = lifecycle.info(name)?;
    let follow_up_report = diagnose(&environment, backend, lifecycle.cache(), DiagnosticMode::Full);
    let success = follow_up_report.overall_status == Health::Healthy;

    Ok(RepairOutcome {
        actions_taken,
        success,
        follow_up_report,
    })
}

fn apply_repair_action(
    lifecycle: &mut Lifecycle<'_>,
    environment: &EnvironmentInfo,
    backend: &dyn PackageBackend,
    action: RepairAction,
) -> Result<(), GestvenvError> {
    match action {
        RepairAction::RecreateEnvironment => {
            let previous_packages: Vec<String> = environment
                .packages
                .iter()
                .map(|package| format!("{}=={}", package.name, package.version))
                .collect();
            let _ = lifecycle.delete(&environment.name);
            lifecycle.create(
                &environment.name,
                &environment.python_version,
                CreateOptions {
                    custom_path: Some(environment.path.clone()),
                    preference: environment.backend_type,
                    pyproject_path: environment
                        .pyproject_info
                        .as_ref()
                        .and_then(|info| info.source_path.clone()),
                    initial_packages: previous_packages,
                },
            )?;
        }
        RepairAction::ReinstallInterpreter | RepairAction::RepairStructure | RepairAction::RepairActivationScript => {
            apply_repair_action(lifecycle, environment, backend, RepairAction::RecreateEnvironment)?;
        }
        RepairAction::InstallInstaller | RepairAction::RepairInstaller => {
            let _ = backend.create_environment(&environment.path, &environment.python_version);
        }
        RepairAction::InstallMissingPackages | RepairAction::ReinstallBrokenPackages => {
            for package in &environment.packages {
                let requirement = format!("{}=={}", package.name, package.version);
                let _ = backend.install_package(&environment.path, &requirement, &InstallOptions { upgrade: true, ..InstallOptions::default() });
            }
        }
        RepairAction::FixPermissions => {
            log::warn!(
                "automatic permission repair for {:?} is not supported on this platform; manual intervention required",
                environment.path
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::pip::Pip;
    use crate::models::{BackendPreference, SourceFileType};
    use std::collections::BTreeMap as Map;
    use std::path::PathBuf;

    fn sample_environment(path: PathBuf) -> EnvironmentInfo {
        let now = OffsetDateTime::UNIX_EPOCH;
        EnvironmentInfo {
            name: "demo".to_string(),
            path,
            python_version: "3.11".to_string(),
            backend_type: BackendPreference::Pip,
            source_file_type: SourceFileType::RequirementsTxt,
            pyproject_info: None,
            packages: Vec::new(),
            dependency_groups: Map::new(),
            lock_file_path: None,
            health: Health::Unknown,
            is_active: false,
            created_at: now,
            updated_at: now,
            last_used: now,
            metadata: Map::new(),
        }
    }

    #[test]
    fn missing_environment_reports_critical_physical_existence() {
        let environment = sample_environment(PathBuf::from("/nonexistent/gestvenv/demo"));
        let backend = Pip::new();
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(cache_dir.path()).unwrap();
        let report = diagnose(&environment, &backend, &cache, DiagnosticMode::Quick);

        assert_eq!(report.overall_status, Health::Corrupted);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.category == "physical_existence"));
    }

    #[test]
    fn healthy_environment_with_no_issues_reports_healthy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("pyvenv.cfg"), "").unwrap();
        std::fs::write(dir.path().join("bin/activate"), "").unwrap();

        let environment = sample_environment(dir.path().to_path_buf());
        let backend = Pip::new();
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(cache_dir.path()).unwrap();
        let report = diagnose(&environment, &backend, &cache, DiagnosticMode::Quick);

        assert!(!report.issues.iter().any(|issue| issue.category == "physical_existence"));
    }
}
