//! The `pip` backend: always available wherever Python itself is, since it
//! only drives the environment's own interpreter via `-m venv`/`-m pip`.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use time::OffsetDateTime;

use super::{probe_version, validate_requirement, BackendKind, InstallOptions, InstallResult, PackageBackend};
use crate::error::BackendError;
use crate::models::{BackendCapabilities, OutdatedPackage, PackageInfo, SourceFileType};
use crate::platform_adapter::{self, CommandOutcome};

const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Driven entirely through the target environment's own `python -m ...`
/// invocations, so availability just means "does a system Python exist".
pub struct Pip {
    available: OnceLock<bool>,
    upgrade_pip_after_create: bool,
}

impl Default for Pip {
    fn default() -> Self {
        Self::new()
    }
}

impl Pip {
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: OnceLock::new(),
            upgrade_pip_after_create: true,
        }
    }

    /// Skip the post-create `pip install --upgrade pip` step.
    #[must_use]
    pub fn without_pip_upgrade() -> Self {
        Self {
            available: OnceLock::new(),
            upgrade_pip_after_create: false,
        }
    }

    /// Run `python -m ...` the way pip expects to be invoked: inheriting the
    /// parent environment with `VIRTUAL_ENV` pointed at `env_path` and
    /// `PYTHONHOME` cleared, so pip never mistakes some other interpreter's
    /// home for this environment's.
    fn run_module(
        &self,
        env_path: &Path,
        interpreter: &Path,
        module_args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutcome, BackendError> {
        let interpreter_str = interpreter.to_string_lossy().into_owned();
        let virtual_env = env_path.to_string_lossy().into_owned();
        platform_adapter::run_with_env_removed(
            &interpreter_str,
            module_args,
            None,
            &[("VIRTUAL_ENV", virtual_env.as_str())],
            &["PYTHONHOME"],
            timeout,
        )
        .map_err(|error| BackendError::Spawn {
            backend: "pip".to_string(),
            source: io_error_from(error),
        })
    }
}

impl PackageBackend for Pip {
    fn kind(&self) -> BackendKind {
        BackendKind::Pip
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            lock_files: false,
            dependency_groups: false,
            parallel_install: false,
            editable_installs: true,
            workspace: false,
            pyproject_sync: false,
            max_parallel_jobs: 1,
            performance_score: 4,
            supported_formats: vec![SourceFileType::RequirementsTxt],
        }
    }

    fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| platform_adapter::resolve_python("python3").is_ok() || probe_version("python"))
    }

    fn create_environment(&self, env_path: &Path, python_version: &str) -> Result<(), BackendError> {
        let python = platform_adapter::resolve_python(python_version)
            .map_err(|_| BackendError::Unavailable { backend: "pip".to_string() })?;
        let python_str = python.to_string_lossy().into_owned();
        let env_path_str = env_path.to_string_lossy().into_owned();

        let outcome = platform_adapter::run(
            &python_str,
            &["-m", "venv", &env_path_str],
            None,
            &[],
            Duration::from_secs(120),
        )
        .map_err(|error| BackendError::Spawn { backend: "pip".to_string(), source: io_error_from(error) })?;

        let venv_ok = matches!(outcome, CommandOutcome::Completed(_));
        if !venv_ok {
            log::warn!("python -m venv failed for {env_path_str:?}, falling back to virtualenv");
            let fallback = platform_adapter::run(
                "virtualenv",
                &["--python", &python_str, &env_path_str],
                None,
                &[],
                Duration::from_secs(120),
            )
            .map_err(|error| BackendError::Spawn { backend: "pip".to_string(), source: io_error_from(error) })?;

            if !matches!(fallback, CommandOutcome::Completed(_)) {
                return Err(nonzero("create_environment", &fallback));
            }
        }

        if self.upgrade_pip_after_create {
            if let Ok(interpreter) = platform_adapter::interpreter_path(env_path) {
                let _ = self.run_module(
                    env_path,
                    &interpreter,
                    &["-m", "pip", "install", "--upgrade", "pip"],
                    DEFAULT_INSTALL_TIMEOUT,
                );
            }
        }

        Ok(())
    }

    fn install_package(
        &self,
        env_path: &Path,
        requirement: &str,
        options: &InstallOptions,
    ) -> Result<InstallResult, BackendError> {
        validate_requirement(requirement)?;
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "pip".to_string() })?;

        let mut args = vec!["-m", "pip", "install"];
        if options.upgrade {
            args.push("--upgrade");
        }
        if options.editable {
            args.push("-e");
        }
        args.push(requirement);

        let timeout = options.timeout.unwrap_or(DEFAULT_INSTALL_TIMEOUT);
        let outcome = self.run_module(env_path, &interpreter, &args, timeout)?;

        let mut result = InstallResult {
            backend_used: "pip".to_string(),
            ..InstallResult::default()
        };

        match outcome {
            CommandOutcome::Completed(_) => {
                let name = requirement_name(requirement);
                let installed = self
                    .list_packages(env_path)?
                    .into_iter()
                    .find(|package| package.name.eq_ignore_ascii_case(&name));
                result.packages_installed.push(installed.unwrap_or(PackageInfo {
                    name,
                    version: "unknown".to_string(),
                    source: "pypi".to_string(),
                    is_editable: options.editable,
                    local_path: None,
                    backend_used: "pip".to_string(),
                    installed_at: OffsetDateTime::now_utc(),
                    summary: None,
                    dependencies: Vec::new(),
                    requires: Vec::new(),
                }));
            }
            CommandOutcome::Failed(output) => {
                result
                    .packages_failed
                    .push((requirement_name(requirement), stderr_tail(&output.stderr)));
            }
            CommandOutcome::Timeout { .. } => {
                return Err(BackendError::Timeout {
                    backend: "pip".to_string(),
                    operation: "install_package".to_string(),
                    timeout,
                });
            }
        }

        Ok(result)
    }

    fn uninstall_package(&self, env_path: &Path, name: &str) -> Result<(), BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "pip".to_string() })?;
        let outcome = self.run_module(
            env_path,
            &interpreter,
            &["-m", "pip", "uninstall", "-y", name],
            DEFAULT_INSTALL_TIMEOUT,
        )?;
        match outcome {
            CommandOutcome::Completed(_) => Ok(()),
            other => Err(nonzero("uninstall_package", &other)),
        }
    }

    fn update_package(&self, env_path: &Path, name: &str) -> Result<(), BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "pip".to_string() })?;
        let outcome = self.run_module(
            env_path,
            &interpreter,
            &["-m", "pip", "install", "--upgrade", name],
            DEFAULT_INSTALL_TIMEOUT,
        )?;
        match outcome {
            CommandOutcome::Completed(_) => Ok(()),
            other => Err(nonzero("update_package", &other)),
        }
    }

    fn list_packages(&self, env_path: &Path) -> Result<Vec<PackageInfo>, BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "pip".to_string() })?;
        let outcome = self.run_module(
            env_path,
            &interpreter,
            &["-m", "pip", "list", "--format", "json"],
            DEFAULT_INSTALL_TIMEOUT,
        )?;

        let CommandOutcome::Completed(result) = outcome else {
            return Err(nonzero("list_packages", &outcome));
        };

        #[derive(serde::Deserialize)]
        struct Entry {
            name: String,
            version: String,
        }

        let entries: Vec<Entry> = serde_json::from_str(&result.stdout).map_err(|_| BackendError::NonZeroExit {
            backend: "pip".to_string(),
            operation: "list_packages".to_string(),
            stderr_tail: "could not parse `pip list --format json` output".to_string(),
        })?;

        let now = OffsetDateTime::now_utc();
        Ok(entries
            .into_iter()
            .map(|entry| PackageInfo {
                name: entry.name,
                version: entry.version,
                source: "pypi".to_string(),
                is_editable: false,
                local_path: None,
                backend_used: "pip".to_string(),
                installed_at: now,
                summary: None,
                dependencies: Vec::new(),
                requires: Vec::new(),
            })
            .collect())
    }

    fn list_outdated(&self, env_path: &Path) -> Result<Vec<OutdatedPackage>, BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "pip".to_string() })?;
        let outcome = self.run_module(
            env_path,
            &interpreter,
            &["-m", "pip", "list", "--outdated", "--format", "json"],
            DEFAULT_INSTALL_TIMEOUT,
        )?;

        let CommandOutcome::Completed(result) = outcome else {
            return Err(nonzero("list_outdated", &outcome));
        };

        #[derive(serde::Deserialize)]
        struct Entry {
            name: String,
            version: String,
            latest_version: String,
        }

        let entries: Vec<Entry> = serde_json::from_str(&result.stdout).map_err(|_| BackendError::NonZeroExit {
            backend: "pip".to_string(),
            operation: "list_outdated".to_string(),
            stderr_tail: "could not parse `pip list --outdated --format json` output".to_string(),
        })?;

        Ok(entries
            .into_iter()
            .map(|entry| OutdatedPackage {
                name: entry.name,
                current_version: entry.version,
                latest_version: entry.latest_version,
            })
            .collect())
    }

    fn install_from_requirements(&self, env_path: &Path, req_path: &Path) -> Result<InstallResult, BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "pip".to_string() })?;
        let req_path_str = req_path.to_string_lossy().into_owned();
        let outcome = self.run_module(
            env_path,
            &interpreter,
            &["-m", "pip", "install", "-r", &req_path_str],
            Duration::from_secs(600),
        )?;

        match outcome {
            CommandOutcome::Completed(_) => Ok(InstallResult {
                packages_installed: self.list_packages(env_path)?,
                packages_failed: Vec::new(),
                backend_used: "pip".to_string(),
            }),
            other => Err(nonzero("install_from_requirements", &other)),
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

fn stderr_tail(stderr: &str) -> String {
    stderr.lines().rev().take(5).collect::<Vec<_>>().join("\n")
}

fn nonzero(operation: &str, outcome: &CommandOutcome) -> BackendError {
    let stderr_tail = match outcome {
        CommandOutcome::Failed(result) => stderr_tail(&result.stderr),
        CommandOutcome::Timeout { partial_output } => stderr_tail(&partial_output.stderr),
        CommandOutcome::Completed(_) => String::new(),
    };
    BackendError::NonZeroExit {
        backend: "pip".to_string(),
        operation: operation.to_string(),
        stderr_tail,
    }
}

fn io_error_from(error: crate::platform_adapter::PlatformError) -> std::io::Error {
    std::io::Error::other(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_name_strips_version_specifiers() {
        assert_eq!(requirement_name("requests==2.31.0"), "requests");
        assert_eq!(requirement_name("numpy>=1.20,<2"), "numpy");
        assert_eq!(requirement_name("flask[async]"), "flask");
    }

    #[test]
    fn capabilities_reflect_pip_limitations() {
        let pip = Pip::new();
        let capabilities = pip.capabilities();
        assert!(!capabilities.lock_files);
        assert!(!capabilities.parallel_install);
        assert!(capabilities.editable_installs);
    }
}
