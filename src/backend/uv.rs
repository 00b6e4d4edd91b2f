//! The `uv` backend: a single external binary, preferred for performance
//! and the only backend supporting lock files and parallel installs.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use time::OffsetDateTime;

use super::{probe_version, validate_requirement, BackendKind, InstallOptions, InstallResult, PackageBackend};
use crate::error::BackendError;
use crate::models::{BackendCapabilities, OutdatedPackage, PackageInfo, SourceFileType};
use crate::platform_adapter::{self, CommandOutcome};

const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_PARALLEL_JOBS: u8 = 8;

pub struct Uv {
    available: OnceLock<bool>,
}

impl Default for Uv {
    fn default() -> Self {
        Self::new()
    }
}

impl Uv {
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: OnceLock::new(),
        }
    }

    fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutcome, BackendError> {
        platform_adapter::run("uv", args, None, &[], timeout)
            .map_err(|error| BackendError::Spawn { backend: "uv".to_string(), source: io_error_from(error) })
    }
}

impl PackageBackend for Uv {
    fn kind(&self) -> BackendKind {
        BackendKind::Uv
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            lock_files: true,
            dependency_groups: true,
            parallel_install: true,
            editable_installs: true,
            workspace: true,
            pyproject_sync: true,
            max_parallel_jobs: MAX_PARALLEL_JOBS,
            performance_score: 9,
            supported_formats: vec![
                SourceFileType::RequirementsTxt,
                SourceFileType::PyprojectToml,
                SourceFileType::UvLock,
            ],
        }
    }

    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| probe_version("uv"))
    }

    fn create_environment(&self, env_path: &Path, python_version: &str) -> Result<(), BackendError> {
        let env_path_str = env_path.to_string_lossy().into_owned();
        let outcome = self.run(
            &["venv", "--python", python_version, &env_path_str],
            Duration::from_secs(120),
        )?;
        match outcome {
            CommandOutcome::Completed(_) => Ok(()),
            other => Err(nonzero("create_environment", &other)),
        }
    }

    fn install_package(
        &self,
        env_path: &Path,
        requirement: &str,
        options: &InstallOptions,
    ) -> Result<InstallResult, BackendError> {
        validate_requirement(requirement)?;
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "uv".to_string() })?;
        let interpreter_str = interpreter.to_string_lossy().into_owned();

        let mut args = vec!["pip", "install", "--python", interpreter_str.as_str()];
        if options.upgrade {
            args.push("--upgrade");
        }
        if options.editable {
            args.push("-e");
        }
        args.push(requirement);

        let timeout = options.timeout.unwrap_or(DEFAULT_INSTALL_TIMEOUT);
        let outcome = self.run(&args, timeout)?;

        let mut result = InstallResult {
            backend_used: "uv".to_string(),
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
                    backend_used: "uv".to_string(),
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
                    backend: "uv".to_string(),
                    operation: "install_package".to_string(),
                    timeout,
                });
            }
        }

        Ok(result)
    }

    fn uninstall_package(&self, env_path: &Path, name: &str) -> Result<(), BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "uv".to_string() })?;
        let interpreter_str = interpreter.to_string_lossy().into_owned();
        let outcome = self.run(
            &["pip", "uninstall", "--python", &interpreter_str, name],
            DEFAULT_INSTALL_TIMEOUT,
        )?;
        match outcome {
            CommandOutcome::Completed(_) => Ok(()),
            other => Err(nonzero("uninstall_package", &other)),
        }
    }

    fn update_package(&self, env_path: &Path, name: &str) -> Result<(), BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "uv".to_string() })?;
        let interpreter_str = interpreter.to_string_lossy().into_owned();
        let outcome = self.run(
            &["pip", "install", "--python", &interpreter_str, "--upgrade", name],
            DEFAULT_INSTALL_TIMEOUT,
        )?;
        match outcome {
            CommandOutcome::Completed(_) => Ok(()),
            other => Err(nonzero("update_package", &other)),
        }
    }

    fn list_packages(&self, env_path: &Path) -> Result<Vec<PackageInfo>, BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "uv".to_string() })?;
        let interpreter_str = interpreter.to_string_lossy().into_owned();
        let outcome = self.run(
            &["pip", "list", "--python", &interpreter_str, "--format", "json"],
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
            backend: "uv".to_string(),
            operation: "list_packages".to_string(),
            stderr_tail: "could not parse `uv pip list --format json` output".to_string(),
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
                backend_used: "uv".to_string(),
                installed_at: now,
                summary: None,
                dependencies: Vec::new(),
                requires: Vec::new(),
            })
            .collect())
    }

    fn list_outdated(&self, env_path: &Path) -> Result<Vec<OutdatedPackage>, BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "uv".to_string() })?;
        let interpreter_str = interpreter.to_string_lossy().into_owned();
        let outcome = self.run(
            &[
                "pip",
                "list",
                "--python",
                &interpreter_str,
                "--outdated",
                "--format",
                "json",
            ],
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
            backend: "uv".to_string(),
            operation: "list_outdated".to_string(),
            stderr_tail: "could not parse `uv pip list --outdated --format json` output".to_string(),
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

    fn sync_from_pyproject(
        &self,
        env_path: &Path,
        pyproject_path: &Path,
        groups: &[String],
    ) -> Result<InstallResult, BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "uv".to_string() })?;
        let interpreter_str = interpreter.to_string_lossy().into_owned();
        let pyproject_str = pyproject_path.to_string_lossy().into_owned();

        let mut args = vec![
            "pip",
            "sync",
            "--python",
            interpreter_str.as_str(),
            pyproject_str.as_str(),
        ];
        for group in groups {
            args.push("--group");
            args.push(group.as_str());
        }

        let outcome = self.run(&args, Duration::from_secs(600))?;
        match outcome {
            CommandOutcome::Completed(_) => Ok(InstallResult {
                packages_installed: self.list_packages(env_path)?,
                packages_failed: Vec::new(),
                backend_used: "uv".to_string(),
            }),
            other => Err(nonzero("sync_from_pyproject", &other)),
        }
    }

    fn install_from_requirements(&self, env_path: &Path, req_path: &Path) -> Result<InstallResult, BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "uv".to_string() })?;
        let interpreter_str = interpreter.to_string_lossy().into_owned();
        let req_path_str = req_path.to_string_lossy().into_owned();

        let outcome = self.run(
            &["pip", "install", "--python", &interpreter_str, "-r", &req_path_str],
            Duration::from_secs(600),
        )?;
        match outcome {
            CommandOutcome::Completed(_) => Ok(InstallResult {
                packages_installed: self.list_packages(env_path)?,
                packages_failed: Vec::new(),
                backend_used: "uv".to_string(),
            }),
            other => Err(nonzero("install_from_requirements", &other)),
        }
    }

    fn create_lock_file(&self, pyproject_path: &Path) -> Result<(), BackendError> {
        let pyproject_str = pyproject_path.to_string_lossy().into_owned();
        let outcome = self.run(&["lock", "--project", &pyproject_str], Duration::from_secs(300))?;
        match outcome {
            CommandOutcome::Completed(_) => Ok(()),
            other => Err(nonzero("create_lock_file", &other)),
        }
    }

    fn install_from_lock(&self, env_path: &Path, lock_path: &Path) -> Result<(), BackendError> {
        let interpreter = platform_adapter::interpreter_path(env_path)
            .map_err(|_| BackendError::Unavailable { backend: "uv".to_string() })?;
        let interpreter_str = interpreter.to_string_lossy().into_owned();
        let lock_str = lock_path.to_string_lossy().into_owned();

        let outcome = self.run(
            &["pip", "sync", "--python", &interpreter_str, &lock_str],
            Duration::from_secs(600),
        )?;
        match outcome {
            CommandOutcome::Completed(_) => Ok(()),
            other => Err(nonzero("install_from_lock", &other)),
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
        backend: "uv".to_string(),
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
    fn capabilities_mark_uv_as_highest_performing() {
        let uv = Uv::new();
        let capabilities = uv.capabilities();
        assert_eq!(capabilities.performance_score, 9);
        assert!(capabilities.lock_files);
        assert!(capabilities.parallel_install);
        assert_eq!(capabilities.max_parallel_jobs, MAX_PARALLEL_JOBS);
    }
}
