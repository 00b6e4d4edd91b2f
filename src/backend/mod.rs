//! Backend abstraction: one `PackageBackend` implementation per supported
//! installer (`pip`, `uv`, `poetry`, `pdm`), selected by
//! [`selector::select`].

pub mod pdm;
pub mod pip;
pub mod poetry;
pub mod selector;
pub mod uv;

pub use selector::CapabilityRequirements;

use std::path::Path;
use std::time::Duration;

use crate::error::BackendError;
use crate::models::{BackendCapabilities, OutdatedPackage, PackageInfo};
use crate::platform_adapter::{self, CommandOutcome};

/// How long a `--version` availability probe is allowed to run.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// The name of one of the four supported backends.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BackendKind {
    Pip,
    Uv,
    Poetry,
    Pdm,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pip => "pip",
            Self::Uv => "uv",
            Self::Poetry => "poetry",
            Self::Pdm => "pdm",
        }
    }

    /// The fixed availability-check order used by the Selector's final
    /// fallback step.
    pub const PRIORITY_ORDER: [BackendKind; 4] =
        [BackendKind::Uv, BackendKind::Poetry, BackendKind::Pdm, BackendKind::Pip];
}

/// Options accepted by [`PackageBackend::install_package`].
#[derive(Clone, Debug, Default)]
pub struct InstallOptions {
    pub upgrade: bool,
    pub editable: bool,
    pub timeout: Option<Duration>,
}

/// The structured outcome of an install operation. Never an `Err` for a
/// failed install — failures show up in `packages_failed`.
#[derive(Clone, Debug, Default)]
pub struct InstallResult {
    pub packages_installed: Vec<PackageInfo>,
    pub packages_failed: Vec<(String, String)>,
    pub backend_used: String,
}

/// A package manager/installer, abstracted behind one vocabulary so the
/// Lifecycle never branches on which tool is in play.
pub trait PackageBackend {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> BackendCapabilities;

    /// Probe the backend's executable with `--version`, bounded by
    /// [`PROBE_TIMEOUT`]. Implementations should cache the result for the
    /// lifetime of the value.
    fn is_available(&self) -> bool;

    fn create_environment(&self, env_path: &Path, python_version: &str) -> Result<(), BackendError>;

    fn install_package(
        &self,
        env_path: &Path,
        requirement: &str,
        options: &InstallOptions,
    ) -> Result<InstallResult, BackendError>;

    fn uninstall_package(&self, env_path: &Path, name: &str) -> Result<(), BackendError>;

    fn update_package(&self, env_path: &Path, name: &str) -> Result<(), BackendError>;

    fn list_packages(&self, env_path: &Path) -> Result<Vec<PackageInfo>, BackendError>;

    /// Packages with a newer version available than what is installed.
    /// Backends that cannot query this (no index lookup support) return
    /// `NotSupported`; the Diagnostic Engine treats that as "nothing to
    /// report" rather than a failure.
    fn list_outdated(&self, _env_path: &Path) -> Result<Vec<OutdatedPackage>, BackendError> {
        Err(BackendError::NotSupported {
            backend: self.kind().as_str().to_string(),
            operation: "list_outdated",
        })
    }

    fn sync_from_pyproject(
        &self,
        _env_path: &Path,
        _pyproject_path: &Path,
        _groups: &[String],
    ) -> Result<InstallResult, BackendError> {
        Err(BackendError::NotSupported {
            backend: self.kind().as_str().to_string(),
            operation: "sync_from_pyproject",
        })
    }

    fn install_from_requirements(
        &self,
        _env_path: &Path,
        _req_path: &Path,
    ) -> Result<InstallResult, BackendError> {
        Err(BackendError::NotSupported {
            backend: self.kind().as_str().to_string(),
            operation: "install_from_requirements",
        })
    }

    fn create_lock_file(&self, _pyproject_path: &Path) -> Result<(), BackendError> {
        Err(BackendError::NotSupported {
            backend: self.kind().as_str().to_string(),
            operation: "create_lock_file",
        })
    }

    fn install_from_lock(&self, _env_path: &Path, _lock_path: &Path) -> Result<(), BackendError> {
        Err(BackendError::NotSupported {
            backend: self.kind().as_str().to_string(),
            operation: "install_from_lock",
        })
    }
}

/// Characters that make a requirement string unsafe to pass to a
/// subprocess argument list: every backend rejects these before invoking
/// anything.
const UNSAFE_REQUIREMENT_CHARS: [char; 5] = [';', '|', '&', '`', '$'];

/// Reject requirement strings containing shell metacharacters. Every
/// backend's `install_package` calls this before doing anything else.
pub fn validate_requirement(requirement: &str) -> Result<(), BackendError> {
    if requirement.trim().is_empty() || requirement.contains(UNSAFE_REQUIREMENT_CHARS) {
        return Err(BackendError::NonZeroExit {
            backend: "validator".to_string(),
            operation: "validate_requirement".to_string(),
            stderr_tail: format!("{requirement:?} is not a safe requirement string"),
        });
    }
    Ok(())
}

/// Probe `program --version`, treating any clean exit (success or failure,
/// as long as the process actually ran) within [`PROBE_TIMEOUT`] as
/// "available"; a spawn failure or timeout means unavailable.
pub fn probe_version(program: &str) -> bool {
    matches!(
        platform_adapter::run(program, &["--version"], None, &[], PROBE_TIMEOUT),
        Ok(CommandOutcome::Completed(_) | CommandOutcome::Failed(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requirement_rejects_shell_metacharacters() {
        assert!(validate_requirement("requests; rm -rf /").is_err());
        assert!(validate_requirement("requests`whoami`").is_err());
        assert!(validate_requirement("requests==2.31.0").is_ok());
    }

    #[test]
    fn validate_requirement_rejects_empty_string() {
        assert!(validate_requirement("   ").is_err());
    }
}
