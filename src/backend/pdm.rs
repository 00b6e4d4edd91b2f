//! The `pdm` backend: capability descriptor and availability probe are
//! real; the core operations are structured "not implemented" stubs, as
//! documented for this backend.

use std::path::Path;
use std::sync::OnceLock;

use super::{probe_version, BackendKind, InstallOptions, InstallResult, PackageBackend};
use crate::error::BackendError;
use crate::models::{BackendCapabilities, PackageInfo, SourceFileType};

pub struct Pdm {
    available: OnceLock<bool>,
}

impl Default for Pdm {
    fn default() -> Self {
        Self::new()
    }
}

impl Pdm {
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: OnceLock::new(),
        }
    }

    fn not_supported(&self, operation: &'static str) -> BackendError {
        BackendError::NotSupported {
            backend: self.kind().as_str().to_string(),
            operation,
        }
    }
}

impl PackageBackend for Pdm {
    fn kind(&self) -> BackendKind {
        BackendKind::Pdm
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            lock_files: true,
            dependency_groups: true,
            parallel_install: true,
            editable_installs: true,
            workspace: true,
            pyproject_sync: true,
            max_parallel_jobs: 4,
            performance_score: 7,
            // `pdm.lock` has no `SourceFileType` variant of its own (see
            // models.rs); `pyproject.toml` is the only declared format this
            // backend can be matched against.
            supported_formats: vec![SourceFileType::PyprojectToml],
        }
    }

    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| probe_version("pdm"))
    }

    fn create_environment(&self, _env_path: &Path, _python_version: &str) -> Result<(), BackendError> {
        Err(self.not_supported("create_environment"))
    }

    fn install_package(
        &self,
        _env_path: &Path,
        _requirement: &str,
        _options: &InstallOptions,
    ) -> Result<InstallResult, BackendError> {
        Err(self.not_supported("install_package"))
    }

    fn uninstall_package(&self, _env_path: &Path, _name: &str) -> Result<(), BackendError> {
        Err(self.not_supported("uninstall_package"))
    }

    fn update_package(&self, _env_path: &Path, _name: &str) -> Result<(), BackendError> {
        Err(self.not_supported("update_package"))
    }

    fn list_packages(&self, _env_path: &Path) -> Result<Vec<PackageInfo>, BackendError> {
        Err(self.not_supported("list_packages"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_operations_report_not_supported() {
        let pdm = Pdm::new();
        let result = pdm.uninstall_package(Path::new("/tmp/env"), "requests");
        assert!(matches!(result, Err(BackendError::NotSupported { .. })));
    }
}
