//! The `poetry` backend: capability descriptor and availability probe are
//! real; the core operations are structured "not implemented" stubs, as
//! documented for this backend.

use std::path::Path;
use std::sync::OnceLock;

use super::{probe_version, BackendKind, InstallOptions, InstallResult, PackageBackend};
use crate::error::BackendError;
use crate::models::{BackendCapabilities, PackageInfo, SourceFileType};

pub struct Poetry {
    available: OnceLock<bool>,
}

impl Default for Poetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Poetry {
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

impl PackageBackend for Poetry {
    fn kind(&self) -> BackendKind {
        BackendKind::Poetry
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            lock_files: true,
            dependency_groups: true,
            parallel_install: false,
            editable_installs: true,
            workspace: false,
            pyproject_sync: true,
            max_parallel_jobs: 1,
            performance_score: 6,
            supported_formats: vec![SourceFileType::PyprojectToml, SourceFileType::PoetryLock],
        }
    }

    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| probe_version("poetry"))
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
        let poetry = Poetry::new();
        let dir = tempfile::tempdir().unwrap();
        let result = poetry.create_environment(dir.path(), "3.11");
        assert!(matches!(result, Err(BackendError::NotSupported { .. })));
    }

    #[test]
    fn capability_descriptor_participates_in_selection() {
        let poetry = Poetry::new();
        assert!(poetry.capabilities().lock_files);
        assert!(poetry.capabilities().dependency_groups);
    }
}
