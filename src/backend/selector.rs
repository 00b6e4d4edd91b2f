//! Deterministic backend selection: explicit preference, then lock-file
//! hints, then project-directory sniffing, then a fixed availability
//! order, filtered by any required capabilities.

use std::path::Path;

use super::{BackendKind, PackageBackend};
use crate::error::BackendError;
use crate::models::{BackendCapabilities, BackendPreference, EnvironmentInfo, SourceFileType};

/// A capability requirement the caller wants the selected backend to
/// satisfy, checked against [`BackendCapabilities`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CapabilityRequirements {
    pub lock_files: bool,
    pub dependency_groups: bool,
    pub parallel_install: bool,
    pub editable_installs: bool,
    pub workspace: bool,
    pub pyproject_sync: bool,
    /// When set, only a backend whose `supported_formats` includes this
    /// source-file type is eligible.
    pub source_file_type: Option<SourceFileType>,
}

impl CapabilityRequirements {
    fn satisfied_by(&self, capabilities: &BackendCapabilities) -> bool {
        (!self.lock_files || capabilities.lock_files)
            && (!self.dependency_groups || capabilities.dependency_groups)
            && (!self.parallel_install || capabilities.parallel_install)
            && (!self.editable_installs || capabilities.editable_installs)
            && (!self.workspace || capabilities.workspace)
            && (!self.pyproject_sync || capabilities.pyproject_sync)
            && self
                .source_file_type
                .map_or(true, |format| capabilities.supported_formats.contains(&format))
    }
}

/// Select a backend given an explicit preference, optional environment
/// context, optional project directory, and optional capability
/// requirements.
///
/// `backends` must list every available [`PackageBackend`] implementation;
/// availability is probed (and cached per-value) as needed.
pub fn select<'a>(
    backends: &'a [Box<dyn PackageBackend>],
    preference: BackendPreference,
    environment: Option<&EnvironmentInfo>,
    project_dir: Option<&Path>,
    requirements: Option<CapabilityRequirements>,
) -> Result<&'a dyn PackageBackend, BackendError> {
    let find = |kind: BackendKind| backends.iter().find(|backend| backend.kind() == kind);

    // Step 1: explicit preference.
    if preference != BackendPreference::Auto {
        if let Some(backend) = find(preference_to_kind(preference)) {
            if backend.is_available() {
                return Ok(backend.as_ref());
            }
        }
    }

    // Step 2: lock-file hint carried by the environment record.
    if let Some(environment) = environment {
        if let Some(lock_path) = &environment.lock_file_path {
            if let Some(kind) = lock_file_kind(lock_path) {
                if let Some(backend) = find(kind) {
                    if backend.is_available() {
                        return Ok(backend.as_ref());
                    }
                }
            }
        }
    }

    // Step 3: project-directory file-priority walk.
    if let Some(project_dir) = project_dir {
        if let Some(kind) = sniff_project_directory(project_dir) {
            if let Some(backend) = find(kind) {
                if backend.is_available() {
                    return Ok(backend.as_ref());
                }
            }
        }
    }

    // Step 4 (+ 5): fixed availability order, filtered by capabilities.
    let available: Vec<&dyn PackageBackend> = BackendKind::PRIORITY_ORDER
        .into_iter()
        .filter_map(find)
        .map(Box::as_ref)
        .filter(|backend| backend.is_available())
        .collect();

    if let Some(requirements) = requirements {
        let mut eligible: Vec<&dyn PackageBackend> = available
            .into_iter()
            .filter(|backend| requirements.satisfied_by(&backend.capabilities()))
            .collect();
        eligible.sort_by_key(|backend| std::cmp::Reverse(backend.capabilities().performance_score));
        if let Some(best) = eligible.into_iter().next() {
            return Ok(best);
        }
    } else if let Some(first) = available.into_iter().next() {
        return Ok(first);
    }

    // Fallback: pip if available at all, else fail outright.
    if let Some(pip) = find(BackendKind::Pip) {
        if pip.is_available() {
            return Ok(pip.as_ref());
        }
    }

    Err(BackendError::NoBackendAvailable)
}

fn preference_to_kind(preference: BackendPreference) -> BackendKind {
    match preference {
        BackendPreference::Pip | BackendPreference::Auto => BackendKind::Pip,
        BackendPreference::Uv => BackendKind::Uv,
        BackendPreference::Poetry => BackendKind::Poetry,
        BackendPreference::Pdm => BackendKind::Pdm,
    }
}

fn lock_file_kind(lock_path: &Path) -> Option<BackendKind> {
    match lock_path.file_name()?.to_str()? {
        "uv.lock" => Some(BackendKind::Uv),
        "poetry.lock" => Some(BackendKind::Poetry),
        "pdm.lock" => Some(BackendKind::Pdm),
        _ => None,
    }
}

const PROJECT_FILE_PRIORITY: [&str; 5] = [
    "uv.lock",
    "poetry.lock",
    "pdm.lock",
    "pyproject.toml",
    "requirements.txt",
];

fn sniff_project_directory(project_dir: &Path) -> Option<BackendKind> {
    for filename in PROJECT_FILE_PRIORITY {
        let candidate = project_dir.join(filename);
        if !candidate.exists() {
            continue;
        }
        return match filename {
            "uv.lock" => Some(BackendKind::Uv),
            "poetry.lock" => Some(BackendKind::Poetry),
            "pdm.lock" => Some(BackendKind::Pdm),
            "pyproject.toml" => Some(sniff_pyproject(&candidate).unwrap_or(BackendKind::Uv)),
            _ => None,
        };
    }
    None
}

/// Infer a backend from a `pyproject.toml`'s `[tool.*]` sections and
/// `build-system.build-backend`, defaulting to `uv` for modern documents
/// that declare neither.
fn sniff_pyproject(path: &Path) -> Option<BackendKind> {
    let contents = std::fs::read_to_string(path).ok()?;
    let document: toml::Value = contents.parse().ok()?;

    if let Some(tool) = document.get("tool").and_then(toml::Value::as_table) {
        if tool.contains_key("poetry") {
            return Some(BackendKind::Poetry);
        }
        if tool.contains_key("pdm") {
            return Some(BackendKind::Pdm);
        }
        if tool.contains_key("uv") {
            return Some(BackendKind::Uv);
        }
    }

    let build_backend = document
        .get("build-system")
        .and_then(|table| table.get("build-backend"))
        .and_then(toml::Value::as_str)?;

    if build_backend.contains("poetry") {
        Some(BackendKind::Poetry)
    } else if build_backend.contains("pdm") {
        Some(BackendKind::Pdm)
    } else {
        Some(BackendKind::Uv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_file_kind_maps_known_names() {
        assert_eq!(lock_file_kind(Path::new("/proj/uv.lock")), Some(BackendKind::Uv));
        assert_eq!(
            lock_file_kind(Path::new("/proj/poetry.lock")),
            Some(BackendKind::Poetry)
        );
        assert_eq!(lock_file_kind(Path::new("/proj/pdm.lock")), Some(BackendKind::Pdm));
        assert_eq!(lock_file_kind(Path::new("/proj/setup.py")), None);
    }

    #[test]
    fn sniff_pyproject_detects_poetry_tool_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyproject.toml");
        std::fs::write(&path, "[tool.poetry]\nname = \"demo\"\n").unwrap();

        assert_eq!(sniff_pyproject(&path), Some(BackendKind::Poetry));
    }

    #[test]
    fn sniff_pyproject_defaults_to_uv_for_modern_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyproject.toml");
        std::fs::write(&path, "[project]\nname = \"demo\"\nversion = \"0.1.0\"\n").unwrap();

        assert_eq!(sniff_pyproject(&path), Some(BackendKind::Uv));
    }

    #[test]
    fn sniff_project_directory_prefers_lock_files_over_pyproject() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "[tool.poetry]\n").unwrap();
        std::fs::write(dir.path().join("uv.lock"), "").unwrap();

        assert_eq!(sniff_project_directory(dir.path()), Some(BackendKind::Uv));
    }
}
