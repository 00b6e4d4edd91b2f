//! Data model shared across the Registry, Lifecycle, Backend and Diagnostic
//! subsystems (see `SPEC_FULL.md` §3).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Names that may not be used for an environment, regardless of whether
/// they'd otherwise match the naming pattern.
pub const RESERVED_NAMES: [&str; 11] = [
    "con", "prn", "aux", "nul", "com1", "lpt1", "system", "admin", "config", "venv", "env",
];

/// The full set of supported backends, including `auto` (resolved by the
/// selector rather than being a real installer).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Pip,
    Uv,
    Poetry,
    Pdm,
}

impl BackendPreference {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Pip => "pip",
            Self::Uv => "uv",
            Self::Poetry => "poetry",
            Self::Pdm => "pdm",
        }
    }
}

/// One of the source-file formats a backend was driven from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFileType {
    RequirementsTxt,
    PyprojectToml,
    SetupPy,
    PoetryLock,
    UvLock,
    EnvironmentYml,
}

/// The health classification of an environment, as last observed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    NeedsUpdate,
    HasWarnings,
    HasErrors,
    Corrupted,
    #[default]
    Unknown,
}

/// A free-form metadata value, restricted to the JSON scalar types the
/// spec permits (string, number, bool).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Number(f64),
    Bool(bool),
}

/// One managed Python virtual environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub name: String,
    pub path: PathBuf,
    pub python_version: String,
    pub backend_type: BackendPreference,
    pub source_file_type: SourceFileType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pyproject_info: Option<PyProjectInfo>,
    #[serde(default)]
    pub packages: Vec<PackageInfo>,
    #[serde(default)]
    pub dependency_groups: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_file_path: Option<PathBuf>,
    #[serde(default)]
    pub health: Health,
    #[serde(default)]
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used: OffsetDateTime,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl EnvironmentInfo {
    /// Insert or replace a package by name, keeping `packages` deduplicated
    /// and in insertion order otherwise.
    pub fn upsert_package(&mut self, package: PackageInfo) {
        if let Some(existing) = self.packages.iter_mut().find(|p| p.name == package.name) {
            *existing = package;
        } else {
            self.packages.push(package);
        }
    }

    #[must_use]
    pub fn find_package(&self, name: &str) -> Option<&PackageInfo> {
        self.packages.iter().find(|p| p.name == name)
    }
}

/// A parsed `pyproject.toml` project descriptor (PEP 621 `[project]` table).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PyProjectInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_system: Option<String>,
    #[serde(default)]
    pub tool_sections: toml::value::Table,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

/// One package installed into an environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub is_editable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    pub backend_used: String,
    #[serde(with = "time::serde::rfc3339")]
    pub installed_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
}

fn default_source() -> String {
    "pypi".to_string()
}

/// Static capability descriptor for one backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    pub lock_files: bool,
    pub dependency_groups: bool,
    pub parallel_install: bool,
    pub editable_installs: bool,
    pub workspace: bool,
    pub pyproject_sync: bool,
    pub max_parallel_jobs: u8,
    pub performance_score: u8,
    /// Source-file formats this backend can drive a create/install/sync
    /// from, e.g. `requirements.txt` for pip, `pyproject.toml` + `uv.lock`
    /// for uv.
    pub supported_formats: Vec<SourceFileType>,
}

/// One package a backend reports as having a newer version available.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutdatedPackage {
    pub name: String,
    pub current_version: String,
    pub latest_version: String,
}

/// One severity-tagged entry in a [`crate::diagnostic::DiagnosticReport`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    Info,
    Warning,
    Error,
    Critical,
}
