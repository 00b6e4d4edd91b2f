//! The uniform error type returned by every public operation.
//!
//! Each subsystem defines its own narrow error enum (one per fallible
//! module, in the style of the rest of this crate) and those are lifted
//! into [`GestvenvError`] at the `lifecycle`/`manager` boundary, so callers
//! only ever have to match on one type.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::platform_adapter::{PermissionCheckError, PlatformError};
use crate::registry::RegistryError;

/// The single error type returned from the public API.
#[derive(Debug, thiserror::Error)]
pub enum GestvenvError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// An input (name, version string, requirement, path) failed the stated
/// regex or range check. Never surfaces from deeper layers: validation
/// always happens before any filesystem mutation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("environment name {0:?} is empty")]
    EmptyName(String),
    #[error("environment name {0:?} is longer than 100 characters")]
    NameTooLong(String),
    #[error(
        "environment name {0:?} contains characters other than letters, digits, '.', '_' and '-'"
    )]
    InvalidNameCharacters(String),
    #[error("environment name {0:?} is a reserved name")]
    ReservedName(String),
    #[error("{0:?} is not a valid Python version (expected e.g. \"3.11\" or \"3.11.4\")")]
    InvalidPythonVersion(String),
    #[error("Python {0} is older than the minimum supported version 3.6")]
    PythonVersionTooOld(String),
    #[error("{0:?} is not a valid dependency group name")]
    InvalidGroupName(String),
    #[error("{0:?} is not a syntactically valid requirement string")]
    InvalidRequirement(String),
    #[error("requirement {0:?} contains a disallowed shell metacharacter")]
    UnsafeRequirement(String),
    #[error("path {0:?} already exists")]
    PathAlreadyExists(PathBuf),
}

/// An interpreter, environment, or cache entry requested by name/path does
/// not exist.
#[derive(Debug, thiserror::Error)]
pub enum NotFoundError {
    #[error("no environment named {0:?} is registered")]
    Environment(String),
    #[error("no interpreter could be resolved for {0:?}")]
    Interpreter(String),
    #[error("no cached artifact for {name} {version}", version = .version.as_deref().unwrap_or("(any version)"))]
    CacheEntry { name: String, version: Option<String> },
    #[error("no cached requirements document with id {0:?}")]
    CachedRequirements(String),
}

/// An installer subprocess exited non-zero, timed out, or was unavailable.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend {backend:?} is not available on this machine")]
    Unavailable { backend: String },
    #[error("backend {backend:?} does not implement {operation}")]
    NotSupported { backend: String, operation: &'static str },
    #[error("backend {backend:?} exited with a non-zero status while running {operation}: {stderr_tail:?}")]
    NonZeroExit {
        backend: String,
        operation: String,
        stderr_tail: String,
    },
    #[error("backend {backend:?} timed out after {timeout:?} while running {operation}")]
    Timeout {
        backend: String,
        operation: String,
        timeout: Duration,
    },
    #[error("no backend is available that satisfies the request")]
    NoBackendAvailable,
    #[error("failed to spawn backend {backend:?}: {source}")]
    Spawn {
        backend: String,
        #[source]
        source: std::io::Error,
    },
}

/// A cached artifact's SHA-256 did not match, the registry or index failed
/// to parse, or a required on-disk file was missing.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("cached artifact for {name} {version} failed SHA-256 verification")]
    HashMismatch { name: String, version: String },
    #[error("registry file at {0:?} could not be parsed; a backup was written")]
    RegistryCorrupted(PathBuf),
    #[error("cache index at {0:?} could not be parsed; a backup was written")]
    CacheIndexCorrupted(PathBuf),
    #[error("required file {0:?} is missing")]
    MissingFile(PathBuf),
}

/// A filesystem probe reported missing read/write rights, or the caller
/// attempted a destructive operation against a protected path.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("insufficient permissions on {path:?}: {detail}")]
    Insufficient { path: PathBuf, detail: String },
    #[error("refusing to delete {0:?}: it is a protected system directory")]
    ProtectedPath(PathBuf),
    #[error("refusing to delete {0:?}: it is not a recognized environment directory")]
    NotAnEnvironment(PathBuf),
}

impl From<RegistryError> for GestvenvError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NotFound(name) => Self::NotFound(NotFoundError::Environment(name)),
            RegistryError::AlreadyExists(name) => {
                Self::Validation(ValidationError::PathAlreadyExists(PathBuf::from(name)))
            }
            RegistryError::Corrupted(path) => {
                Self::Integrity(IntegrityError::RegistryCorrupted(path))
            }
            RegistryError::Io(source) => {
                Self::Integrity(IntegrityError::MissingFile(source.path))
            }
        }
    }
}

impl From<CacheError> for GestvenvError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::HashMismatch { name, version } => {
                Self::Integrity(IntegrityError::HashMismatch { name, version })
            }
            CacheError::IndexCorrupted(path) => {
                Self::Integrity(IntegrityError::CacheIndexCorrupted(path))
            }
            CacheError::Io(source) => Self::Integrity(IntegrityError::MissingFile(source.path)),
        }
    }
}

impl From<PlatformError> for GestvenvError {
    fn from(error: PlatformError) -> Self {
        match error {
            PlatformError::NotFound(what) => Self::NotFound(NotFoundError::Interpreter(what)),
            PlatformError::Permission(source) => Self::Permission(source),
            PlatformError::Io(source) => Self::Integrity(IntegrityError::MissingFile(source.path)),
        }
    }
}

impl From<PermissionCheckError> for GestvenvError {
    fn from(error: PermissionCheckError) -> Self {
        Self::Permission(PermissionError::Insufficient {
            path: error.path,
            detail: error.io_error.to_string(),
        })
    }
}

/// An I/O error tied to the path that triggered it, used throughout the
/// crate's narrower error enums so the top-level error can report it.
#[derive(Debug)]
pub struct PathIoError {
    pub path: PathBuf,
    pub io_error: std::io::Error,
}

impl fmt::Display for PathIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I/O error at {:?}: {}", self.path, self.io_error)
    }
}

impl std::error::Error for PathIoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.io_error)
    }
}
