//! Content-addressed local package cache: a filesystem store of artifact
//! files under `packages/<name>/` plus a JSON index recording hashes,
//! usage statistics and declared dependencies.
//!
//! Layout under the cache root:
//! ```text
//! packages/<package_name>/<package_name>-<version>.<ext>
//! metadata/index.json
//! requirements/<sha256>.txt
//! temp/
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::error::PathIoError;

const KNOWN_EXTENSIONS: [&str; 5] = [".tar.gz", ".whl", ".zip", ".tar", ".gz"];

/// The on-disk index document, shaped `{ "_metadata": {...}, "<name>": {
/// "versions": { "<version>": Entry } } }`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct IndexDocument {
    #[serde(rename = "_metadata")]
    metadata: IndexMetadata,
    #[serde(flatten)]
    packages: BTreeMap<String, PackageVersions>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct IndexMetadata {
    schema_version: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct PackageVersions {
    versions: BTreeMap<String, CacheEntry>,
}

/// One cached artifact, keyed by `(package_name, version)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub hash: String,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used: OffsetDateTime,
    pub usage_count: u64,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub original_filename: String,
    #[serde(default)]
    pub corrupted: bool,
}

/// The result of [`CacheStore::verify_integrity`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub missing: Vec<(String, String)>,
    pub hash_mismatches: Vec<(String, String)>,
    pub orphan_files: Vec<PathBuf>,
}

/// A filesystem-resident, content-addressed package cache.
pub struct CacheStore {
    root: PathBuf,
    index_path: PathBuf,
    document: IndexDocument,
}

impl CacheStore {
    /// Open (creating if absent) the cache rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, CacheError> {
        for subdir in ["packages", "metadata", "requirements", "temp"] {
            fs::create_dir_all(root.join(subdir)).map_err(|io_error| {
                CacheError::Io(PathIoError {
                    path: root.join(subdir),
                    io_error,
                })
            })?;
        }

        let index_path = root.join("metadata").join("index.json");
        let document = match fs::read_to_string(&index_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(document) => document,
                Err(error) => {
                    log::warn!(
                        "cache index at {index_path:?} could not be parsed ({error}); backing it up and starting empty"
                    );
                    let _ = fs::copy(&index_path, index_path.with_extension("json.bak"));
                    IndexDocument::default()
                }
            },
            Err(_) => IndexDocument::default(),
        };

        Ok(Self {
            root: root.to_path_buf(),
            index_path,
            document,
        })
    }

    /// Copy `artifact_path` into the cache under `packages/<name>/`,
    /// compute its SHA-256, and record (or overwrite) the index entry.
    pub fn add(
        &mut self,
        artifact_path: &Path,
        name: &str,
        version: &str,
        declared_deps: &[String],
    ) -> Result<(), CacheError> {
        let original_filename = artifact_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let package_dir = self.root.join("packages").join(name);
        fs::create_dir_all(&package_dir).map_err(|io_error| {
            CacheError::Io(PathIoError {
                path: package_dir.clone(),
                io_error,
            })
        })?;

        let dest_path = package_dir.join(format!(
            "{name}-{version}{ext}",
            ext = filename_extension(&original_filename)
        ));
        fs::copy(artifact_path, &dest_path).map_err(|io_error| {
            CacheError::Io(PathIoError {
                path: dest_path.clone(),
                io_error,
            })
        })?;

        let hash = hash_file(&dest_path)?;
        let size = fs::metadata(&dest_path)
            .map_err(|io_error| {
                CacheError::Io(PathIoError {
                    path: dest_path.clone(),
                    io_error,
                })
            })?
            .len();

        let now = OffsetDateTime::now_utc();
        let relative_path = dest_path
            .strip_prefix(&self.root)
            .unwrap_or(&dest_path)
            .to_path_buf();

        let entry = CacheEntry {
            path: relative_path,
            hash,
            size,
            added_at: now,
            last_used: now,
            usage_count: 0,
            dependencies: declared_deps.to_vec(),
            original_filename,
            corrupted: false,
        };

        self.document
            .packages
            .entry(name.to_string())
            .or_default()
            .versions
            .insert(version.to_string(), entry);

        self.persist()
    }

    /// Return the cached artifact's absolute path, updating usage stats on
    /// a hit. With `version` absent, selects the latest dotted-numeric
    /// version; entries whose version does not parse as dotted-numeric are
    /// excluded from that selection (but remain reachable by exact lookup).
    pub fn get(&mut self, name: &str, version: Option<&str>) -> Option<PathBuf> {
        let version = match version {
            Some(version) => version.to_string(),
            None => self.latest_version(name)?,
        };

        let absolute_path = {
            let entry = self.document.packages.get(name)?.versions.get(&version)?;
            self.root.join(&entry.path)
        };

        if !absolute_path.exists() {
            return None;
        }
        if hash_file(&absolute_path).ok().as_deref() != self.entry_hash(name, &version) {
            return None;
        }

        if let Some(entry) = self
            .document
            .packages
            .get_mut(name)
            .and_then(|versions| versions.versions.get_mut(&version))
        {
            entry.usage_count += 1;
            entry.last_used = OffsetDateTime::now_utc();
        }
        let _ = self.persist();

        Some(absolute_path)
    }

    fn entry_hash(&self, name: &str, version: &str) -> Option<&str> {
        self.document
            .packages
            .get(name)?
            .versions
            .get(version)
            .map(|entry| entry.hash.as_str())
    }

    /// Read-only lookup, without mutating usage statistics.
    #[must_use]
    pub fn has(&self, name: &str, version: Option<&str>) -> bool {
        match version {
            Some(version) => self
                .document
                .packages
                .get(name)
                .is_some_and(|versions| versions.versions.contains_key(version)),
            None => self.latest_version(name).is_some(),
        }
    }

    fn latest_version(&self, name: &str) -> Option<String> {
        self.document
            .packages
            .get(name)?
            .versions
            .keys()
            .filter_map(|version| parse_dotted_numeric(version).map(|key| (key, version)))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, version)| version.clone())
    }

    /// Remove one version, or every version, of `name`. Returns the number
    /// of entries removed and the bytes freed.
    pub fn remove(&mut self, name: &str, version: Option<&str>) -> Result<(u32, u64), CacheError> {
        let Some(versions) = self.document.packages.get_mut(name) else {
            return Ok((0, 0));
        };

        let mut removed = 0u32;
        let mut bytes_freed = 0u64;

        let to_remove: Vec<String> = match version {
            Some(version) => vec![version.to_string()],
            None => versions.versions.keys().cloned().collect(),
        };

        for version in to_remove {
            if let Some(entry) = versions.versions.remove(&version) {
                let absolute_path = self.root.join(&entry.path);
                if absolute_path.exists() {
                    fs::remove_file(&absolute_path).map_err(|io_error| {
                        CacheError::Io(PathIoError {
                            path: absolute_path.clone(),
                            io_error,
                        })
                    })?;
                }
                bytes_freed += entry.size;
                removed += 1;
            }
        }

        if versions.versions.is_empty() {
            self.document.packages.remove(name);
            let package_dir = self.root.join("packages").join(name);
            let _ = fs::remove_dir(package_dir);
        }

        self.persist()?;
        Ok((removed, bytes_freed))
    }

    /// Evict candidates until the cache's total size is within
    /// `max_size_mb`. Only entries older than `max_age_days`, from
    /// packages with more than `keep_min_versions` versions, are eligible;
    /// eligible entries are scored `age_days / max(usage_count, 1)` and
    /// evicted highest-score first.
    pub fn clean(
        &mut self,
        max_age_days: u64,
        max_size_mb: u64,
        keep_min_versions: usize,
    ) -> (usize, u64) {
        let max_size_bytes = max_size_mb * 1024 * 1024;
        let now = OffsetDateTime::now_utc();

        let mut total_size: u64 = self
            .document
            .packages
            .values()
            .flat_map(|versions| versions.versions.values())
            .map(|entry| entry.size)
            .sum();

        if total_size <= max_size_bytes {
            return (0, 0);
        }

        let mut candidates: Vec<(String, String, f64)> = Vec::new();
        for (name, versions) in &self.document.packages {
            if versions.versions.len() <= keep_min_versions {
                continue;
            }
            for (version, entry) in &versions.versions {
                let age_days = (now - entry.added_at).whole_days().max(0) as u64;
                if age_days <= max_age_days {
                    continue;
                }
                let score = age_days as f64 / entry.usage_count.max(1) as f64;
                candidates.push((name.clone(), version.clone(), score));
            }
        }
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut removed_count = 0usize;
        let mut bytes_freed = 0u64;
        for (name, version, _score) in candidates {
            if total_size <= max_size_bytes {
                break;
            }
            if let Some(versions) = self.document.packages.get(&name) {
                if versions.versions.len() <= keep_min_versions {
                    continue;
                }
            }
            if let Ok((count, freed)) = self.remove(&name, Some(version.as_str())) {
                removed_count += count as usize;
                bytes_freed += freed;
                total_size = total_size.saturating_sub(freed);
            }
        }

        (removed_count, bytes_freed)
    }

    /// Check every index entry's file presence and hash, flagging
    /// mismatches, and report files under `packages/` the index does not
    /// reference.
    pub fn verify_integrity(&mut self) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        let mut referenced: std::collections::HashSet<PathBuf> = std::collections::HashSet::new();

        for (name, versions) in &mut self.document.packages {
            for (version, entry) in &mut versions.versions {
                let absolute_path = self.root.join(&entry.path);
                referenced.insert(absolute_path.clone());

                if !absolute_path.exists() {
                    report.missing.push((name.clone(), version.clone()));
                    entry.corrupted = true;
                    continue;
                }
                match hash_file(&absolute_path) {
                    Ok(hash) if hash == entry.hash => entry.corrupted = false,
                    _ => {
                        report
                            .hash_mismatches
                            .push((name.clone(), version.clone()));
                        entry.corrupted = true;
                    }
                }
            }
        }

        let packages_dir = self.root.join("packages");
        for entry in walkdir::WalkDir::new(&packages_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
        {
            if !referenced.contains(entry.path()) {
                report.orphan_files.push(entry.path().to_path_buf());
            }
        }

        let _ = self.persist();
        report
    }

    /// Rebuild the index from scratch by scanning `packages/`, preserving
    /// prior usage statistics where the same `(name, version)` still
    /// exists.
    pub fn rebuild_index(&mut self) -> Result<(), CacheError> {
        let previous = std::mem::take(&mut self.document.packages);
        let mut rebuilt: BTreeMap<String, PackageVersions> = BTreeMap::new();

        let packages_dir = self.root.join("packages");
        for entry in walkdir::WalkDir::new(&packages_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
        {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let (name, version) = parse_package_filename(&filename);

            let hash = hash_file(entry.path())?;
            let size = entry
                .metadata()
                .map_err(|error| {
                    CacheError::Io(PathIoError {
                        path: entry.path().to_path_buf(),
                        io_error: error.into_io_error().unwrap_or_else(|| {
                            std::io::Error::other("failed to read file metadata")
                        }),
                    })
                })?
                .len();
            let relative_path = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_path_buf();

            let previous_entry = previous
                .get(&name)
                .and_then(|versions| versions.versions.get(&version));

            let now = OffsetDateTime::now_utc();
            let new_entry = CacheEntry {
                path: relative_path,
                hash,
                size,
                added_at: previous_entry.map_or(now, |entry| entry.added_at),
                last_used: previous_entry.map_or(now, |entry| entry.last_used),
                usage_count: previous_entry.map_or(0, |entry| entry.usage_count),
                dependencies: previous_entry.map_or_else(Vec::new, |entry| entry.dependencies.clone()),
                original_filename: filename,
                corrupted: false,
            };

            rebuilt
                .entry(name)
                .or_default()
                .versions
                .insert(version, new_entry);
        }

        self.document.packages = rebuilt;
        self.persist()
    }

    /// Store a requirements document, keyed by the SHA-256 of its content.
    pub fn cache_requirements(&self, content: &str) -> Result<String, CacheError> {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let id = hex::encode(hasher.finalize());

        let path = self.root.join("requirements").join(format!("{id}.txt"));
        fs::write(&path, content).map_err(|io_error| {
            CacheError::Io(PathIoError {
                path: path.clone(),
                io_error,
            })
        })?;

        Ok(id)
    }

    /// Retrieve a previously cached requirements document by id.
    #[must_use]
    pub fn get_cached_requirements(&self, id: &str) -> Option<String> {
        let path = self.root.join("requirements").join(format!("{id}.txt"));
        fs::read_to_string(path).ok()
    }

    /// Write a zip archive of the index (and, if requested, every
    /// referenced artifact) to `dest`.
    pub fn export_cache(&self, dest: &Path, include_artifacts: bool) -> Result<(), CacheError> {
        let file = fs::File::create(dest).map_err(|io_error| {
            CacheError::Io(PathIoError {
                path: dest.to_path_buf(),
                io_error,
            })
        })?;
        let mut writer = zip::ZipWriter::new(file);
        let options =
            zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let serialized = serde_json::to_vec_pretty(&self.document).map_err(|_| {
            CacheError::IndexCorrupted(self.index_path.clone())
        })?;
        writer
            .start_file("metadata/index.json", options)
            .map_err(|error| zip_error(dest, error))?;
        writer
            .write_all(&serialized)
            .map_err(|io_error| CacheError::Io(PathIoError { path: dest.to_path_buf(), io_error }))?;

        if include_artifacts {
            for versions in self.document.packages.values() {
                for entry in versions.versions.values() {
                    let absolute_path = self.root.join(&entry.path);
                    let Ok(mut source) = fs::File::open(&absolute_path) else {
                        continue;
                    };
                    let archive_name = entry.path.to_string_lossy().replace('\\', "/");
                    writer
                        .start_file(archive_name, options)
                        .map_err(|error| zip_error(dest, error))?;
                    let mut buffer = Vec::new();
                    source.read_to_end(&mut buffer).map_err(|io_error| {
                        CacheError::Io(PathIoError {
                            path: absolute_path.clone(),
                            io_error,
                        })
                    })?;
                    writer.write_all(&buffer).map_err(|io_error| {
                        CacheError::Io(PathIoError {
                            path: dest.to_path_buf(),
                            io_error,
                        })
                    })?;
                }
            }
        }

        writer
            .finish()
            .map_err(|error| zip_error(dest, error))?;
        Ok(())
    }

    /// Import a zip archive produced by [`Self::export_cache`], merging
    /// into (or replacing) the current index and extracting any artifacts
    /// it contains.
    pub fn import_cache(&mut self, src: &Path, merge: bool) -> Result<(), CacheError> {
        let file = fs::File::open(src).map_err(|io_error| {
            CacheError::Io(PathIoError {
                path: src.to_path_buf(),
                io_error,
            })
        })?;
        let mut archive = zip::ZipArchive::new(file).map_err(|error| zip_error(src, error))?;

        let mut imported_index: Option<IndexDocument> = None;
        for index in 0..archive.len() {
            let mut zip_entry = archive.by_index(index).map_err(|error| zip_error(src, error))?;
            let name = zip_entry.name().to_string();

            let mut buffer = Vec::new();
            zip_entry.read_to_end(&mut buffer).map_err(|io_error| {
                CacheError::Io(PathIoError {
                    path: src.to_path_buf(),
                    io_error,
                })
            })?;

            if name == "metadata/index.json" {
                imported_index = serde_json::from_slice(&buffer).ok();
                continue;
            }

            let dest_path = self.root.join(&name);
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent).map_err(|io_error| {
                    CacheError::Io(PathIoError {
                        path: parent.to_path_buf(),
                        io_error,
                    })
                })?;
            }
            fs::write(&dest_path, &buffer).map_err(|io_error| {
                CacheError::Io(PathIoError {
                    path: dest_path.clone(),
                    io_error,
                })
            })?;
        }

        if let Some(imported) = imported_index {
            if merge {
                for (name, versions) in imported.packages {
                    self.document
                        .packages
                        .entry(name)
                        .or_default()
                        .versions
                        .extend(versions.versions);
                }
            } else {
                self.document.packages = imported.packages;
            }
        }

        self.persist()
    }

    fn persist(&self) -> Result<(), CacheError> {
        let serialized = serde_json::to_string_pretty(&self.document)
            .map_err(|_| CacheError::IndexCorrupted(self.index_path.clone()))?;

        let _ = fs::copy(&self.index_path, self.index_path.with_extension("json.bak"));

        let temp_path = self.index_path.with_extension("json.tmp");
        fs::write(&temp_path, serialized).map_err(|io_error| {
            CacheError::Io(PathIoError {
                path: temp_path.clone(),
                io_error,
            })
        })?;
        fs::rename(&temp_path, &self.index_path).map_err(|io_error| {
            CacheError::Io(PathIoError {
                path: self.index_path.clone(),
                io_error,
            })
        })
    }
}

fn zip_error(path: &Path, error: impl std::fmt::Display) -> CacheError {
    CacheError::Io(PathIoError {
        path: path.to_path_buf(),
        io_error: std::io::Error::other(error.to_string()),
    })
}

fn hash_file(path: &Path) -> Result<String, CacheError> {
    let mut file = fs::File::open(path).map_err(|io_error| {
        CacheError::Io(PathIoError {
            path: path.to_path_buf(),
            io_error,
        })
    })?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|io_error| {
        CacheError::Io(PathIoError {
            path: path.to_path_buf(),
            io_error,
        })
    })?;
    Ok(hex::encode(hasher.finalize()))
}

fn filename_extension(filename: &str) -> &'static str {
    for ext in KNOWN_EXTENSIONS {
        if filename.ends_with(ext) {
            return match ext {
                ".tar.gz" => ".tar.gz",
                ".whl" => ".whl",
                ".zip" => ".zip",
                ".tar" => ".tar",
                _ => ".gz",
            };
        }
    }
    ""
}

/// Strip the longest known archive extension, split the remaining stem on
/// `-`, and treat the first token that looks like a dotted-numeric version
/// as the version; the tokens before it join (with `-`) to form the
/// package name. If no token looks like a version, the whole stem is the
/// name and the version is `"unknown"`.
fn parse_package_filename(filename: &str) -> (String, String) {
    let stem = strip_known_extension(filename);
    let tokens: Vec<&str> = stem.split('-').collect();

    match tokens.iter().position(|token| token_looks_like_version(token)) {
        Some(index) => {
            let name = tokens[..index].join("-");
            (name, tokens[index].to_string())
        }
        None => (stem.to_string(), "unknown".to_string()),
    }
}

fn strip_known_extension(filename: &str) -> &str {
    for ext in KNOWN_EXTENSIONS {
        if let Some(stem) = filename.strip_suffix(ext) {
            return stem;
        }
    }
    filename
}

fn token_looks_like_version(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit())
}

/// Parse a version string into comparable dotted-numeric components,
/// returning `None` if any component does not start with a digit run.
fn parse_dotted_numeric(version: &str) -> Option<Vec<u64>> {
    version
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                None
            } else {
                digits.parse().ok()
            }
        })
        .collect()
}

/// Errors raised by [`CacheStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cached artifact for {name} {version} failed integrity verification")]
    HashMismatch { name: String, version: String },
    #[error("cache index at {0:?} is corrupted")]
    IndexCorrupted(PathBuf),
    #[error(transparent)]
    Io(#[from] PathIoError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sdist_filename() {
        assert_eq!(
            parse_package_filename("requests-2.31.0.tar.gz"),
            ("requests".to_string(), "2.31.0".to_string())
        );
    }

    #[test]
    fn parses_wheel_filename() {
        assert_eq!(
            parse_package_filename("numpy-1.26.4-cp311-cp311-manylinux2014_x86_64.whl"),
            ("numpy".to_string(), "1.26.4".to_string())
        );
    }

    #[test]
    fn falls_back_to_unknown_version() {
        assert_eq!(
            parse_package_filename("some-weird-package.tar"),
            ("some-weird-package".to_string(), "unknown".to_string())
        );
    }

    #[test]
    fn add_then_get_round_trips_and_tracks_usage() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("src");
        fs::create_dir_all(&artifact_dir).unwrap();
        let artifact = artifact_dir.join("requests-2.31.0.tar.gz");
        fs::write(&artifact, b"fake wheel contents").unwrap();

        let mut cache = CacheStore::open(&dir.path().join("cache")).unwrap();
        cache
            .add(&artifact, "requests", "2.31.0", &["urllib3".to_string()])
            .unwrap();

        assert!(cache.has("requests", Some("2.31.0")));
        let path = cache.get("requests", None).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn get_with_missing_version_falls_back_to_latest_numeric() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheStore::open(&dir.path().join("cache")).unwrap();

        for version in ["1.0.0", "2.0.0", "1.5.0"] {
            let artifact = dir.path().join(format!("demo-{version}.tar.gz"));
            fs::write(&artifact, b"x").unwrap();
            cache.add(&artifact, "demo", version, &[]).unwrap();
        }

        let path = cache.get("demo", None).unwrap();
        assert!(path.to_string_lossy().contains("2.0.0"));
    }

    #[test]
    fn remove_frees_bytes_and_cleans_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("demo-1.0.0.tar.gz");
        fs::write(&artifact, b"0123456789").unwrap();

        let mut cache = CacheStore::open(&dir.path().join("cache")).unwrap();
        cache.add(&artifact, "demo", "1.0.0", &[]).unwrap();

        let (removed, bytes_freed) = cache.remove("demo", Some("1.0.0")).unwrap();

        assert_eq!(removed, 1);
        assert_eq!(bytes_freed, 10);
        assert!(!cache.has("demo", Some("1.0.0")));
    }

    #[test]
    fn verify_integrity_flags_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("demo-1.0.0.tar.gz");
        fs::write(&artifact, b"contents").unwrap();

        let mut cache = CacheStore::open(&dir.path().join("cache")).unwrap();
        cache.add(&artifact, "demo", "1.0.0", &[]).unwrap();

        let cached_path = cache.root.join("packages/demo/demo-1.0.0.tar.gz");
        fs::remove_file(&cached_path).unwrap();

        let report = cache.verify_integrity();
        assert_eq!(report.missing, vec![("demo".to_string(), "1.0.0".to_string())]);
    }

    #[test]
    fn cache_requirements_round_trips_by_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(&dir.path().join("cache")).unwrap();

        let id = cache.cache_requirements("requests==2.31.0\n").unwrap();

        assert_eq!(
            cache.get_cached_requirements(&id).as_deref(),
            Some("requests==2.31.0\n")
        );
    }

    #[test]
    fn export_then_import_preserves_index() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("demo-1.0.0.tar.gz");
        fs::write(&artifact, b"contents").unwrap();

        let mut source = CacheStore::open(&dir.path().join("source-cache")).unwrap();
        source.add(&artifact, "demo", "1.0.0", &[]).unwrap();

        let archive_path = dir.path().join("export.zip");
        source.export_cache(&archive_path, true).unwrap();

        let mut destination = CacheStore::open(&dir.path().join("dest-cache")).unwrap();
        destination.import_cache(&archive_path, false).unwrap();

        assert!(destination.has("demo", Some("1.0.0")));
    }

    #[test]
    fn clean_evicts_old_rarely_used_entries_before_young_hot_ones() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheStore::open(&dir.path().join("cache")).unwrap();

        let megabyte = 1024 * 1024;
        let old_artifact = dir.path().join("old_rare-1.0.0.tar.gz");
        fs::write(&old_artifact, vec![0u8; 2 * megabyte]).unwrap();
        cache.add(&old_artifact, "old_rare", "1.0.0", &[]).unwrap();

        let young_artifact = dir.path().join("young_hot-1.0.0.tar.gz");
        fs::write(&young_artifact, vec![0u8; 2 * megabyte]).unwrap();
        cache.add(&young_artifact, "young_hot", "1.0.0", &[]).unwrap();

        let now = OffsetDateTime::now_utc();
        {
            let entry = cache
                .document
                .packages
                .get_mut("old_rare")
                .unwrap()
                .versions
                .get_mut("1.0.0")
                .unwrap();
            entry.added_at = now - time::Duration::days(120);
            entry.usage_count = 1;
        }
        {
            let entry = cache
                .document
                .packages
                .get_mut("young_hot")
                .unwrap()
                .versions
                .get_mut("1.0.0")
                .unwrap();
            entry.added_at = now - time::Duration::days(10);
            entry.usage_count = 50;
        }

        let (removed, _freed) = cache.clean(0, 3, 0);

        assert_eq!(removed, 1);
        assert!(!cache.has("old_rare", Some("1.0.0")));
        assert!(cache.has("young_hot", Some("1.0.0")));
    }

    #[test]
    fn clean_under_budget_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheStore::open(&dir.path().join("cache")).unwrap();
        let artifact = dir.path().join("demo-1.0.0.tar.gz");
        fs::write(&artifact, b"tiny").unwrap();
        cache.add(&artifact, "demo", "1.0.0", &[]).unwrap();

        let (removed, freed) = cache.clean(0, 5000, 0);

        assert_eq!((removed, freed), (0, 0));
        assert!(cache.has("demo", Some("1.0.0")));
    }

    #[test]
    fn get_on_externally_deleted_artifact_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheStore::open(&dir.path().join("cache")).unwrap();
        let artifact = dir.path().join("demo-1.0.0.tar.gz");
        fs::write(&artifact, b"contents").unwrap();
        cache.add(&artifact, "demo", "1.0.0", &[]).unwrap();

        let cached_path = cache.get("demo", Some("1.0.0")).unwrap();
        fs::remove_file(&cached_path).unwrap();

        assert!(cache.get("demo", Some("1.0.0")).is_none());
    }
}
