//! Parses a `pyproject.toml`'s PEP 621 `[project]` table (plus
//! `[build-system]` and raw `[tool.*]` sub-trees) into a
//! [`PyProjectInfo`].

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ValidationError;
use crate::models::PyProjectInfo;

/// Parse `path` into a [`PyProjectInfo`], validating that every
/// dependency string (top-level and per optional-dependency group) is
/// syntactically well formed.
pub fn parse(path: &Path) -> Result<PyProjectInfo, PyProjectError> {
    let contents = std::fs::read_to_string(path).map_err(|io_error| {
        PyProjectError::Io(crate::error::PathIoError {
            path: path.to_path_buf(),
            io_error,
        })
    })?;
    parse_str(&contents, Some(path.to_path_buf()))
}

/// Parse already-loaded `pyproject.toml` content.
pub fn parse_str(contents: &str, source_path: Option<std::path::PathBuf>) -> Result<PyProjectInfo, PyProjectError> {
    let document: toml::Value = contents.parse().map_err(PyProjectError::Toml)?;

    let project = document
        .get("project")
        .and_then(toml::Value::as_table)
        .ok_or(PyProjectError::MissingProjectTable)?;

    let name = project
        .get("name")
        .and_then(toml::Value::as_str)
        .ok_or(PyProjectError::MissingField("name"))?
        .to_string();
    let version = project
        .get("version")
        .and_then(toml::Value::as_str)
        .unwrap_or("0.0.0")
        .to_string();

    let description = string_field(project, "description");
    let requires_python = string_field(project, "requires-python");

    let authors = project
        .get("authors")
        .and_then(toml::Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_table())
                .filter_map(|entry| entry.get("name").and_then(toml::Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let dependencies = string_array(project, "dependencies");
    for requirement in &dependencies {
        validate_requirement_string(requirement)?;
    }

    let mut optional_dependencies = BTreeMap::new();
    if let Some(groups) = project
        .get("optional-dependencies")
        .and_then(toml::Value::as_table)
    {
        for (group, value) in groups {
            let requirements: Vec<String> = value
                .as_array()
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(toml::Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            for requirement in &requirements {
                validate_requirement_string(requirement)?;
            }
            optional_dependencies.insert(group.clone(), requirements);
        }
    }

    let build_system = document
        .get("build-system")
        .and_then(|table| table.get("build-backend"))
        .and_then(toml::Value::as_str)
        .map(str::to_string);

    let tool_sections = document
        .get("tool")
        .and_then(toml::Value::as_table)
        .cloned()
        .unwrap_or_default();

    Ok(PyProjectInfo {
        name,
        version,
        description,
        requires_python,
        authors,
        dependencies,
        optional_dependencies,
        build_system,
        tool_sections,
        source_path,
    })
}

fn string_field(table: &toml::value::Table, key: &str) -> Option<String> {
    table.get(key).and_then(toml::Value::as_str).map(str::to_string)
}

fn string_array(table: &toml::value::Table, key: &str) -> Vec<String> {
    table
        .get(key)
        .and_then(toml::Value::as_array)
        .map(|entries| entries.iter().filter_map(toml::Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// A minimal syntactic check: a requirement string is a package name
/// (letters, digits, `.`, `_`, `-`), optionally followed by an `extras`
/// bracket and/or a version specifier, and must not contain shell
/// metacharacters.
fn validate_requirement_string(requirement: &str) -> Result<(), PyProjectError> {
    let trimmed = requirement.trim();
    if trimmed.is_empty() {
        return Err(PyProjectError::Validation(ValidationError::InvalidRequirement(
            requirement.to_string(),
        )));
    }
    if trimmed.contains([';', '|', '&', '`', '$']) {
        return Err(PyProjectError::Validation(ValidationError::UnsafeRequirement(
            requirement.to_string(),
        )));
    }

    let name_part = trimmed
        .split(|c: char| "=<>!~[ ".contains(c))
        .next()
        .unwrap_or(trimmed);
    let valid_name = !name_part.is_empty()
        && name_part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid_name {
        Ok(())
    } else {
        Err(PyProjectError::Validation(ValidationError::InvalidRequirement(
            requirement.to_string(),
        )))
    }
}

/// Errors raised while parsing a `pyproject.toml`.
#[derive(Debug, thiserror::Error)]
pub enum PyProjectError {
    #[error("failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("pyproject.toml has no [project] table")]
    MissingProjectTable,
    #[error("pyproject.toml's [project] table is missing required field {0:?}")]
    MissingField(&'static str),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Io(#[from] crate::error::PathIoError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[project]
name = "demo"
version = "1.2.3"
description = "A demo project"
requires-python = ">=3.9"
dependencies = ["requests>=2.0", "click"]

[project.optional-dependencies]
dev = ["pytest", "black"]

[build-system]
build-backend = "hatchling.build"

[tool.black]
line-length = 100
"#;

    #[test]
    fn parses_full_project_table() {
        let info = parse_str(SAMPLE, None).unwrap();
        assert_eq!(info.name, "demo");
        assert_eq!(info.version, "1.2.3");
        assert_eq!(info.dependencies, vec!["requests>=2.0", "click"]);
        assert_eq!(
            info.optional_dependencies.get("dev").unwrap(),
            &vec!["pytest".to_string(), "black".to_string()]
        );
        assert_eq!(info.build_system.as_deref(), Some("hatchling.build"));
        assert!(info.tool_sections.contains_key("black"));
    }

    #[test]
    fn missing_project_table_is_an_error() {
        let result = parse_str("[tool.poetry]\nname = \"demo\"\n", None);
        assert!(matches!(result, Err(PyProjectError::MissingProjectTable)));
    }

    #[test]
    fn unsafe_dependency_string_is_rejected() {
        let toml = "[project]\nname = \"demo\"\nversion = \"1.0\"\ndependencies = [\"requests; rm -rf /\"]\n";
        let result = parse_str(toml, None);
        assert!(matches!(
            result,
            Err(PyProjectError::Validation(ValidationError::UnsafeRequirement(_)))
        ));
    }
}
