//! Project description (`.mf.json`)
//!
//! The project file names the target bucket, the repository's semantic
//! name, and the components whose build artifacts get published. Input is
//! untrusted: parsing is followed by an explicit validation pass that
//! either yields a typed [`Project`] or a list of field-level issues —
//! invalid input is never silently coerced.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex_lite::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::asset::AssetSpec;

/// Default project file name, looked up in the root directory
pub const DEFAULT_CONFIG_FILE_NAME: &str = ".mf.json";

/// Identifier-safe character set for component names
const COMPONENT_NAME_PATTERN: &str = "^[-a-zA-Z0-9_]+$";

/// Errors for loading and validating the project description
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid project config: {}", format_issues(.0))]
    Invalid(Vec<FieldIssue>),
}

/// A single validation failure, anchored to the field that caused it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// Dotted path of the offending field
    pub path: String,
    /// What is wrong with it
    pub message: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn format_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(FieldIssue::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Raw, unvalidated project file contents
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub bucket: String,
    pub repository: String,
    pub components: BTreeMap<String, ComponentConfig>,
}

/// One component definition from the project file
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub assets: Vec<AssetSpec>,
}

impl ProjectConfig {
    /// Check every field against the schema, collecting all issues
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name_pattern =
            Regex::new(COMPONENT_NAME_PATTERN).expect("component name pattern is valid");
        let mut issues = Vec::new();

        if self.bucket.is_empty() {
            issues.push(FieldIssue {
                path: "bucket".to_string(),
                message: "must be a non-empty string".to_string(),
            });
        }
        if self.repository.is_empty() {
            issues.push(FieldIssue {
                path: "repository".to_string(),
                message: "must be a non-empty string".to_string(),
            });
        }

        for (name, component) in &self.components {
            if !name_pattern.is_match(name) {
                issues.push(FieldIssue {
                    path: format!("components.{name}"),
                    message: format!("name must match {COMPONENT_NAME_PATTERN}"),
                });
            }
            if component.kind.is_empty() {
                issues.push(FieldIssue {
                    path: format!("components.{name}.type"),
                    message: "must be a non-empty string".to_string(),
                });
            }
            for (idx, spec) in component.assets.iter().enumerate() {
                if spec.glob.is_empty() {
                    issues.push(FieldIssue {
                        path: format!("components.{name}.assets[{idx}].glob"),
                        message: "must be a non-empty pattern".to_string(),
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }
}

/// A validated project description bound to its root directory
#[derive(Debug, Clone)]
pub struct Project {
    bucket: String,
    repository: String,
    components: Vec<Component>,
    root: PathBuf,
}

/// A named unit of the repository producing one or more build artifacts
#[derive(Debug, Clone)]
pub struct Component {
    pub name: String,
    pub kind: String,
    pub assets: Vec<AssetSpec>,
}

impl Project {
    /// Validate a parsed config and bind it to a root directory
    pub fn from_config(config: ProjectConfig, root: PathBuf) -> Result<Self, ConfigError> {
        config.validate()?;
        let components = config
            .components
            .into_iter()
            .map(|(name, component)| Component {
                name,
                kind: component.kind,
                assets: component.assets,
            })
            .collect();
        Ok(Self {
            bucket: config.bucket,
            repository: config.repository,
            components,
            root,
        })
    }

    /// Parse and validate a JSON string, binding it to a root directory
    pub fn from_json(json: &str, root: PathBuf) -> Result<Self, ConfigError> {
        let config: ProjectConfig = serde_json::from_str(json)?;
        Self::from_config(config, root)
    }

    /// Load the project file from disk
    ///
    /// Reads `explicit` when given, otherwise `{root}/.mf.json`.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => root.join(DEFAULT_CONFIG_FILE_NAME),
        };
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }

        debug!("loading project config from {}", path.display());
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_json(&contents, root.to_path_buf())
    }

    /// Target bucket for all artifacts and the manifest
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Repository semantic name, the manifest's key prefix
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Components in name order
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Directory asset globs are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(components: &str) -> String {
        format!(r#"{{"bucket": "a_bucket", "repository": "a_repo", "components": {components}}}"#)
    }

    #[test]
    fn test_parse_minimal_config() {
        let project = Project::from_json(&minimal("{}"), PathBuf::from(".")).unwrap();
        assert_eq!(project.bucket(), "a_bucket");
        assert_eq!(project.repository(), "a_repo");
        assert!(project.components().is_empty());
    }

    #[test]
    fn test_valid_component_names() {
        for name in [
            "validName",
            "valid_name",
            "valid-name",
            "VALIDNAME",
            "validname",
            "00001name",
            "name007",
        ] {
            let json = minimal(&format!(
                r#"{{"{name}": {{"type": "a_type", "assets": []}}}}"#
            ));
            let project = Project::from_json(&json, PathBuf::from(".")).unwrap();
            assert_eq!(project.components().len(), 1, "name {name} should be valid");
        }
    }

    #[test]
    fn test_invalid_component_name() {
        let json = minimal(r#"{"invalid name": {"type": "a_type", "assets": []}}"#);
        let err = Project::from_json(&json, PathBuf::from(".")).unwrap_err();
        match err {
            ConfigError::Invalid(issues) => {
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].path, "components.invalid name");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_all_issues_collected() {
        let json = r#"{"bucket": "", "repository": "", "components":
            {"ok": {"type": "", "assets": [{"glob": ""}]}}}"#;
        let err = Project::from_json(json, PathBuf::from(".")).unwrap_err();
        match err {
            ConfigError::Invalid(issues) => assert_eq!(issues.len(), 4),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_zip_flag_defaults_to_false() {
        let json = minimal(
            r#"{"spark": {"type": "some", "assets": [{"glob": "**/*.jar"}, {"glob": "conf/**", "zip": true}]}}"#,
        );
        let project = Project::from_json(&json, PathBuf::from(".")).unwrap();
        let specs = &project.components()[0].assets;
        assert!(!specs[0].zip);
        assert!(specs[1].zip);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Project::load(dir.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE_NAME),
            minimal(r#"{"spark": {"type": "some", "assets": []}}"#),
        )
        .unwrap();

        let project = Project::load(dir.path(), None).unwrap();
        assert_eq!(project.root(), dir.path());
        assert_eq!(project.components()[0].name, "spark");
    }
}
