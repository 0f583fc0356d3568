//! Manifest document model
//!
//! Typed form of the wire format: one JSON document per repository tracking,
//! per branch-slug, the artifacts of the latest successful build. Branch and
//! component maps are ordered so serialized documents are key-stable.
//!
//! ```text
//! { "@spec": 1,
//!   "@ns": { "<branch-slug>": { "@last_success": {
//!       "@built_at": "...", "@rev": "...", "@build_id": "...",
//!       "@include": { "<component>": {
//!           "@type": "...", "@metadata": {},
//!           "@binaries": [ { "@md5": "...", "@ref": "gs://..." } ] } } } } } }
//! ```

mod merge;

pub use merge::{merge, UploadSet};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object name of the manifest inside its repository prefix
pub const MANIFEST_NAME: &str = "manifest.json";

/// Format marker written into newly created documents
pub const MANIFEST_SPEC_VERSION: u32 = 1;

/// Root manifest document
///
/// `@spec` is optional on the wire: documents created before the marker
/// existed round-trip without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "@spec", default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<u32>,

    #[serde(rename = "@ns", default)]
    pub branches: BTreeMap<String, BranchEntry>,
}

impl Manifest {
    /// The empty document a fresh repository starts from
    pub fn empty() -> Self {
        Self {
            spec: Some(MANIFEST_SPEC_VERSION),
            branches: BTreeMap::new(),
        }
    }
}

/// Per-branch slot; holds only the latest successful build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchEntry {
    #[serde(rename = "@last_success")]
    pub last_success: BuildRecord,
}

/// One successful build of one branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// ISO-8601 timestamp, UTC with explicit offset
    #[serde(rename = "@built_at")]
    pub built_at: String,

    /// Source revision, opaque
    #[serde(rename = "@rev")]
    pub rev: String,

    /// Build identifier, opaque
    #[serde(rename = "@build_id")]
    pub build_id: String,

    #[serde(rename = "@include", default)]
    pub include: BTreeMap<String, ComponentEntry>,
}

/// A component's artifacts within one build record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentEntry {
    #[serde(rename = "@type")]
    pub kind: String,

    /// Reserved; currently always empty
    #[serde(rename = "@metadata", default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    #[serde(rename = "@binaries", default)]
    pub binaries: Vec<BinaryRef>,
}

/// Content hash plus blob reference of one uploaded artifact
///
/// Foreign documents may carry binaries without a reference; queries skip
/// those rather than emitting partial rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryRef {
    /// Base64 MD5 digest, as object stores label blob content
    #[serde(rename = "@md5", default)]
    pub md5: String,

    #[serde(rename = "@ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Metadata identifying the build being published
#[derive(Debug, Clone)]
pub struct BuildInfo {
    branch: String,
    rev: String,
    build_id: String,
    built_at: DateTime<Utc>,
}

impl BuildInfo {
    pub fn new(
        branch: impl Into<String>,
        rev: impl Into<String>,
        build_id: impl Into<String>,
        built_at: DateTime<Utc>,
    ) -> Self {
        Self {
            branch: branch.into(),
            rev: rev.into(),
            build_id: build_id.into(),
            built_at,
        }
    }

    /// Raw branch name as given by the build system
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Canonical slug of the branch name
    ///
    /// Raw names that slugify identically address the same manifest entry.
    pub fn branch_slug(&self) -> String {
        slug::slugify(&self.branch)
    }

    pub fn rev(&self) -> &str {
        &self.rev
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_document_wire_form() {
        let value = serde_json::to_value(Manifest::empty()).unwrap();
        assert_eq!(value, json!({"@spec": 1, "@ns": {}}));
    }

    #[test]
    fn test_document_without_spec_marker_roundtrips_without_it() {
        let document: Manifest = serde_json::from_value(json!({"@ns": {}})).unwrap();
        assert_eq!(document.spec, None);
        assert_eq!(serde_json::to_value(&document).unwrap(), json!({"@ns": {}}));
    }

    #[test]
    fn test_document_roundtrip() {
        let wire = json!({
            "@spec": 1,
            "@ns": {
                "dev": {
                    "@last_success": {
                        "@built_at": "2018-11-01T05:01:01.000001+00:00",
                        "@rev": "111111",
                        "@build_id": "aaaa-bbb-ccc",
                        "@include": {
                            "spark": {
                                "@type": "some",
                                "@metadata": {},
                                "@binaries": [
                                    {"@md5": "AAAA==", "@ref": "gs://b/k"}
                                ]
                            }
                        }
                    }
                }
            }
        });

        let document: Manifest = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(serde_json::to_value(&document).unwrap(), wire);

        let record = &document.branches["dev"].last_success;
        assert_eq!(record.rev, "111111");
        assert_eq!(record.include["spark"].binaries.len(), 1);
    }

    #[test]
    fn test_binary_ref_without_reference_is_tolerated() {
        let binary: BinaryRef = serde_json::from_value(json!({"@md5": "AAAA=="})).unwrap();
        assert_eq!(binary.reference, None);
    }

    #[test]
    fn test_branch_slug() {
        let build = BuildInfo::new("Feature/New Thing", "rev", "id", Utc::now());
        assert_eq!(build.branch_slug(), "feature-new-thing");
    }
}
