//! Manifest queries
//!
//! Read-only traversal of a manifest document into flattened rows, plus
//! download placement for fetching matched binaries. Operates on any
//! document, typically one just fetched from the gateway.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::manifest::Manifest;
use crate::storage::{parse_blob_uri, StorageError, StorageGateway};

/// Row field names, in output order
pub const ROW_FIELDS: &[&str] = &["branch", "app", "built_at", "commit", "url"];

/// Errors for the download surface
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("not a gs:// blob reference: {0}")]
    BadReference(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One flattened binary row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRow {
    /// Branch slug the build belongs to
    pub branch: String,
    /// Component name
    pub app: String,
    pub built_at: String,
    /// Source revision of the build
    pub commit: String,
    /// Blob reference of the binary
    pub url: String,
}

/// Flatten a document into rows, filtered by branch and component
///
/// The branch filter is slugified before matching; an absent filter matches
/// everything. Binaries without a reference are skipped rather than emitted
/// as partial rows. Rows come back ordered by (branch, app) ascending —
/// that ordering is part of the contract and applied explicitly.
pub fn search(document: &Manifest, branch: Option<&str>, app: Option<&str>) -> Vec<SearchRow> {
    let branch_filter = branch.map(slug::slugify);

    let mut rows = Vec::new();
    for (branch_slug, entry) in &document.branches {
        if let Some(filter) = &branch_filter {
            if branch_slug != filter {
                continue;
            }
        }

        let record = &entry.last_success;
        for (app_name, component) in &record.include {
            if let Some(filter) = app {
                if app_name != filter {
                    continue;
                }
            }

            for binary in &component.binaries {
                let Some(url) = &binary.reference else { continue };
                rows.push(SearchRow {
                    branch: branch_slug.clone(),
                    app: app_name.clone(),
                    built_at: record.built_at.clone(),
                    commit: record.rev.clone(),
                    url: url.clone(),
                });
            }
        }
    }

    rows.sort_by(|a, b| {
        (a.branch.as_str(), a.app.as_str()).cmp(&(b.branch.as_str(), b.app.as_str()))
    });
    rows
}

/// Download a row's binary under `<dest>/<branch>/<app>/<filename>`
pub fn download_row(
    storage: &dyn StorageGateway,
    row: &SearchRow,
    dest: &Path,
) -> Result<PathBuf, QueryError> {
    let (bucket, key) =
        parse_blob_uri(&row.url).ok_or_else(|| QueryError::BadReference(row.url.clone()))?;
    let filename = key.rsplit('/').next().unwrap_or(key);

    let folder = dest.join(&row.branch).join(&row.app);
    fs::create_dir_all(&folder)?;

    let target = folder.join(filename);
    debug!("downloading gs://{}/{} to {}", bucket, key, target.display());
    storage.download(bucket, key, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_fixture() -> Manifest {
        serde_json::from_value(json!({
            "@ns": {
                "dev": {
                    "@last_success": {
                        "@build_id": "aaaa-bbb-ccc",
                        "@built_at": "2018-11-01T05:01:01.000001+00:00",
                        "@rev": "111111",
                        "@include": {
                            "spark": {
                                "@binaries": [
                                    {"@md5": "AAAA==", "@ref": "gs://b/test_file.cfg"}
                                ],
                                "@metadata": {},
                                "@type": "some"
                            }
                        }
                    }
                },
                "master": {
                    "@last_success": {
                        "@build_id": "kkk-bbb-ddd",
                        "@built_at": "2019-12-01T05:01:01.000001+00:00",
                        "@rev": "222222",
                        "@include": {
                            "spark": {
                                "@binaries": [
                                    {"@md5": "BBBB==", "@ref": "gs://b/app.jar"},
                                    {"@md5": "CCCC==", "@ref": "gs://b/app.cfg"}
                                ],
                                "@metadata": {},
                                "@type": "pyspark"
                            },
                            "pyspark": {
                                "@binaries": [
                                    {"@md5": "XXXXX==", "@ref": "gs://b/main.py"}
                                ],
                                "@metadata": {},
                                "@type": "pyspark"
                            }
                        }
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_search_all_ordered_by_branch_then_app() {
        let rows = search(&search_fixture(), None, None);

        let keys: Vec<(String, String, String)> = rows
            .into_iter()
            .map(|row| (row.branch, row.app, row.url))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("dev".into(), "spark".into(), "gs://b/test_file.cfg".into()),
                ("master".into(), "pyspark".into(), "gs://b/main.py".into()),
                ("master".into(), "spark".into(), "gs://b/app.jar".into()),
                ("master".into(), "spark".into(), "gs://b/app.cfg".into()),
            ]
        );
    }

    #[test]
    fn test_search_by_branch() {
        let rows = search(&search_fixture(), Some("dev"), None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].branch, "dev");
        assert_eq!(rows[0].app, "spark");
        assert_eq!(rows[0].commit, "111111");
        assert_eq!(rows[0].built_at, "2018-11-01T05:01:01.000001+00:00");
    }

    #[test]
    fn test_search_branch_filter_is_slugified() {
        let rows = search(&search_fixture(), Some("DEV"), None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].branch, "dev");
    }

    #[test]
    fn test_search_by_app() {
        let rows = search(&search_fixture(), None, Some("spark"));
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.app == "spark"));
    }

    #[test]
    fn test_search_by_app_and_branch() {
        let rows = search(&search_fixture(), Some("master"), Some("pyspark"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "gs://b/main.py");
    }

    #[test]
    fn test_search_unknown_app_is_empty() {
        let rows = search(&search_fixture(), None, Some("no_wired_no_world"));
        assert!(rows.is_empty());
    }

    #[test]
    fn test_search_skips_binaries_without_reference() {
        let document: Manifest = serde_json::from_value(json!({
            "@ns": {"dev": {"@last_success": {
                "@built_at": "2018-11-01T05:01:01+00:00",
                "@rev": "111111",
                "@build_id": "id",
                "@include": {"spark": {
                    "@type": "some",
                    "@metadata": {},
                    "@binaries": [
                        {"@md5": "AAAA=="},
                        {"@md5": "BBBB==", "@ref": "gs://b/kept.jar"}
                    ]
                }}
            }}}
        }))
        .unwrap();

        let rows = search(&document, None, None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "gs://b/kept.jar");
    }

    #[test]
    fn test_download_row_rejects_foreign_scheme() {
        let row = SearchRow {
            branch: "dev".into(),
            app: "spark".into(),
            built_at: String::new(),
            commit: String::new(),
            url: "https://example.com/blob".into(),
        };
        let storage = crate::storage::mock::MockStorage::empty();
        let dir = tempfile::TempDir::new().unwrap();

        let err = download_row(&storage, &row, dir.path()).unwrap_err();
        assert!(matches!(err, QueryError::BadReference(_)));
    }
}
