//! Manifest merge
//!
//! Pure function from (previous document, build metadata, project) to the
//! candidate document plus the set of blobs to upload. Never touches the
//! network; local files are read only to digest them.

use std::collections::BTreeMap;

use tracing::debug;

use crate::asset::{Asset, AssetError, AssetResolver};
use crate::config::Project;

use super::{BinaryRef, BranchEntry, BuildInfo, BuildRecord, ComponentEntry, Manifest};

/// Blob-reference key to the asset carrying the bytes to upload
///
/// Holding the asset (not a bare path) keeps archive temp files alive until
/// the upload pass has read them.
pub type UploadSet = BTreeMap<String, Asset>;

/// Merge a build's resolved assets into a copy of the previous document
///
/// The branch entry for the build's slug is replaced wholesale; everything
/// else is carried over untouched. Blob keys are deterministic
/// (`{repository}/{branch-slug}/{rev}/{component}/{filename}`) so re-running
/// the same build re-addresses the same blobs. When two assets map to the
/// same key the first one wins and later collisions are dropped from the
/// upload set.
///
/// Any resolution or digest failure aborts the whole merge; no partial
/// document is returned.
pub fn merge(
    previous: &Manifest,
    build: &BuildInfo,
    project: &Project,
) -> Result<(Manifest, UploadSet), AssetError> {
    let resolver = AssetResolver::new(project.root());
    let branch = build.branch_slug();

    let mut uploads = UploadSet::new();
    let mut include = BTreeMap::new();

    for component in project.components() {
        let mut binaries = Vec::new();
        for asset in resolver.assets(&component.assets) {
            let asset = asset?;
            let key = format!(
                "{}/{}/{}/{}/{}",
                project.repository(),
                branch,
                build.rev(),
                component.name,
                asset.filename()
            );
            debug!("[{}] discovering asset {}", component.name, asset.path().display());

            binaries.push(BinaryRef {
                md5: asset.md5_base64().to_string(),
                reference: Some(format!("gs://{}/{}", project.bucket(), key)),
            });
            uploads.entry(key).or_insert(asset);
        }

        include.insert(
            component.name.clone(),
            ComponentEntry {
                kind: component.kind.clone(),
                metadata: serde_json::Map::new(),
                binaries,
            },
        );
    }

    let mut document = previous.clone();
    document.branches.insert(
        branch,
        BranchEntry {
            last_success: BuildRecord {
                built_at: build.built_at().to_rfc3339(),
                rev: build.rev().to_string(),
                build_id: build.build_id().to_string(),
                include,
            },
        },
    );

    Ok((document, uploads))
}
