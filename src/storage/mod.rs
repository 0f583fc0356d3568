//! Storage gateway
//!
//! Abstract boundary between the core and the remote object store. The
//! manifest is never read-modified-written without a precondition: a fetch
//! returns the object's generation, and a commit is a conditional write
//! guarded by it.

pub mod gcs;
pub mod mock;

pub use gcs::GcsStorage;

use std::path::Path;

use crate::manifest::Manifest;

/// Opaque version token of the remote manifest object
pub type Generation = i64;

/// Errors for gateway operations
///
/// A [`CasOutcome::Conflict`] is not an error; everything here is fatal to
/// the operation that hits it.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no access token available: {0}")]
    Auth(String),

    #[error("storage request failed: {0}")]
    Http(#[from] ureq::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected storage response: {0}")]
    Malformed(String),

    #[error("blob not found: gs://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("creating manifest {0} failed")]
    ManifestCreate(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A fetched manifest together with its storage coordinates
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    /// Object key the document lives under
    pub key: String,
    /// Version token for the conditional write
    pub generation: Generation,
    pub document: Manifest,
}

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The remote version matched and the document was replaced
    Committed,
    /// Someone else committed in between; refetch and retry
    Conflict,
}

/// Blob store operations the core depends on
pub trait StorageGateway {
    /// Read the current manifest and its version token
    ///
    /// Transparently creates the empty document (under version-guarded
    /// semantics, so concurrent creators cannot clobber each other) when
    /// none exists yet.
    fn fetch_manifest(&self) -> Result<FetchedManifest, StorageError>;

    /// Write `document` to `key` only if the remote generation still equals
    /// `expected_generation`
    fn cas_manifest(
        &self,
        key: &str,
        expected_generation: Generation,
        document: &Manifest,
    ) -> Result<CasOutcome, StorageError>;

    /// Upload a local file to `gs://{bucket}/{key}`
    fn upload(&self, bucket: &str, key: &str, file: &Path) -> Result<(), StorageError>;

    /// Download `gs://{bucket}/{key}` to a local path
    fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), StorageError>;
}

/// Split a `gs://bucket/key` blob reference into bucket and key
pub fn parse_blob_uri(uri: &str) -> Option<(&str, &str)> {
    uri.strip_prefix("gs://")?.split_once('/')
}
