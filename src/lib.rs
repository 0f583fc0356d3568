//! mfutil - per-branch build artifact manifests in object storage
//!
//! This crate records, per source-control branch, the artifacts produced by
//! the latest successful build, and publishes that record as one JSON
//! manifest in a remote bucket. Concurrent build jobs may race to update
//! it; the publisher serializes them with optimistic concurrency control at
//! the storage boundary (read generation, conditional write).

pub mod asset;
pub mod config;
pub mod manifest;
pub mod publish;
pub mod query;
pub mod storage;

pub use asset::{Asset, AssetError, AssetResolver, AssetSpec};
pub use config::{ConfigError, Project, ProjectConfig, DEFAULT_CONFIG_FILE_NAME};
pub use manifest::{merge, BuildInfo, Manifest, MANIFEST_NAME};
pub use publish::{PublishError, Publisher, DEFAULT_MAX_ATTEMPTS};
pub use query::{download_row, search, SearchRow};
pub use storage::{CasOutcome, FetchedManifest, GcsStorage, StorageError, StorageGateway};
