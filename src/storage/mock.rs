//! Mock storage gateway
//!
//! In-memory [`StorageGateway`] with failure injection for exercising the
//! commit protocol's error paths. Counts fetches, uploads, and conditional
//! writes so tests can assert how many round trips an operation cost.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use crate::manifest::Manifest;

use super::{CasOutcome, FetchedManifest, Generation, StorageError, StorageGateway};

const MOCK_MANIFEST_KEY: &str = "mock/manifest.json";

/// Scripted failures for the mock gateway
#[derive(Debug, Clone, Default)]
pub struct FailureConfig {
    /// Reject this many conditional writes with a conflict before accepting
    pub conflicts_before_commit: usize,

    /// Fail every conditional write fatally with this message
    pub fatal_cas: Option<String>,

    /// Fail every upload fatally with this message
    pub fatal_upload: Option<String>,
}

/// Configurable in-memory storage gateway
pub struct MockStorage {
    state: Mutex<MockState>,
}

struct MockState {
    document: Manifest,
    generation: Generation,
    failures: FailureConfig,
    /// Documents committed "by someone else", surfaced one per injected
    /// conflict so retries observe fresh remote state
    interlopers: Vec<Manifest>,
    fetches: usize,
    cas_attempts: usize,
    uploads: Vec<String>,
    blobs: BTreeMap<String, Vec<u8>>,
}

impl MockStorage {
    /// Gateway seeded with a document at generation 1
    pub fn new(document: Manifest) -> Self {
        Self {
            state: Mutex::new(MockState {
                document,
                generation: 1,
                failures: FailureConfig::default(),
                interlopers: Vec::new(),
                fetches: 0,
                cas_attempts: 0,
                uploads: Vec::new(),
                blobs: BTreeMap::new(),
            }),
        }
    }

    /// Gateway seeded with the empty document
    pub fn empty() -> Self {
        Self::new(Manifest::empty())
    }

    /// Replace the failure script
    pub fn with_failures(self, failures: FailureConfig) -> Self {
        self.state.lock().unwrap().failures = failures;
        self
    }

    /// Queue a document that a concurrent writer commits; it becomes
    /// visible together with the next injected conflict
    pub fn stage_concurrent_update(&self, document: Manifest) {
        self.state.lock().unwrap().interlopers.push(document);
    }

    /// Number of manifest fetches served
    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    /// Number of conditional writes attempted
    pub fn cas_attempts(&self) -> usize {
        self.state.lock().unwrap().cas_attempts
    }

    /// Keys uploaded, in order
    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    /// Bytes stored for `gs://{bucket}/{key}`, if uploaded
    pub fn blob(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .blobs
            .get(&blob_key(bucket, key))
            .cloned()
    }

    /// Current remote document
    pub fn document(&self) -> Manifest {
        self.state.lock().unwrap().document.clone()
    }
}

impl StorageGateway for MockStorage {
    fn fetch_manifest(&self) -> Result<FetchedManifest, StorageError> {
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        Ok(FetchedManifest {
            key: MOCK_MANIFEST_KEY.to_string(),
            generation: state.generation,
            document: state.document.clone(),
        })
    }

    fn cas_manifest(
        &self,
        _key: &str,
        expected_generation: Generation,
        document: &Manifest,
    ) -> Result<CasOutcome, StorageError> {
        let mut state = self.state.lock().unwrap();
        state.cas_attempts += 1;

        if let Some(message) = &state.failures.fatal_cas {
            return Err(StorageError::Backend(message.clone()));
        }

        if state.failures.conflicts_before_commit > 0 {
            state.failures.conflicts_before_commit -= 1;
            if !state.interlopers.is_empty() {
                state.document = state.interlopers.remove(0);
            }
            state.generation += 1;
            return Ok(CasOutcome::Conflict);
        }

        if expected_generation != state.generation {
            return Ok(CasOutcome::Conflict);
        }

        state.document = document.clone();
        state.generation += 1;
        Ok(CasOutcome::Committed)
    }

    fn upload(&self, bucket: &str, key: &str, file: &Path) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.failures.fatal_upload {
            return Err(StorageError::Backend(message.clone()));
        }

        let bytes = fs::read(file)?;
        state.uploads.push(key.to_string());
        state.blobs.insert(blob_key(bucket, key), bytes);
        Ok(())
    }

    fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), StorageError> {
        let state = self.state.lock().unwrap();
        let bytes = state
            .blobs
            .get(&blob_key(bucket, key))
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        fs::write(dest, bytes)?;
        Ok(())
    }
}

fn blob_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}
