//! Manifest publication
//!
//! The optimistic-concurrency commit protocol. Per attempt:
//! FETCHED → MERGED → {COMMITTED | CONFLICT → FETCHED | FATAL}.
//!
//! The merge is recomputed from scratch on every retry because it is a pure
//! function of the freshly observed document; the only state carried across
//! attempts is the decision "uploads already happened". Uploads are
//! idempotent (content-addressed keys), so re-running them on retries would
//! waste bandwidth without changing the result.

use tracing::{debug, info, warn};

use crate::asset::AssetError;
use crate::config::Project;
use crate::manifest::{merge, BuildInfo, Manifest};
use crate::storage::{CasOutcome, StorageError, StorageGateway};

/// Default bound on conflict retries before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

/// Errors terminating a publish operation
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("asset resolution failed: {0}")]
    Asset(#[from] AssetError),

    #[error("storage gateway failure: {0}")]
    Storage(#[from] StorageError),

    #[error("manifest still contended after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },
}

/// Drives fetch → merge → upload → conditional-commit against a gateway
pub struct Publisher<'a> {
    storage: &'a dyn StorageGateway,
    max_attempts: u32,
}

impl<'a> Publisher<'a> {
    pub fn new(storage: &'a dyn StorageGateway) -> Self {
        Self {
            storage,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Bound the conflict-retry loop
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Publish the build: upload its assets and commit the merged document
    pub fn publish(&self, build: &BuildInfo, project: &Project) -> Result<Manifest, PublishError> {
        self.run(build, project, true)
    }

    /// Merge against current remote state without uploading or committing
    pub fn preview(&self, build: &BuildInfo, project: &Project) -> Result<Manifest, PublishError> {
        self.run(build, project, false)
    }

    fn run(
        &self,
        build: &BuildInfo,
        project: &Project,
        upload: bool,
    ) -> Result<Manifest, PublishError> {
        let mut uploads_done = false;

        for attempt in 1..=self.max_attempts {
            let fetched = self.storage.fetch_manifest()?;
            let (candidate, uploads) = merge(&fetched.document, build, project)?;

            if !upload {
                return Ok(candidate);
            }

            // Upload before committing, and only once per overall operation.
            if !uploads_done {
                for (key, asset) in &uploads {
                    debug!("uploading {} [{}]", asset.path().display(), key);
                    self.storage.upload(project.bucket(), key, asset.path())?;
                }
                info!("uploading done for {} objects", uploads.len());
                uploads_done = true;
            }

            match self
                .storage
                .cas_manifest(&fetched.key, fetched.generation, &candidate)?
            {
                CasOutcome::Committed => {
                    debug!("manifest committed on attempt {attempt}");
                    return Ok(candidate);
                }
                CasOutcome::Conflict => {
                    warn!("manifest has already been modified, retrying (attempt {attempt})");
                }
            }
        }

        Err(PublishError::AttemptsExhausted {
            attempts: self.max_attempts,
        })
    }
}
