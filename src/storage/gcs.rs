//! Google Cloud Storage gateway
//!
//! Talks to the GCS JSON API directly: media download/upload plus the
//! `ifGenerationMatch` precondition, which is the compare-and-set primitive
//! the whole commit protocol rests on (a 412 response is a version
//! conflict, not a failure). Authenticates with a bearer token from the
//! environment or the GCE metadata server.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::manifest::{Manifest, MANIFEST_NAME};

use super::{CasOutcome, FetchedManifest, Generation, StorageError, StorageGateway};

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_API: &str = "https://storage.googleapis.com/upload/storage/v1";

/// Environment variable consulted before the metadata server
const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// GCS-backed [`StorageGateway`]
pub struct GcsStorage {
    agent: ureq::Agent,
    token: String,
    bucket: String,
    repository: String,
}

impl GcsStorage {
    /// Resolve credentials and bind the gateway to a bucket and repository
    pub fn connect(
        bucket: impl Into<String>,
        repository: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let agent = build_agent();
        let token = resolve_token(&agent)?;
        Ok(Self {
            agent,
            token,
            bucket: bucket.into(),
            repository: repository.into(),
        })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn manifest_key(&self) -> String {
        format!("{}/{}", self.repository, MANIFEST_NAME)
    }
}

impl StorageGateway for GcsStorage {
    fn fetch_manifest(&self) -> Result<FetchedManifest, StorageError> {
        let key = self.manifest_key();
        let url = object_url(&self.bucket, &key);
        let mut created = false;

        loop {
            let result = self
                .agent
                .get(&url)
                .query("alt", "media")
                .header("Authorization", &self.bearer())
                .call();

            match result {
                Ok(mut response) => {
                    let generation = generation_header(&response)?;
                    let document: Manifest = response
                        .body_mut()
                        .read_json()
                        .map_err(|err| StorageError::Malformed(err.to_string()))?;

                    debug!("fetched manifest gs://{}/{}#{}", self.bucket, key, generation);
                    return Ok(FetchedManifest {
                        key,
                        generation,
                        document,
                    });
                }
                Err(ureq::Error::StatusCode(404)) if !created => {
                    warn!(
                        "{} does not exist at gs://{}/{}, creating empty",
                        MANIFEST_NAME, self.bucket, key
                    );
                    // Generation 0 means "only if absent": losing this race
                    // to another creator is fine, the refetch sees theirs.
                    self.cas_manifest(&key, 0, &Manifest::empty())?;
                    created = true;
                }
                Err(ureq::Error::StatusCode(404)) => {
                    return Err(StorageError::ManifestCreate(key));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn cas_manifest(
        &self,
        key: &str,
        expected_generation: Generation,
        document: &Manifest,
    ) -> Result<CasOutcome, StorageError> {
        let body = serde_json::to_vec(document)?;
        let url = format!("{UPLOAD_API}/b/{}/o", self.bucket);

        let result = self
            .agent
            .post(&url)
            .query("uploadType", "media")
            .query("name", key)
            .query("ifGenerationMatch", expected_generation.to_string())
            .header("Authorization", &self.bearer())
            .header("Content-Type", "application/json")
            .send(&body[..]);

        match result {
            Ok(_) => Ok(CasOutcome::Committed),
            Err(ureq::Error::StatusCode(412)) => Ok(CasOutcome::Conflict),
            Err(err) => Err(err.into()),
        }
    }

    fn upload(&self, bucket: &str, key: &str, file: &Path) -> Result<(), StorageError> {
        let bytes = fs::read(file)?;
        let url = format!("{UPLOAD_API}/b/{bucket}/o");

        self.agent
            .post(&url)
            .query("uploadType", "media")
            .query("name", key)
            .header("Authorization", &self.bearer())
            .header("Content-Type", "application/octet-stream")
            .send(&bytes[..])?;
        Ok(())
    }

    fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), StorageError> {
        let url = format!("{STORAGE_API}/b/{bucket}/o/{}", encode_object_name(key));
        let result = self
            .agent
            .get(&url)
            .query("alt", "media")
            .header("Authorization", &self.bearer())
            .call();

        match result {
            Ok(response) => {
                let mut reader = response.into_body().into_reader();
                let mut file = File::create(dest)?;
                io::copy(&mut reader, &mut file)?;
                Ok(())
            }
            Err(ureq::Error::StatusCode(404)) => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

fn build_agent() -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .build();
    config.into()
}

/// Bearer token from the environment, falling back to the metadata server
fn resolve_token(agent: &ureq::Agent) -> Result<String, StorageError> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.is_empty() {
            return Ok(token);
        }
    }

    let mut response = agent
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .call()
        .map_err(|err| {
            StorageError::Auth(format!(
                "set {TOKEN_ENV} or run where a metadata server is reachable: {err}"
            ))
        })?;

    let body: serde_json::Value = response
        .body_mut()
        .read_json()
        .map_err(|err| StorageError::Auth(err.to_string()))?;

    body.get("access_token")
        .and_then(|token| token.as_str())
        .map(str::to_string)
        .ok_or_else(|| StorageError::Auth("metadata server returned no access_token".to_string()))
}

fn object_url(bucket: &str, key: &str) -> String {
    format!("{STORAGE_API}/b/{bucket}/o/{}", encode_object_name(key))
}

/// Generation header of a media download
fn generation_header<B>(response: &ureq::http::Response<B>) -> Result<Generation, StorageError> {
    response
        .headers()
        .get("x-goog-generation")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| StorageError::Malformed("missing x-goog-generation header".to_string()))
}

/// Percent-encode an object name for use as a URL path segment
fn encode_object_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => {
                encoded.push('%');
                encoded.push_str(&format!("{byte:02X}"));
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_object_name() {
        assert_eq!(
            encode_object_name("ARepo/manifest.json"),
            "ARepo%2Fmanifest.json"
        );
        assert_eq!(encode_object_name("plain-name_1.0~x"), "plain-name_1.0~x");
        assert_eq!(encode_object_name("a b"), "a%20b");
    }
}
