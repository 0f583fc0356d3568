//! Asset identity
//!
//! Turns local files into content-addressed, uploadable units. An asset is
//! either a single raw file or a deterministic zip archive bundling a whole
//! match set. Both expose the same capability: MD5 digest (base64 for the
//! manifest, hex for content-addressed names), a local path, and an output
//! filename.

mod resolve;

pub use resolve::AssetResolver;

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;

/// Digests are streamed in fixed-size chunks to bound peak memory.
const DIGEST_CHUNK_SIZE: usize = 8192;

/// Errors for asset resolution, digesting, and archive construction
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("glob pattern error: {0}")]
    Pattern(#[from] globset::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("archive glob matched no files: {pattern}")]
    ArchiveNoMatches { pattern: String },

    #[error("cannot build an archive from an empty file set")]
    EmptyFileSet,

    #[error("failed to read {} while digesting: {source}", .path.display())]
    Digest {
        path: PathBuf,
        source: io::Error,
    },

    #[error("archive write error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One glob-driven asset specification from the project description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSpec {
    /// Glob pattern, relative to the project root
    pub glob: String,

    /// Bundle the whole match set into a single archive
    #[serde(default)]
    pub zip: bool,
}

/// MD5 digest of a byte stream, kept in both stored encodings
///
/// The base64 form matches the `md5Hash` metadata label object stores attach
/// to blobs; the hex form names content-addressed archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    base64: String,
    hex: String,
}

impl ContentDigest {
    /// Digest a file, streaming in fixed-size chunks
    pub fn of_file(path: &Path) -> Result<Self, AssetError> {
        let read_err = |source| AssetError::Digest {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(read_err)?;
        let mut hasher = Md5::new();
        let mut buf = [0u8; DIGEST_CHUNK_SIZE];

        loop {
            let n = file.read(&mut buf).map_err(read_err)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let digest = hasher.finalize();
        Ok(Self {
            base64: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &digest),
            hex: hex::encode(&digest),
        })
    }

    /// Base64 encoding of the raw digest bytes
    pub fn base64(&self) -> &str {
        &self.base64
    }

    /// Lowercase hex encoding of the digest
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

/// A resolved, hashable, uploadable unit
///
/// Closed over the two kinds the manifest knows about. The digest is
/// computed once, at construction, and cached for the instance's lifetime.
#[derive(Debug)]
pub enum Asset {
    /// One matched file, uploaded as-is
    Raw(RawAsset),
    /// A whole match set bundled into one deterministic archive
    Zip(ZipAsset),
}

impl Asset {
    /// Base64 MD5 digest, as stored in the manifest
    pub fn md5_base64(&self) -> &str {
        match self {
            Asset::Raw(raw) => raw.digest.base64(),
            Asset::Zip(zip) => zip.digest.base64(),
        }
    }

    /// Hex MD5 digest
    pub fn md5_hex(&self) -> &str {
        match self {
            Asset::Raw(raw) => raw.digest.hex(),
            Asset::Zip(zip) => zip.digest.hex(),
        }
    }

    /// Local path of the uploadable bytes
    ///
    /// For archives this is a temporary file that lives exactly as long as
    /// the asset value.
    pub fn path(&self) -> &Path {
        match self {
            Asset::Raw(raw) => &raw.file,
            Asset::Zip(zip) => zip.archive.path(),
        }
    }

    /// Filename under which the asset is stored remotely
    pub fn filename(&self) -> String {
        match self {
            Asset::Raw(raw) => raw.filename(),
            Asset::Zip(zip) => zip.filename(),
        }
    }
}

/// A single resolved file
#[derive(Debug)]
pub struct RawAsset {
    file: PathBuf,
    digest: ContentDigest,
}

impl RawAsset {
    /// Wrap a resolved file, digesting its contents
    pub fn new(file: PathBuf) -> Result<Self, AssetError> {
        let digest = ContentDigest::of_file(&file)?;
        Ok(Self { file, digest })
    }

    /// The file's base name
    pub fn filename(&self) -> String {
        self.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A non-empty file set materialized as one deterministic zip archive
///
/// Entries are stored at their paths relative to the common ancestor
/// directory of the whole set and written in sorted relative-path order,
/// with pinned timestamps, so identical file sets with identical contents
/// always produce byte-identical archives. The archive's own name is
/// content-derived: `{md5-hex}.zip`.
#[derive(Debug)]
pub struct ZipAsset {
    archive: NamedTempFile,
    digest: ContentDigest,
}

impl ZipAsset {
    /// Build the archive from a non-empty set of resolved files
    pub fn from_files(files: &[PathBuf]) -> Result<Self, AssetError> {
        if files.is_empty() {
            return Err(AssetError::EmptyFileSet);
        }

        let ancestor = common_ancestor(files);
        let mut entries: Vec<(String, &Path)> = files
            .iter()
            .map(|file| {
                let rel = file.strip_prefix(&ancestor).unwrap_or(file);
                (zip_entry_name(rel), file.as_path())
            })
            .collect();
        entries.sort();

        let archive = NamedTempFile::new()?;
        let mut writer = ZipWriter::new(archive.reopen()?);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        for (name, file) in &entries {
            writer.start_file(name.as_str(), options)?;
            let mut src = File::open(file)?;
            io::copy(&mut src, &mut writer)?;
        }
        writer.finish()?;

        let digest = ContentDigest::of_file(archive.path())?;
        Ok(Self { archive, digest })
    }

    /// Content-derived archive name
    pub fn filename(&self) -> String {
        format!("{}.zip", self.digest.hex())
    }
}

/// Longest common ancestor directory of a non-empty file set
fn common_ancestor(files: &[PathBuf]) -> PathBuf {
    let mut ancestor = files[0]
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .to_path_buf();

    for file in &files[1..] {
        while !file.starts_with(&ancestor) {
            match ancestor.parent() {
                Some(parent) => ancestor = parent.to_path_buf(),
                None => return PathBuf::new(),
            }
        }
    }

    ancestor
}

/// Archive entry name with forward-slash separators
fn zip_entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
