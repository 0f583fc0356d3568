//! Glob-spec resolution
//!
//! Expands a project component's asset specs against a root directory into
//! a lazy sequence of assets. Matches are resolved in sorted path order so
//! both the manifest's binary list and any bundled archive are reproducible
//! run to run.

use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use tracing::debug;
use walkdir::WalkDir;

use super::{Asset, AssetError, AssetSpec, RawAsset, ZipAsset};

/// Expands glob patterns below a fixed root directory
#[derive(Debug, Clone)]
pub struct AssetResolver {
    root: PathBuf,
}

impl AssetResolver {
    /// Create a resolver rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory patterns are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily resolve a list of asset specs
    ///
    /// A non-archive spec yields one raw asset per matched file; zero
    /// matches yield zero assets. An archive spec yields exactly one zip
    /// asset, or an error when nothing matched.
    pub fn assets<'a>(
        &'a self,
        specs: &'a [AssetSpec],
    ) -> impl Iterator<Item = Result<Asset, AssetError>> + 'a {
        specs.iter().flat_map(move |spec| self.spec_assets(spec))
    }

    fn spec_assets(&self, spec: &AssetSpec) -> Box<dyn Iterator<Item = Result<Asset, AssetError>>> {
        if spec.zip {
            Box::new(std::iter::once(self.archive_asset(spec)))
        } else {
            match self.matched_files(&spec.glob) {
                Ok(files) => Box::new(
                    files
                        .into_iter()
                        .map(|file| RawAsset::new(file).map(Asset::Raw)),
                ),
                Err(err) => Box::new(std::iter::once(Err(err))),
            }
        }
    }

    fn archive_asset(&self, spec: &AssetSpec) -> Result<Asset, AssetError> {
        let files = self.matched_files(&spec.glob)?;
        if files.is_empty() {
            return Err(AssetError::ArchiveNoMatches {
                pattern: spec.glob.clone(),
            });
        }
        ZipAsset::from_files(&files).map(Asset::Zip)
    }

    /// All files below the root matching the pattern, sorted by path
    pub fn matched_files(&self, pattern: &str) -> Result<Vec<PathBuf>, AssetError> {
        let normalized = pattern.strip_prefix("./").unwrap_or(pattern);
        let matcher = GlobBuilder::new(normalized)
            .literal_separator(true)
            .build()?
            .compile_matcher();

        let mut matches = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            if matcher.is_match(rel) {
                matches.push(entry.path().to_path_buf());
            }
        }

        matches.sort();
        debug!("glob {} matched {} files", pattern, matches.len());
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let test_dir = dir.path().join("test_dir");
        fs::create_dir_all(test_dir.join("sub/deep")).unwrap();

        fs::write(test_dir.join("a.txt"), b"a").unwrap();
        fs::write(test_dir.join("b.txt"), b"b").unwrap();
        fs::write(test_dir.join("c.txt"), b"c").unwrap();
        fs::write(test_dir.join("file_q.txt"), b"q").unwrap();

        fs::write(test_dir.join("one.ini"), b"1").unwrap();
        fs::write(test_dir.join("sub/two.ini"), b"2").unwrap();
        fs::write(test_dir.join("sub/deep/three.ini"), b"3").unwrap();

        dir
    }

    fn specs(glob: &str, zip: bool) -> Vec<AssetSpec> {
        vec![AssetSpec {
            glob: glob.to_string(),
            zip,
        }]
    }

    #[test]
    fn test_resolve_flat_glob() {
        let dir = create_test_tree();
        let resolver = AssetResolver::new(dir.path());

        let assets: Vec<Asset> = resolver
            .assets(&specs("./**/test_dir/*.txt", false))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(assets.len(), 4);
    }

    #[test]
    fn test_resolve_recursive_glob() {
        let dir = create_test_tree();
        let resolver = AssetResolver::new(dir.path());

        let assets: Vec<Asset> = resolver
            .assets(&specs("./**/test_dir/**/*.ini", false))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(assets.len(), 3);
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let dir = create_test_tree();
        let resolver = AssetResolver::new(dir.path());

        // `*.ini` at the test_dir level must not pick up sub/two.ini.
        let assets: Vec<Asset> = resolver
            .assets(&specs("test_dir/*.ini", false))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(assets.len(), 1);
    }

    #[test]
    fn test_resolve_order_is_sorted() {
        let dir = create_test_tree();
        let resolver = AssetResolver::new(dir.path());

        let names: Vec<String> = resolver
            .assets(&specs("test_dir/*.txt", false))
            .map(|asset| asset.unwrap().filename())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt", "file_q.txt"]);
    }

    #[test]
    fn test_zero_matches_yield_zero_assets() {
        let dir = create_test_tree();
        let resolver = AssetResolver::new(dir.path());

        let assets: Vec<_> = resolver.assets(&specs("**/*.jar", false)).collect();
        assert!(assets.is_empty());
    }

    #[test]
    fn test_archive_spec_bundles_matches() {
        let dir = create_test_tree();
        let resolver = AssetResolver::new(dir.path());

        let assets: Vec<Asset> = resolver
            .assets(&specs("./**/test_dir/**/*.ini", true))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(assets.len(), 1);
        assert!(assets[0].filename().ends_with(".zip"));
    }

    #[test]
    fn test_archive_spec_with_no_matches_fails() {
        let dir = create_test_tree();
        let resolver = AssetResolver::new(dir.path());

        let err = resolver
            .assets(&specs("**/*.jar", true))
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, AssetError::ArchiveNoMatches { .. }));
    }

    #[test]
    fn test_single_wildcard_segment() {
        let dir = create_test_tree();
        let resolver = AssetResolver::new(dir.path());

        let files = resolver.matched_files("./test_dir/*_q*").unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("test_dir/file_q.txt"));
    }
}
