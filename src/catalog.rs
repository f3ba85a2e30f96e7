//! Job catalog - the full ordered list of remesh jobs
//!
//! A job is identified by its path relative to the input root. The catalog
//! is built once per run family: either loaded verbatim from a cache file
//! (one relative path per line, order significant) or produced by a
//! recursive scan of the input root filtered by an extension allowlist.
//!
//! Scans are sorted lexicographically before caching so the catalog order
//! never depends on filesystem iteration order. Shard assignments derive
//! from catalog indices, so a run-to-run stable order is what makes
//! round-robin and contiguous sharding deterministic across restarts.

use crate::error::CatalogError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Canonical relative path identifying one job within the catalog
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a job id from a relative path string
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The relative path as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First path component, used for per-category reporting
    pub fn category(&self) -> &str {
        match self.0.split_once('/') {
            Some((cat, _)) => cat,
            None => &self.0,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully-resolved job: identifier plus input and output paths
///
/// Derived deterministically from the id and the configured roots;
/// never mutated after construction.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

impl Job {
    /// Resolve a job id against the input/output roots
    pub fn resolve(id: JobId, input_root: &Path, output_root: &Path) -> Self {
        let input_path = input_root.join(id.as_str());
        let output_path = output_root.join(id.as_str());
        Self {
            id,
            input_path,
            output_path,
        }
    }
}

/// The full, ordered, immutable job catalog
#[derive(Debug, Clone)]
pub struct Catalog {
    ids: Vec<JobId>,
}

impl Catalog {
    /// Load the catalog: from the cache file if it exists and is non-empty,
    /// otherwise by scanning the input root (and writing the cache once).
    ///
    /// An unreadable cache or an unscannable root is fatal - the catalog
    /// cannot be partially known.
    pub fn load(
        cache_path: &Path,
        input_root: &Path,
        extensions: &[String],
        excludes: &[Regex],
    ) -> Result<Self, CatalogError> {
        if cache_path.exists() {
            let ids = Self::read_cache(cache_path)?;
            if !ids.is_empty() {
                info!(
                    cache = %cache_path.display(),
                    jobs = ids.len(),
                    "Loaded catalog from cache"
                );
                return Ok(Self { ids });
            }
            debug!(cache = %cache_path.display(), "Cache file empty, falling back to scan");
        }

        if !input_root.is_dir() {
            return Err(CatalogError::RootUnavailable {
                path: input_root.to_path_buf(),
            });
        }

        info!(root = %input_root.display(), "Scanning input root for jobs");
        let ids = Self::scan(input_root, extensions, excludes)?;

        Self::write_cache(cache_path, &ids)?;
        info!(
            cache = %cache_path.display(),
            jobs = ids.len(),
            "Catalog cached"
        );

        Ok(Self { ids })
    }

    /// Build a catalog directly from a list of ids (tests, sampling)
    pub fn from_ids(ids: Vec<JobId>) -> Self {
        Self { ids }
    }

    /// Parse the cache file verbatim, line by line, preserving order.
    /// Blank lines are skipped; order is otherwise significant.
    fn read_cache(path: &Path) -> Result<Vec<JobId>, CatalogError> {
        let content = fs::read_to_string(path).map_err(|e| CatalogError::CacheUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(JobId::new)
            .collect())
    }

    /// Recursive scan filtered by extension allowlist and exclude patterns,
    /// followed by a deterministic sort.
    fn scan(
        root: &Path,
        extensions: &[String],
        excludes: &[Regex],
    ) -> Result<Vec<JobId>, CatalogError> {
        let mut ids = Vec::new();

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| CatalogError::ScanFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let ext_ok = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| {
                    let lower = e.to_ascii_lowercase();
                    extensions.iter().any(|allowed| *allowed == lower)
                })
                .unwrap_or(false);
            if !ext_ok {
                continue;
            }

            // strip_prefix cannot fail for entries under `root`
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path());

            let rel_str = rel.to_str().ok_or_else(|| CatalogError::NonUtf8Path {
                path: entry.path().to_path_buf(),
            })?;

            // Normalize separators so ids match on every platform
            let rel_str = rel_str.replace('\\', "/");

            if excludes.iter().any(|re| re.is_match(&rel_str)) {
                continue;
            }

            ids.push(JobId::new(rel_str));
        }

        ids.sort();
        Ok(ids)
    }

    /// Write the cache file exactly once per cold run.
    ///
    /// A concurrent rank racing to write the same cache is harmless: the
    /// content is deterministic, so last-writer-wins produces identical bytes.
    fn write_cache(path: &Path, ids: &[JobId]) -> Result<(), CatalogError> {
        let mut content = String::with_capacity(ids.len() * 32);
        for id in ids {
            content.push_str(id.as_str());
            content.push('\n');
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| CatalogError::CacheWriteFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            }
        }

        fs::write(path, content).map_err(|e| CatalogError::CacheWriteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Number of jobs in the catalog
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if the catalog holds no jobs
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ordered job ids
    pub fn ids(&self) -> &[JobId] {
        &self.ids
    }

    /// Iterate over the ordered job ids
    pub fn iter(&self) -> impl Iterator<Item = &JobId> {
        self.ids.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(path).unwrap();
    }

    #[test]
    fn test_job_id_category() {
        assert_eq!(JobId::new("chairs/a.obj").category(), "chairs");
        assert_eq!(JobId::new("chairs/deep/b.obj").category(), "chairs");
        assert_eq!(JobId::new("toplevel.obj").category(), "toplevel.obj");
    }

    #[test]
    fn test_job_resolution() {
        let job = Job::resolve(
            JobId::new("cat/mesh.obj"),
            Path::new("/data/meshes"),
            Path::new("/data/remeshes"),
        );
        assert_eq!(job.input_path, Path::new("/data/meshes/cat/mesh.obj"));
        assert_eq!(job.output_path, Path::new("/data/remeshes/cat/mesh.obj"));
    }

    #[test]
    fn test_scan_is_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        touch(&root.join("zebra/z.obj"));
        touch(&root.join("alpha/a.ply"));
        touch(&root.join("alpha/skip.txt"));
        touch(&root.join("alpha/b.OBJ"));

        let exts = vec!["obj".to_string(), "ply".to_string()];
        let ids = Catalog::scan(root, &exts, &[]).unwrap();

        let strs: Vec<&str> = ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(strs, vec!["alpha/a.ply", "alpha/b.OBJ", "zebra/z.obj"]);
    }

    #[test]
    fn test_scan_excludes() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        touch(&root.join("keep/a.obj"));
        touch(&root.join(".snapshot/b.obj"));

        let exts = vec!["obj".to_string()];
        let excludes = vec![Regex::new(r"\.snapshot").unwrap()];
        let ids = Catalog::scan(root, &exts, &excludes).unwrap();

        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].as_str(), "keep/a.obj");
    }

    #[test]
    fn test_cache_round_trip_preserves_order() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("catalog.txt");

        // Deliberately unsorted: cached order is taken verbatim
        let ids = vec![JobId::new("z/1.obj"), JobId::new("a/2.obj")];
        Catalog::write_cache(&cache, &ids).unwrap();

        let loaded = Catalog::read_cache(&cache).unwrap();
        assert_eq!(loaded, ids);
    }

    #[test]
    fn test_load_prefers_cache_over_scan() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("meshes");
        touch(&root.join("real/file.obj"));

        let cache = dir.path().join("catalog.txt");
        let mut f = File::create(&cache).unwrap();
        writeln!(f, "cached/only.obj").unwrap();

        let exts = vec!["obj".to_string()];
        let catalog = Catalog::load(&cache, &root, &exts, &[]).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.ids()[0].as_str(), "cached/only.obj");
    }

    #[test]
    fn test_empty_cache_triggers_scan() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("meshes");
        touch(&root.join("real/file.obj"));

        let cache = dir.path().join("catalog.txt");
        File::create(&cache).unwrap();

        let exts = vec!["obj".to_string()];
        let catalog = Catalog::load(&cache, &root, &exts, &[]).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.ids()[0].as_str(), "real/file.obj");

        // Scan must have refreshed the cache
        let cached = fs::read_to_string(&cache).unwrap();
        assert_eq!(cached.trim(), "real/file.obj");
    }

    #[test]
    fn test_missing_root_and_cache_is_fatal() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("absent.txt");
        let root = dir.path().join("no-such-root");

        let exts = vec!["obj".to_string()];
        let err = Catalog::load(&cache, &root, &exts, &[]).unwrap_err();
        assert!(matches!(err, CatalogError::RootUnavailable { .. }));
    }
}
