//! Per-job cost estimates for size-balanced sharding
//!
//! Job cost is approximated by input file size in bytes. Measuring every
//! file on a networked filesystem is expensive, so the cache supports a
//! deterministic sub-sample: every k-th catalog entry is stat'ed and the
//! sample mean stands in for unmeasured jobs. The constant-mean
//! extrapolation is an approximation with no verified error bound; it is
//! only used to bias shard assignment, never for correctness.
//!
//! File sizes are assumed stable across a run family, so the measured map
//! is persisted as JSON and reused by later runs.

use crate::catalog::{Catalog, JobId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Measured (and extrapolated) job costs in bytes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostCache {
    /// Byte size per measured job id
    sizes: BTreeMap<String, u64>,

    /// Sample mean, used for jobs absent from `sizes`
    fallback: u64,
}

impl CostCache {
    /// Load the cost cache from disk, or measure the catalog if the cache
    /// is missing or unreadable. A corrupt cache is re-measured, not fatal.
    pub fn load_or_measure(
        path: &Path,
        catalog: &Catalog,
        input_root: &Path,
        sample_every: usize,
    ) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str::<CostCache>(&content) {
                    Ok(cache) if !cache.sizes.is_empty() => {
                        info!(
                            cache = %path.display(),
                            measured = cache.sizes.len(),
                            "Loaded cost cache"
                        );
                        return cache;
                    }
                    Ok(_) => {
                        debug!(cache = %path.display(), "Cost cache empty, re-measuring");
                    }
                    Err(e) => {
                        warn!(
                            cache = %path.display(),
                            error = %e,
                            "Cost cache corrupt, re-measuring"
                        );
                    }
                },
                Err(e) => {
                    warn!(
                        cache = %path.display(),
                        error = %e,
                        "Cost cache unreadable, re-measuring"
                    );
                }
            }
        }

        let cache = Self::measure(catalog, input_root, sample_every);

        if let Err(e) = cache.save(path) {
            warn!(cache = %path.display(), error = %e, "Could not persist cost cache");
        }

        cache
    }

    /// Measure every `sample_every`-th catalog entry (1 = measure all).
    ///
    /// Files that cannot be stat'ed are skipped and fall back to the mean;
    /// a missing input will fail at execution time with a proper diagnostic.
    pub fn measure(catalog: &Catalog, input_root: &Path, sample_every: usize) -> Self {
        let stride = sample_every.max(1);
        let mut sizes = BTreeMap::new();
        let mut total: u64 = 0;

        for (idx, id) in catalog.iter().enumerate() {
            if idx % stride != 0 {
                continue;
            }
            match fs::metadata(input_root.join(id.as_str())) {
                Ok(meta) => {
                    sizes.insert(id.as_str().to_string(), meta.len());
                    total += meta.len();
                }
                Err(e) => {
                    debug!(job = %id, error = %e, "Could not stat input, using mean");
                }
            }
        }

        let fallback = if sizes.is_empty() {
            1
        } else {
            (total / sizes.len() as u64).max(1)
        };

        info!(
            measured = sizes.len(),
            of = catalog.len(),
            mean_bytes = fallback,
            "Cost measurement complete"
        );

        Self { sizes, fallback }
    }

    /// Persist the measured map as JSON
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }

    /// Cost of one job: measured size, or the sample mean
    pub fn cost(&self, id: &JobId) -> u64 {
        self.sizes
            .get(id.as_str())
            .copied()
            .unwrap_or(self.fallback)
            .max(1)
    }

    /// Number of jobs actually measured
    pub fn measured_count(&self) -> usize {
        self.sizes.len()
    }

    /// Sample mean used for unmeasured jobs
    pub fn fallback(&self) -> u64 {
        self.fallback
    }

    /// Construct a cache from known costs (tests, synthetic balancing)
    pub fn from_map(sizes: BTreeMap<String, u64>, fallback: u64) -> Self {
        Self { sizes, fallback }
    }
}

/// Per-category statistics for the `sample` subcommand
#[derive(Debug, Clone)]
pub struct CategoryStat {
    pub category: String,
    pub job_count: usize,
    pub sampled: usize,
    pub mean_bytes: u64,
}

/// Group the catalog by first path component and report sampled size stats.
///
/// Mirrors the old per-category benchmark report, re-expressed over byte
/// sizes: timing belongs to the external worker, size is what this tool
/// can observe cheaply.
pub fn category_report(
    catalog: &Catalog,
    input_root: &Path,
    sample_every: usize,
) -> Vec<CategoryStat> {
    let stride = sample_every.max(1);

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for id in catalog.iter() {
        *counts.entry(id.category()).or_insert(0) += 1;
    }

    let mut sampled: BTreeMap<&str, (usize, u64)> = BTreeMap::new();
    for (idx, id) in catalog.iter().enumerate() {
        if idx % stride != 0 {
            continue;
        }
        if let Ok(meta) = fs::metadata(input_root.join(id.as_str())) {
            let slot = sampled.entry(id.category()).or_insert((0, 0));
            slot.0 += 1;
            slot.1 += meta.len();
        }
    }

    counts
        .into_iter()
        .map(|(cat, job_count)| {
            let (n, bytes) = sampled.get(cat).copied().unwrap_or((0, 0));
            CategoryStat {
                category: cat.to_string(),
                job_count,
                sampled: n,
                mean_bytes: if n > 0 { bytes / n as u64 } else { 0 },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(root: &Path, rel: &str, len: usize) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = File::create(path).unwrap();
        f.write_all(&vec![0u8; len]).unwrap();
    }

    fn catalog_of(ids: &[&str]) -> Catalog {
        Catalog::from_ids(ids.iter().map(|s| JobId::new(*s)).collect())
    }

    #[test]
    fn test_measure_all() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a/x.obj", 100);
        write_file(dir.path(), "a/y.obj", 300);

        let catalog = catalog_of(&["a/x.obj", "a/y.obj"]);
        let cache = CostCache::measure(&catalog, dir.path(), 1);

        assert_eq!(cache.measured_count(), 2);
        assert_eq!(cache.cost(&JobId::new("a/x.obj")), 100);
        assert_eq!(cache.cost(&JobId::new("a/y.obj")), 300);
        assert_eq!(cache.fallback(), 200);
    }

    #[test]
    fn test_sampled_measure_extrapolates_mean() {
        let dir = tempdir().unwrap();
        for i in 0..4 {
            write_file(dir.path(), &format!("a/{i}.obj"), 100 * (i + 1));
        }

        let catalog = catalog_of(&["a/0.obj", "a/1.obj", "a/2.obj", "a/3.obj"]);
        let cache = CostCache::measure(&catalog, dir.path(), 2);

        // Indices 0 and 2 measured: sizes 100 and 300, mean 200
        assert_eq!(cache.measured_count(), 2);
        assert_eq!(cache.cost(&JobId::new("a/0.obj")), 100);
        assert_eq!(cache.cost(&JobId::new("a/1.obj")), 200);
        assert_eq!(cache.cost(&JobId::new("a/2.obj")), 300);
        assert_eq!(cache.cost(&JobId::new("a/3.obj")), 200);
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a/x.obj", 42);

        let catalog = catalog_of(&["a/x.obj"]);
        let cache_path = dir.path().join("sizes.json");

        let first = CostCache::load_or_measure(&cache_path, &catalog, dir.path(), 1);
        assert_eq!(first.cost(&JobId::new("a/x.obj")), 42);
        assert!(cache_path.exists());

        // Second load hits the cache even if the file is gone
        fs::remove_file(dir.path().join("a/x.obj")).unwrap();
        let second = CostCache::load_or_measure(&cache_path, &catalog, dir.path(), 1);
        assert_eq!(second.cost(&JobId::new("a/x.obj")), 42);
    }

    #[test]
    fn test_corrupt_cache_is_remeasured() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a/x.obj", 7);

        let cache_path = dir.path().join("sizes.json");
        fs::write(&cache_path, "{not json").unwrap();

        let catalog = catalog_of(&["a/x.obj"]);
        let cache = CostCache::load_or_measure(&cache_path, &catalog, dir.path(), 1);
        assert_eq!(cache.cost(&JobId::new("a/x.obj")), 7);
    }

    #[test]
    fn test_category_report() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "chairs/a.obj", 100);
        write_file(dir.path(), "chairs/b.obj", 200);
        write_file(dir.path(), "tables/c.obj", 400);

        let catalog = catalog_of(&["chairs/a.obj", "chairs/b.obj", "tables/c.obj"]);
        let stats = category_report(&catalog, dir.path(), 1);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].category, "chairs");
        assert_eq!(stats[0].job_count, 2);
        assert_eq!(stats[0].mean_bytes, 150);
        assert_eq!(stats[1].category, "tables");
        assert_eq!(stats[1].mean_bytes, 400);
    }
}
