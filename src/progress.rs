//! Per-rank durable progress state
//!
//! Each rank owns exactly one progress file, so there is no cross-process
//! write contention. The file is JSON with two fields: the set of
//! completed job ids and a map of failed job ids to their retry counts.
//! A job id is never in both at once; `mark_completed` and `mark_failed`
//! enforce the exclusion.
//!
//! Loads are corrupt-tolerant: a missing or unparsable file is treated as
//! empty state with a warning, never as a fatal error. Saves go through a
//! temp file in the same directory followed by an atomic rename, so a
//! crash mid-write cannot leave state worse than the previous save.

use crate::catalog::JobId;
use crate::error::StateError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Serialized progress state for one rank
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Job ids this rank has completed
    #[serde(default)]
    pub completed: BTreeSet<String>,

    /// Failed job ids and how many times each has failed
    #[serde(default)]
    pub failed: BTreeMap<String, u32>,
}

impl ProgressRecord {
    /// True if the job is recorded as completed
    pub fn is_completed(&self, id: &JobId) -> bool {
        self.completed.contains(id.as_str())
    }

    /// Recorded failure count for the job (0 if never failed)
    pub fn retries(&self, id: &JobId) -> u32 {
        self.failed.get(id.as_str()).copied().unwrap_or(0)
    }

    /// Record a completion, clearing any failure history
    pub fn mark_completed(&mut self, id: &JobId) {
        self.failed.remove(id.as_str());
        self.completed.insert(id.as_str().to_string());
    }

    /// Record a failure, incrementing the retry count.
    /// Removes the job from `completed` if present so the sets stay disjoint.
    pub fn mark_failed(&mut self, id: &JobId) -> u32 {
        self.completed.remove(id.as_str());
        let count = self.failed.entry(id.as_str().to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Durable store wrapping a [`ProgressRecord`] and its on-disk location
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    record: ProgressRecord,
}

impl ProgressStore {
    /// Load the progress file at `path`. Missing or corrupt state becomes
    /// an empty record (with a warning for the corrupt case).
    pub fn load(path: &Path) -> Self {
        let record = match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(record) => {
                    debug!(path = %path.display(), "Progress state loaded");
                    record
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Progress file corrupt, starting from empty state"
                    );
                    ProgressRecord::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProgressRecord::default(),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Progress file unreadable, starting from empty state"
                );
                ProgressRecord::default()
            }
        };

        Self {
            path: path.to_path_buf(),
            record,
        }
    }

    /// Write the record atomically: temp file in the target directory,
    /// then rename over the destination.
    pub fn save(&self) -> Result<(), StateError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let json = serde_json::to_string_pretty(&self.record)?;

        let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| StateError::PersistFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| StateError::PersistFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    /// Record a completion (in memory; call `save` to persist)
    pub fn mark_completed(&mut self, id: &JobId) {
        self.record.mark_completed(id);
    }

    /// Record a failure, returning the new retry count
    pub fn mark_failed(&mut self, id: &JobId) -> u32 {
        self.record.mark_failed(id)
    }

    /// The in-memory authoritative record
    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mutual_exclusion() {
        let mut record = ProgressRecord::default();
        let id = JobId::new("cat/a.obj");

        assert_eq!(record.mark_failed(&id), 1);
        assert_eq!(record.mark_failed(&id), 2);
        assert_eq!(record.retries(&id), 2);
        assert!(!record.is_completed(&id));

        record.mark_completed(&id);
        assert!(record.is_completed(&id));
        assert_eq!(record.retries(&id), 0);

        // Failure after completion moves the id back out of completed
        assert_eq!(record.mark_failed(&id), 1);
        assert!(!record.is_completed(&id));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress_rank0.json");

        let mut store = ProgressStore::load(&path);
        store.mark_completed(&JobId::new("a/1.obj"));
        store.mark_failed(&JobId::new("a/2.obj"));
        store.mark_failed(&JobId::new("a/2.obj"));
        store.save().unwrap();

        let reloaded = ProgressStore::load(&path);
        assert!(reloaded.record().is_completed(&JobId::new("a/1.obj")));
        assert_eq!(reloaded.record().retries(&JobId::new("a/2.obj")), 2);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::load(&dir.path().join("absent.json"));
        assert!(store.record().completed.is_empty());
        assert!(store.record().failed.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress_rank0.json");
        fs::write(&path, "{\"completed\": [broken").unwrap();

        let store = ProgressStore::load(&path);
        assert!(store.record().completed.is_empty());

        // The store remains usable and can overwrite the corrupt file
        let mut store = store;
        store.mark_completed(&JobId::new("x.obj"));
        store.save().unwrap();
        let reloaded = ProgressStore::load(&path);
        assert!(reloaded.record().is_completed(&JobId::new("x.obj")));
    }

    #[test]
    fn test_save_creates_parent_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/state/progress_rank3.json");

        let mut store = ProgressStore::load(&path);
        store.mark_completed(&JobId::new("a.obj"));
        store.save().unwrap();
        assert!(path.exists());
    }
}
