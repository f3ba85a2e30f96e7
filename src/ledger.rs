//! Cluster-shared completion ledger
//!
//! The ledger is a newline-delimited file of globally completed job ids in
//! a location visible to every rank. It is an eventually-consistent cache,
//! not a lock: absence of an entry proves nothing (it may not be flushed
//! yet), presence proves completion. Two ranks may both run a job in the
//! window before either flushes; that is accepted because the external
//! worker is idempotent and the output-existence check is the real
//! at-most-once filter. The ledger exists to avoid per-job existence
//! probes on slow shared filesystems.
//!
//! Concurrency control is append-only read-merge-append: a flush re-reads
//! the on-disk set, subtracts everything already on disk or previously
//! flushed by this rank, and appends only the delta. Concurrent writers
//! interleave whole lines but never lose each other's entries.

use crate::catalog::JobId;
use crate::error::StateError;
use chrono::Utc;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lines starting with this marker are ignored on read
const COMMENT_MARKER: char = '#';

/// In-memory view of the shared completion ledger
#[derive(Debug)]
pub struct CompletionLedger {
    path: PathBuf,

    /// Everything known complete: disk state at open plus local appends
    done: HashSet<String>,

    /// Entries this process has already written (or found on disk),
    /// used to compute flush deltas
    flushed: HashSet<String>,
}

impl CompletionLedger {
    /// Open the ledger, merging any existing on-disk entries.
    /// A missing file is an empty ledger; a corrupt line is skipped.
    pub fn open(path: &Path) -> Self {
        let disk = Self::read_disk(path);
        if !disk.is_empty() {
            info!(
                ledger = %path.display(),
                entries = disk.len(),
                "Loaded completion ledger"
            );
        }

        Self {
            path: path.to_path_buf(),
            done: disk.clone(),
            flushed: disk,
        }
    }

    /// Parse the on-disk entry set: one id per line, comments and blank
    /// lines skipped, duplicates collapsed. Unreadable file = empty set.
    fn read_disk(path: &Path) -> HashSet<String> {
        match fs::read_to_string(path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with(COMMENT_MARKER))
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                warn!(
                    ledger = %path.display(),
                    error = %e,
                    "Ledger unreadable, treating as empty"
                );
                HashSet::new()
            }
        }
    }

    /// True if the job is known complete (on disk or locally appended)
    pub fn contains(&self, id: &JobId) -> bool {
        self.done.contains(id.as_str())
    }

    /// Record completions in memory; durable only after the next flush
    pub fn append(&mut self, id: &JobId) {
        self.done.insert(id.as_str().to_string());
    }

    /// Snapshot of everything known complete
    pub fn snapshot(&self) -> HashSet<String> {
        self.done.clone()
    }

    /// Number of entries known complete
    pub fn len(&self) -> usize {
        self.done.len()
    }

    /// True if nothing is known complete
    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Flush unwritten completions to disk.
    ///
    /// Re-reads the current on-disk set (other ranks may have appended
    /// since open), then appends only entries that are neither on disk nor
    /// already flushed by this process. Returns the number of lines
    /// appended.
    pub fn flush(&mut self) -> Result<usize, StateError> {
        let disk = Self::read_disk(&self.path);

        // Adopt other ranks' completions into the local view
        for id in &disk {
            self.done.insert(id.clone());
        }

        let mut delta: Vec<&String> = self
            .done
            .iter()
            .filter(|id| !disk.contains(*id) && !self.flushed.contains(*id))
            .collect();

        if delta.is_empty() {
            return Ok(0);
        }
        delta.sort();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StateError::LedgerOpenFailed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let mut buf = String::with_capacity(delta.len() * 32);
        for id in &delta {
            buf.push_str(id);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())?;
        file.flush()?;

        let appended = delta.len();
        let owned: Vec<String> = delta.into_iter().cloned().collect();
        for id in owned {
            self.flushed.insert(id);
        }
        self.flushed.extend(disk);

        debug!(
            ledger = %self.path.display(),
            appended,
            "Ledger flushed"
        );

        Ok(appended)
    }

    /// Write a comment header noting a new run. Best-effort; failures are
    /// logged and ignored since comments carry no state.
    pub fn write_run_header(&self, rank: usize, world_size: usize) {
        let line = format!(
            "{} run start {} rank {}/{}\n",
            COMMENT_MARKER,
            Utc::now().to_rfc3339(),
            rank,
            world_size
        );

        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            file.write_all(line.as_bytes())
        })();

        if let Err(e) = result {
            warn!(ledger = %self.path.display(), error = %e, "Could not write run header");
        }
    }
}
