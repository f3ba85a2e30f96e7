//! Error types for remesh-batch
//!
//! This module defines the error hierarchy covering:
//! - Catalog discovery and cache errors
//! - Configuration and CLI errors
//! - Durable state (progress / ledger) errors
//! - Worker thread errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include context about what to do
//! - State-file corruption is recoverable (warn + empty state), catalog
//!   and configuration problems are fatal

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the remesh-batch application
#[derive(Error, Debug)]
pub enum BatchError {
    /// Catalog discovery/cache errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Durable state errors
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel closed unexpectedly
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

/// Catalog discovery and cache errors
///
/// The catalog cannot be partially known: any of these aborts the run
/// before shard planning.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Cache file exists but cannot be read
    #[error("Cannot read catalog cache '{path}': {reason}")]
    CacheUnreadable { path: PathBuf, reason: String },

    /// Cache file cannot be written after a cold scan
    #[error("Cannot write catalog cache '{path}': {reason}")]
    CacheWriteFailed { path: PathBuf, reason: String },

    /// No cache and the input root does not exist
    #[error("Input root '{path}' does not exist and no catalog cache is available")]
    RootUnavailable { path: PathBuf },

    /// Directory scan failed partway through
    #[error("Scan of '{path}' failed: {reason}")]
    ScanFailed { path: PathBuf, reason: String },

    /// Scanned path is not valid UTF-8 (job ids are text lines)
    #[error("Path '{path}' under the input root is not valid UTF-8")]
    NonUtf8Path { path: PathBuf },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// World size must be at least 1
    #[error("Invalid world size {world_size}: must be at least 1")]
    InvalidWorldSize { world_size: usize },

    /// Rank must be within [0, world_size)
    #[error("Invalid rank {rank}: must be in [0, {world_size})")]
    InvalidRank { rank: usize, world_size: usize },

    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid RANK / WORLD_SIZE environment value
    #[error("Environment variable {name} has invalid value '{value}'")]
    InvalidEnvVar { name: &'static str, value: String },

    /// No input root given and no usable catalog cache
    #[error("An input root is required (or an existing catalog cache)")]
    MissingInputRoot,

    /// No output root given
    #[error("An output root is required (-o/--output-root)")]
    MissingOutputRoot,

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Mutually exclusive run modes selected together
    #[error("--force and --retry-failed are mutually exclusive")]
    ConflictingRunModes,

    /// Size-balanced sharding was requested but no cost estimate is available
    #[error("Size-balanced sharding requires a cost estimate")]
    MissingCostEstimate,

    /// Extension list reduced to nothing after parsing
    #[error("Extension list '{raw}' contains no usable extensions")]
    EmptyExtensionList { raw: String },
}

/// Durable state (progress file / completion ledger) errors
///
/// Read-side corruption is handled at the call site (warn + empty state);
/// these variants surface write-side failures.
#[derive(Error, Debug)]
pub enum StateError {
    /// JSON serialization of a progress record failed
    #[error("Cannot serialize progress state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Atomic replace of a state file failed
    #[error("Cannot persist state file '{path}': {reason}")]
    PersistFailed { path: PathBuf, reason: String },

    /// Ledger file could not be opened for append
    #[error("Cannot open completion ledger '{path}': {reason}")]
    LedgerOpenFailed { path: PathBuf, reason: String },

    /// I/O error while flushing state
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Worker thread could not be created
    #[error("Failed to initialize worker {id}: {reason}")]
    InitFailed { id: usize, reason: String },

    /// Outcome channel closed while workers were still running
    #[error("Outcome channel closed unexpectedly")]
    OutcomeChannelClosed,

    /// Job feeder thread failed
    #[error("Job feeder failed: {reason}")]
    FeederFailed { reason: String },
}

/// Result type alias for BatchError
pub type Result<T> = std::result::Result<T, BatchError>;

/// The outcome of one external worker invocation
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Worker exited 0 and the output file was produced
    Completed {
        id: crate::catalog::JobId,
        elapsed: Duration,
    },

    /// Worker exited non-zero (or could not be spawned)
    Failed {
        id: crate::catalog::JobId,
        diagnostic: String,
    },
}

impl JobOutcome {
    /// Returns true if this outcome represents success
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }

    /// Returns the job id associated with this outcome
    pub fn id(&self) -> &crate::catalog::JobId {
        match self {
            JobOutcome::Completed { id, .. } => id,
            JobOutcome::Failed { id, .. } => id,
        }
    }
}
