//! Configuration types for remesh-batch
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - RANK / WORLD_SIZE environment handling for multi-node runs

use crate::error::ConfigError;
use clap::{Parser, ValueEnum};
use regex::Regex;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 256;

/// Voxel size handed to the remesh worker as its third argument
pub const DEFAULT_VOXEL_SIZE: f64 = 0.005;

/// Default per-job retry ceiling
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default ledger flush interval in seconds
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 300;

/// Distributed batch runner for mesh remeshing jobs
#[derive(Parser, Debug, Clone)]
#[command(
    name = "remesh-batch",
    version,
    about = "Distributed batch runner for mesh remeshing jobs",
    long_about = "Distributes remesh jobs (one input mesh -> one output mesh) across \
                  cooperating node processes and local worker threads.\n\n\
                  The node's shard is selected by RANK / WORLD_SIZE (environment or flags). \
                  Completed work is tracked in per-rank progress files and a cluster-shared \
                  completion ledger, so re-invoking the same command resumes where the \
                  previous run stopped.",
    after_help = "EXAMPLES:\n    \
        remesh-batch /data/meshes -o /data/remeshes\n    \
        RANK=2 WORLD_SIZE=8 remesh-batch /data/meshes -o /data/remeshes --strategy size-balanced\n    \
        remesh-batch /data/meshes -o /data/remeshes --retry-failed\n    \
        remesh-batch sample /data/meshes --every 25",
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
pub struct CliArgs {
    /// Input root containing the source meshes
    #[arg(value_name = "INPUT_ROOT")]
    pub input_root: Option<PathBuf>,

    /// Subcommand (sample, etc.)
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Output root for remeshed files (mirrors the input tree)
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_root: Option<PathBuf>,

    /// Directory for progress files, catalog cache, and ledger
    /// (must be on a filesystem shared by all ranks)
    #[arg(long, default_value = ".remesh-state", value_name = "DIR")]
    pub state_dir: PathBuf,

    /// Catalog cache file (defaults to <state-dir>/relative_file_list.txt)
    #[arg(long, value_name = "FILE")]
    pub cache: Option<PathBuf>,

    /// Completion ledger file (defaults to <state-dir>/completed.ledger)
    #[arg(long, value_name = "FILE")]
    pub ledger: Option<PathBuf>,

    /// Comma-separated extension allowlist for catalog scans
    #[arg(long, default_value = "obj,ply", value_name = "EXTS")]
    pub extensions: String,

    /// Exclude job ids matching pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Number of parallel worker slots
    #[arg(
        short = 'w',
        long,
        default_value_t = default_workers(),
        value_name = "NUM"
    )]
    pub workers: usize,

    /// Work distribution across local workers
    #[arg(long, value_enum, default_value = "dynamic")]
    pub mode: ExecMode,

    /// How the catalog is partitioned across ranks
    #[arg(long, value_enum, default_value = "round-robin")]
    pub strategy: ShardStrategy,

    /// Measure every k-th file for size-balanced sharding (1 = measure all)
    #[arg(long, default_value = "50", value_name = "K")]
    pub sample_every: usize,

    /// Process at most N jobs from this rank's shard
    #[arg(long, value_name = "NUM")]
    pub limit: Option<usize>,

    /// Ignore progress files and ledger; rerun everything in the shard
    #[arg(long)]
    pub force: bool,

    /// Only rerun jobs recorded as failed (below the retry ceiling)
    #[arg(long)]
    pub retry_failed: bool,

    /// Give up on a job after this many failures
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES, value_name = "NUM")]
    pub max_retries: u32,

    /// Ledger flush interval in seconds
    #[arg(long, default_value_t = DEFAULT_FLUSH_INTERVAL_SECS, value_name = "SECS")]
    pub flush_interval: u64,

    /// This node's rank (overrides the RANK environment variable)
    #[arg(long, value_name = "NUM")]
    pub rank: Option<usize>,

    /// Total cooperating nodes (overrides the WORLD_SIZE environment variable)
    #[arg(long, value_name = "NUM")]
    pub world_size: Option<usize>,

    /// External worker program
    #[arg(long, default_value = "blender", value_name = "PROG")]
    pub worker_cmd: String,

    /// Python worker script passed to Blender
    #[arg(long, default_value = "remesh_worker.py", value_name = "FILE")]
    pub worker_script: PathBuf,

    /// Invoke the worker as `PROG INPUT OUTPUT VOXEL` without the Blender wrapper
    #[arg(long)]
    pub raw_worker: bool,

    /// Voxel size handed to the remesh worker
    #[arg(long, default_value_t = DEFAULT_VOXEL_SIZE, value_name = "SIZE")]
    pub voxel_size: f64,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (per-job logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Subcommands
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Report per-category job counts and size statistics
    Sample {
        /// Input root containing the source meshes
        #[arg(value_name = "INPUT_ROOT")]
        input_root: PathBuf,

        /// Measure every k-th file (1 = measure all)
        #[arg(long, default_value = "50", value_name = "K")]
        every: usize,

        /// Directory holding the catalog cache
        #[arg(long, default_value = ".remesh-state", value_name = "DIR")]
        state_dir: PathBuf,

        /// Comma-separated extension allowlist for catalog scans
        #[arg(long, default_value = "obj,ply", value_name = "EXTS")]
        extensions: String,
    },
}

/// Catalog partitioning strategy across ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShardStrategy {
    /// Job at catalog index i goes to rank i mod world_size
    RoundRobin,
    /// Catalog split into world_size contiguous blocks
    Contiguous,
    /// Greedy longest-processing-time-first over file sizes
    SizeBalanced,
}

/// Work distribution across local worker slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecMode {
    /// Single shared queue; workers pull until empty
    Dynamic,
    /// Static split of the job list; each slot drains its own sub-list
    Fixed,
}

fn default_workers() -> usize {
    // The external remesh step is CPU bound, so one slot per core
    // (capped - Blender instances are memory hungry)
    num_cpus::get().min(8)
}

/// How the external worker process is invoked
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Program to execute (default: blender)
    pub program: String,

    /// Python worker script (ignored in raw mode)
    pub script: PathBuf,

    /// Skip the Blender wrapper and pass paths directly
    pub raw: bool,

    /// Voxel size argument
    pub voxel_size: f64,
}

impl WorkerCommand {
    /// Argument vector for one job invocation
    ///
    /// Wrapped:  PROG --background --python SCRIPT -- INPUT OUTPUT VOXEL
    /// Raw:      PROG INPUT OUTPUT VOXEL
    pub fn args_for(&self, input: &std::path::Path, output: &std::path::Path) -> Vec<String> {
        let voxel = self.voxel_size.to_string();
        if self.raw {
            vec![
                input.display().to_string(),
                output.display().to_string(),
                voxel,
            ]
        } else {
            vec![
                "--background".to_string(),
                "--python".to_string(),
                self.script.display().to_string(),
                "--".to_string(),
                input.display().to_string(),
                output.display().to_string(),
                voxel,
            ]
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Input root containing source meshes
    pub input_root: PathBuf,

    /// Output root mirroring the input tree
    pub output_root: PathBuf,

    /// Shared state directory
    pub state_dir: PathBuf,

    /// Catalog cache file
    pub cache_path: PathBuf,

    /// Completion ledger file
    pub ledger_path: PathBuf,

    /// Cost cache file for size-balanced sharding
    pub cost_cache_path: PathBuf,

    /// Lowercased extension allowlist (no leading dots)
    pub extensions: Vec<String>,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Number of parallel worker slots
    pub worker_count: usize,

    /// Local work distribution mode
    pub mode: ExecMode,

    /// Cross-rank partitioning strategy
    pub strategy: ShardStrategy,

    /// Sampling stride for size measurement
    pub sample_every: usize,

    /// Optional cap on jobs taken from the shard
    pub limit: Option<usize>,

    /// Ignore prior state and rerun everything
    pub force: bool,

    /// Only rerun previously-failed jobs
    pub retry_failed: bool,

    /// Per-job retry ceiling
    pub max_retries: u32,

    /// Ledger flush interval
    pub flush_interval: Duration,

    /// This node's rank
    pub rank: usize,

    /// Total cooperating nodes
    pub world_size: usize,

    /// External worker invocation
    pub worker: WorkerCommand,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl BatchConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let input_root = args.input_root.ok_or(ConfigError::MissingInputRoot)?;
        // clap enforces -o; the Option only exists for subcommand_negates_reqs
        let output_root = args.output_root.ok_or(ConfigError::MissingOutputRoot)?;

        let rank = match args.rank {
            Some(r) => r,
            None => env_usize("RANK", 0)?,
        };
        let world_size = match args.world_size {
            Some(w) => w,
            None => env_usize("WORLD_SIZE", 1)?,
        };

        if world_size == 0 {
            return Err(ConfigError::InvalidWorldSize { world_size });
        }
        if rank >= world_size {
            return Err(ConfigError::InvalidRank { rank, world_size });
        }

        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }

        if args.force && args.retry_failed {
            return Err(ConfigError::ConflictingRunModes);
        }

        let extensions = parse_extensions(&args.extensions)?;

        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let cache_path = args
            .cache
            .unwrap_or_else(|| args.state_dir.join("relative_file_list.txt"));
        let ledger_path = args
            .ledger
            .unwrap_or_else(|| args.state_dir.join("completed.ledger"));
        let cost_cache_path = args.state_dir.join("file_sizes.json");

        Ok(Self {
            input_root,
            output_root,
            state_dir: args.state_dir,
            cache_path,
            ledger_path,
            cost_cache_path,
            extensions,
            exclude_patterns,
            worker_count: args.workers,
            mode: args.mode,
            strategy: args.strategy,
            sample_every: args.sample_every.max(1),
            limit: args.limit,
            force: args.force,
            retry_failed: args.retry_failed,
            max_retries: args.max_retries,
            flush_interval: Duration::from_secs(args.flush_interval),
            rank,
            world_size,
            worker: WorkerCommand {
                program: args.worker_cmd,
                script: args.worker_script,
                raw: args.raw_worker,
                voxel_size: args.voxel_size,
            },
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }

    /// Path of this rank's progress file
    pub fn progress_path(&self) -> PathBuf {
        self.state_dir.join(format!("progress_rank{}.json", self.rank))
    }
}

/// Parse a comma-separated extension list into a lowercased, dot-stripped allowlist
pub fn parse_extensions(raw: &str) -> Result<Vec<String>, ConfigError> {
    let exts: Vec<String> = raw
        .split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    if exts.is_empty() {
        return Err(ConfigError::EmptyExtensionList {
            raw: raw.to_string(),
        });
    }
    Ok(exts)
}

/// Read an integer environment variable with a default for absent values.
/// A present-but-unparsable value is a configuration error, not a silent default.
fn env_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidEnvVar { name, value: v }),
        Err(_) => Ok(default),
    }
}
