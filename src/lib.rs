//! remesh-batch - Distributed Batch Runner for Mesh Remeshing
//!
//! A scheduler that distributes a large, statically enumerable set of
//! remesh jobs (one input mesh -> one output mesh) across cooperating
//! node processes and, within each node, across parallel worker threads
//! invoking an external remesh process. Every job eventually executes
//! exactly-effectively-once despite crashes, restarts, and per-job
//! failures.
//!
//! # Features
//!
//! - **Rank/World-Size Sharding**: Round-robin, contiguous, or
//!   size-balanced (LPT greedy) partitioning of the catalog across nodes,
//!   selected by `RANK` / `WORLD_SIZE`.
//!
//! - **Crash-Safe Resume**: Per-rank progress files plus a cluster-shared
//!   completion ledger; re-invoking the same command only runs what is
//!   left.
//!
//! - **Bounded Retry**: Failed jobs are retried on later passes up to a
//!   retry ceiling, then reported and skipped.
//!
//! - **Graceful Interruption**: Ctrl-C stops admission, lets in-flight
//!   jobs finish, and flushes state before exiting.
//!
//! # Architecture
//!
//! ```text
//!        ┌────────────┐     ┌──────────────┐     ┌──────────────┐
//!        │ JobCatalog │ ──▶ │ ShardPlanner │ ──▶ │ RetryPolicy  │
//!        │ (cached)   │     │ rank/world   │     │ classify     │
//!        └────────────┘     └──────────────┘     └──────┬───────┘
//!                                                       │ Pending/Retry
//!                                                       ▼
//!  ┌────────────────────────────────────────────────────────────────┐
//!  │                       Worker Pool                              │
//!  │  ┌─────────┐  ┌─────────┐          ┌─────────┐                 │
//!  │  │Worker 1 │  │Worker 2 │   ...    │Worker N │  (external      │
//!  │  └────┬────┘  └────┬────┘          └────┬────┘   remesh proc)  │
//!  │       └────────────┴─────────┬──────────┘                      │
//!  │                              ▼                                 │
//!  │                    ┌──────────────────┐                        │
//!  │                    │   State Writer   │                        │
//!  │                    │ progress + ledger│                        │
//!  │                    └──────────────────┘                        │
//!  └────────────────────────────────────────────────────────────────┘
//!                  │                          │
//!                  ▼                          ▼
//!        progress_rank{N}.json        completed.ledger (shared)
//! ```
//!
//! # Example
//!
//! ```bash
//! # Single node, eight local workers
//! remesh-batch /data/meshes -o /data/remeshes -w 8
//!
//! # One of eight nodes, size-balanced sharding
//! RANK=3 WORLD_SIZE=8 remesh-batch /data/meshes -o /data/remeshes \
//!     --strategy size-balanced
//!
//! # Rerun only previously-failed jobs
//! remesh-batch /data/meshes -o /data/remeshes --retry-failed
//! ```

pub mod catalog;
pub mod config;
pub mod cost;
pub mod error;
pub mod ledger;
pub mod progress;
pub mod report;
pub mod retry;
pub mod runner;
pub mod shard;

pub use catalog::{Catalog, Job, JobId};
pub use config::{BatchConfig, CliArgs, ExecMode, ShardStrategy};
pub use error::{BatchError, JobOutcome, Result};
pub use ledger::CompletionLedger;
pub use progress::{ProgressRecord, ProgressStore};
pub use retry::{JobClass, RetryPolicy, SkipReason};
pub use runner::{BatchCoordinator, RunResult};
