//! Worker threads executing the external remesh process
//!
//! Each worker:
//! - Pulls jobs from its queue (poll with timeout so shutdown is observed)
//! - Ensures the output's parent directory exists
//! - Invokes the external worker with (input, output, voxel-size)
//! - Classifies the exit status and forwards the outcome to the state writer
//!
//! The external call blocks the worker thread for the duration of the job;
//! that is intentional - the remesh step dominates wall-clock time and the
//! thread has nothing else to do.

use crate::catalog::Job;
use crate::config::WorkerCommand;
use crate::error::{JobOutcome, WorkerError};
use crate::runner::queue::{JobQueueReceiver, Poll};
use crossbeam_channel::Sender;
use std::fs;
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Maximum bytes of stderr carried in a failure diagnostic
const DIAGNOSTIC_LIMIT: usize = 200;

/// How long a worker waits on the queue before re-checking shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Statistics collected by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Jobs completed successfully
    pub completed: AtomicU64,

    /// Jobs that failed
    pub failed: AtomicU64,
}

/// A worker thread that executes remesh jobs
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a worker thread pulling from `queue_rx` and reporting
    /// outcomes on `outcome_tx`.
    pub fn spawn(
        id: usize,
        command: Arc<WorkerCommand>,
        queue_rx: JobQueueReceiver,
        outcome_tx: Sender<JobOutcome>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, WorkerError> {
        let stats = Arc::new(WorkerStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("remesh-{}", id))
            .spawn(move || {
                worker_loop(id, command, queue_rx, outcome_tx, shutdown, stats_clone)
            })
            .map_err(|e| WorkerError::InitFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    /// Worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Worker statistics
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// True once the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }

    /// Wait for the worker to finish
    pub fn join(mut self) -> Result<(), WorkerError> {
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| WorkerError::Panicked {
                id: self.id,
                message: "Worker thread panicked".into(),
            })?;
        }
        Ok(())
    }
}

/// Main worker loop
fn worker_loop(
    id: usize,
    command: Arc<WorkerCommand>,
    queue_rx: JobQueueReceiver,
    outcome_tx: Sender<JobOutcome>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
) {
    debug!(worker = id, "Worker starting");

    loop {
        // Stop admitting new jobs once interrupted; in-flight jobs have
        // already returned from execute_job by this point
        if shutdown.load(Ordering::Relaxed) {
            debug!(worker = id, "Worker stopping on shutdown signal");
            break;
        }

        let job = match queue_rx.poll(POLL_INTERVAL) {
            Poll::Job(job) => job,
            Poll::Timeout => continue,
            Poll::Closed => break,
        };

        let outcome = execute_job(&job, &command);

        match &outcome {
            JobOutcome::Completed { id: job_id, elapsed } => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker = id,
                    job = %job_id,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Job completed"
                );
            }
            JobOutcome::Failed { id: job_id, diagnostic } => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker = id, job = %job_id, diagnostic = %diagnostic, "Job failed");
            }
        }

        if outcome_tx.send(outcome).is_err() {
            // State writer gone; nothing sane left to do but stop
            warn!(worker = id, "Outcome channel closed, worker exiting");
            break;
        }
    }

    info!(
        worker = id,
        completed = stats.completed.load(Ordering::Relaxed),
        failed = stats.failed.load(Ordering::Relaxed),
        "Worker finished"
    );
}

/// Execute one job via the external worker process
fn execute_job(job: &Job, command: &WorkerCommand) -> JobOutcome {
    let started = Instant::now();

    // Idempotent; concurrent workers may race on shared parents
    if let Some(parent) = job.output_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            return JobOutcome::Failed {
                id: job.id.clone(),
                diagnostic: format!("cannot create output directory: {e}"),
            };
        }
    }

    let args = command.args_for(&job.input_path, &job.output_path);
    let output = Command::new(&command.program).args(&args).output();

    match output {
        Ok(out) if out.status.success() => JobOutcome::Completed {
            id: job.id.clone(),
            elapsed: started.elapsed(),
        },
        Ok(out) => {
            let code = out
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            JobOutcome::Failed {
                id: job.id.clone(),
                diagnostic: format!("exit {}: {}", code, truncate_stderr(&out.stderr)),
            }
        }
        Err(e) => JobOutcome::Failed {
            id: job.id.clone(),
            diagnostic: format!("cannot spawn '{}': {}", command.program, e),
        },
    }
}

/// Lossily decode stderr and truncate it to the diagnostic limit
fn truncate_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= DIAGNOSTIC_LIMIT {
        return text.to_string();
    }
    let mut cut = DIAGNOSTIC_LIMIT;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

/// Aggregate statistics from multiple workers
pub fn aggregate_stats(workers: &[Worker]) -> (u64, u64) {
    let mut completed = 0u64;
    let mut failed = 0u64;
    for worker in workers {
        completed += worker.stats.completed.load(Ordering::Relaxed);
        failed += worker.stats.failed.load(Ordering::Relaxed);
    }
    (completed, failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_stderr_short() {
        assert_eq!(truncate_stderr(b"  boom \n"), "boom");
    }

    #[test]
    fn test_truncate_stderr_long() {
        let long = "x".repeat(500);
        let out = truncate_stderr(long.as_bytes());
        assert_eq!(out.len(), DIAGNOSTIC_LIMIT + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_truncate_stderr_respects_char_boundary() {
        // Multi-byte characters straddling the limit must not split
        let long = "é".repeat(DIAGNOSTIC_LIMIT);
        let out = truncate_stderr(long.as_bytes());
        assert!(out.ends_with("..."));
        assert!(out.len() <= DIAGNOSTIC_LIMIT + 3);
    }

    #[test]
    fn test_worker_stats_aggregate_empty() {
        assert_eq!(aggregate_stats(&[]), (0, 0));
    }
}
