//! Batch coordinator - orchestrates one scheduling run
//!
//! The coordinator is responsible for:
//! - Building (or loading) the catalog and this rank's shard
//! - Classifying every job against progress, ledger, and output existence
//! - Dispatching runnable jobs to the worker pool (dynamic or fixed mode)
//! - Graceful interruption: stop admission, let in-flight jobs finish,
//!   flush state, exit cleanly so a rerun resumes
//! - Final statistics

use crate::catalog::{Catalog, Job};
use crate::config::{BatchConfig, ExecMode, ShardStrategy};
use crate::cost::CostCache;
use crate::error::{Result, WorkerError};
use crate::ledger::CompletionLedger;
use crate::progress::ProgressStore;
use crate::report::ProgressReporter;
use crate::retry::{JobClass, RetryPolicy, SkipReason};
use crate::runner::queue::JobQueue;
use crate::runner::state_writer::StateWriter;
use crate::runner::worker::Worker;
use crate::shard;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Ceiling on the shutdown-time state flush
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the wait loop refreshes the progress display
const WAIT_TICK: Duration = Duration::from_millis(100);

/// Result of a completed (or interrupted) run
#[derive(Debug)]
pub struct RunResult {
    /// Jobs assigned to this rank (after --limit)
    pub shard_size: usize,

    /// Jobs handed to the worker pool
    pub dispatched: usize,

    /// Jobs completed this run
    pub completed: u64,

    /// Jobs failed this run
    pub failed: u64,

    /// Skipped: already recorded complete (progress file or ledger)
    pub skipped_completed: usize,

    /// Skipped: output already on durable storage
    pub skipped_output_exists: usize,

    /// Skipped: retry ceiling reached
    pub skipped_exhausted: usize,

    /// Wall-clock time for the run
    pub duration: Duration,

    /// Whether the run was interrupted before draining the shard
    pub interrupted: bool,
}

impl RunResult {
    /// True when the shard held no runnable work at all
    pub fn nothing_to_do(&self) -> bool {
        self.dispatched == 0
    }
}

/// Coordinates one batch scheduling run
pub struct BatchCoordinator {
    config: Arc<BatchConfig>,
    shutdown: Arc<AtomicBool>,
}

impl BatchCoordinator {
    /// Create a coordinator for the given configuration
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the batch: catalog -> shard -> classify -> execute -> persist
    pub fn run(self, reporter: Option<&ProgressReporter>) -> Result<RunResult> {
        let started = Instant::now();
        let config = &self.config;

        info!(
            rank = config.rank,
            world_size = config.world_size,
            workers = config.worker_count,
            strategy = ?config.strategy,
            mode = ?config.mode,
            "Starting batch run"
        );

        let catalog = Catalog::load(
            &config.cache_path,
            &config.input_root,
            &config.extensions,
            &config.exclude_patterns,
        )?;

        if catalog.is_empty() {
            info!("Catalog is empty, nothing to do");
            return Ok(self.empty_result(0, started));
        }

        let costs = match config.strategy {
            ShardStrategy::SizeBalanced => Some(CostCache::load_or_measure(
                &config.cost_cache_path,
                &catalog,
                &config.input_root,
                config.sample_every,
            )),
            _ => None,
        };

        let mut shard_ids = shard::assign(
            &catalog,
            config.rank,
            config.world_size,
            config.strategy,
            costs.as_ref(),
        )?;

        if let Some(limit) = config.limit {
            if shard_ids.len() > limit {
                info!(limit, "Limiting shard");
                shard_ids.truncate(limit);
            }
        }
        let shard_size = shard_ids.len();

        let progress = ProgressStore::load(&config.progress_path());
        let ledger = CompletionLedger::open(&config.ledger_path);
        ledger.write_run_header(config.rank, config.world_size);

        // Classification pass: keep Pending and Retry jobs
        let policy = RetryPolicy::new(config.max_retries);
        let mut runnable: Vec<Job> = Vec::new();
        let mut skipped_completed = 0usize;
        let mut skipped_output_exists = 0usize;
        let mut skipped_exhausted = 0usize;

        for id in shard_ids {
            let job = Job::resolve(id, &config.input_root, &config.output_root);

            if config.force {
                runnable.push(job);
                continue;
            }

            let class = policy.classify(
                &job.id,
                progress.record(),
                ledger.contains(&job.id),
                || job.output_path.exists(),
            );

            match class {
                JobClass::Skip(SkipReason::Completed) => skipped_completed += 1,
                JobClass::Skip(SkipReason::OutputExists) => skipped_output_exists += 1,
                JobClass::Skip(SkipReason::MaxRetriesExceeded) => skipped_exhausted += 1,
                JobClass::Retry { attempt } => {
                    debug!(job = %job.id, attempt, "Scheduling retry");
                    runnable.push(job);
                }
                JobClass::Pending => {
                    if !config.retry_failed {
                        runnable.push(job);
                    }
                }
            }
        }

        info!(
            shard = shard_size,
            runnable = runnable.len(),
            skipped_completed,
            skipped_output_exists,
            skipped_exhausted,
            "Classification complete"
        );

        if runnable.is_empty() {
            return Ok(RunResult {
                shard_size,
                dispatched: 0,
                completed: 0,
                failed: 0,
                skipped_completed,
                skipped_output_exists,
                skipped_exhausted,
                duration: started.elapsed(),
                interrupted: self.shutdown.load(Ordering::SeqCst),
            });
        }

        let dispatched = runnable.len();
        if let Some(rep) = reporter {
            rep.begin(dispatched as u64);
        }

        let writer = StateWriter::spawn(progress, ledger, config.flush_interval)?;
        let stats = writer.stats();

        let (workers, feeder) = self.spawn_pool(runnable, &writer)?;

        // Wait for the pool to drain (or for the shutdown flag to empty it)
        loop {
            if let Some(rep) = reporter {
                rep.update(
                    stats.completed.load(Ordering::Relaxed),
                    stats.failed.load(Ordering::Relaxed),
                );
            }
            if workers.iter().all(|w| w.is_finished()) {
                break;
            }
            thread::sleep(WAIT_TICK);
        }

        if let Some(handle) = feeder {
            if handle.join().is_err() {
                warn!("Job feeder panicked");
            }
        }
        for worker in workers {
            if let Err(e) = worker.join() {
                warn!(error = %e, "Worker failed to join cleanly");
            }
        }

        // Everything still in the outcome channel is drained here, then
        // progress and ledger get their final flush
        let summary = writer.finish(SHUTDOWN_FLUSH_TIMEOUT)?;

        let interrupted = self.shutdown.load(Ordering::SeqCst);
        let duration = started.elapsed();

        info!(
            completed = summary.completed,
            failed = summary.failed,
            ledger_appended = summary.ledger_appended,
            duration_secs = duration.as_secs(),
            interrupted,
            "Batch run finished"
        );

        Ok(RunResult {
            shard_size,
            dispatched,
            completed: summary.completed,
            failed: summary.failed,
            skipped_completed,
            skipped_output_exists,
            skipped_exhausted,
            duration,
            interrupted,
        })
    }

    /// Spawn the worker pool in the configured mode
    fn spawn_pool(
        &self,
        runnable: Vec<Job>,
        writer: &StateWriter,
    ) -> Result<(Vec<Worker>, Option<JoinHandle<()>>)> {
        let config = &self.config;
        let command = Arc::new(config.worker.clone());
        let worker_count = config.worker_count.min(runnable.len()).max(1);
        let outcome_tx = writer.outcome_sender();

        let mut workers = Vec::with_capacity(worker_count);

        match config.mode {
            ExecMode::Dynamic => {
                // One shared queue; a feeder thread admits jobs so the
                // shutdown flag can cut admission without dropping the pool
                let queue = JobQueue::new(worker_count * 2);
                for id in 0..worker_count {
                    workers.push(Worker::spawn(
                        id,
                        Arc::clone(&command),
                        queue.receiver(),
                        outcome_tx.clone(),
                        Arc::clone(&self.shutdown),
                    )?);
                }

                let feeder_tx = queue.sender();
                drop(queue); // the feeder holds the only sender now

                let shutdown = Arc::clone(&self.shutdown);
                let feeder = thread::Builder::new()
                    .name("job-feeder".to_string())
                    .spawn(move || {
                        for job in runnable {
                            if shutdown.load(Ordering::Relaxed) {
                                debug!("Feeder stopping on shutdown signal");
                                break;
                            }
                            if feeder_tx.send(job).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|e| WorkerError::FeederFailed {
                        reason: e.to_string(),
                    })?;

                Ok((workers, Some(feeder)))
            }
            ExecMode::Fixed => {
                // Static contiguous split; each slot drains its own queue.
                // A slot with slow jobs cannot shed load to idle slots.
                let chunk = runnable.len().div_ceil(worker_count);
                let mut jobs = runnable;
                for id in 0..worker_count {
                    let rest = jobs.split_off(chunk.min(jobs.len()));
                    let mine = std::mem::replace(&mut jobs, rest);
                    if mine.is_empty() {
                        break;
                    }
                    let rx = JobQueue::preloaded(mine).close_intake();
                    workers.push(Worker::spawn(
                        id,
                        Arc::clone(&command),
                        rx,
                        outcome_tx.clone(),
                        Arc::clone(&self.shutdown),
                    )?);
                }

                Ok((workers, None))
            }
        }
    }

    fn empty_result(&self, shard_size: usize, started: Instant) -> RunResult {
        RunResult {
            shard_size,
            dispatched: 0,
            completed: 0,
            failed: 0,
            skipped_completed: 0,
            skipped_output_exists: 0,
            skipped_exhausted: 0,
            duration: started.elapsed(),
            interrupted: self.shutdown.load(Ordering::SeqCst),
        }
    }
}
