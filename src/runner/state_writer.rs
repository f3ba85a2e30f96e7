//! Single-writer thread for durable state
//!
//! All job outcomes funnel through one dedicated thread that owns both the
//! progress store and the completion ledger. This keeps file writes out of
//! the workers, serializes progress saves without locks, and gives the
//! ledger one natural place for its interval flush.
//!
//! The progress file is saved after every outcome (it is rank-exclusive
//! and small); the ledger is flushed on the configured interval and once
//! more during shutdown, after the remaining outcome messages have been
//! drained. That drain is what makes an interrupted run resumable: every
//! in-flight job that finished before the drain is durably recorded.

use crate::error::{JobOutcome, StateError};
use crate::ledger::CompletionLedger;
use crate::progress::ProgressStore;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long the writer waits for a message before checking the flush timer
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Messages accepted by the state writer thread
#[derive(Debug)]
pub enum StateMessage {
    /// A finished job
    Outcome(JobOutcome),

    /// Flush the ledger now
    Flush,

    /// Drain remaining messages, final-flush everything, and exit
    Shutdown,
}

/// Live counters shared with the coordinator (for progress display)
#[derive(Debug, Default)]
pub struct StateStats {
    /// Outcomes applied as completed
    pub completed: AtomicU64,

    /// Outcomes applied as failed
    pub failed: AtomicU64,

    /// Ledger entries appended over the run
    pub ledger_appended: AtomicU64,
}

/// Final accounting returned when the writer thread exits
#[derive(Debug)]
pub struct StateSummary {
    pub completed: u64,
    pub failed: u64,
    pub ledger_appended: u64,
}

/// The state writer thread plus its channels
pub struct StateWriter {
    handle: Option<JoinHandle<()>>,
    done_rx: Receiver<Result<StateSummary, StateError>>,
    control_tx: Sender<StateMessage>,
    outcome_tx: Sender<JobOutcome>,
    stats: Arc<StateStats>,
}

impl StateWriter {
    /// Spawn the writer thread, taking ownership of the progress store
    /// and the ledger.
    pub fn spawn(
        mut progress: ProgressStore,
        mut ledger: CompletionLedger,
        flush_interval: Duration,
    ) -> std::io::Result<Self> {
        let (control_tx, control_rx) = bounded::<StateMessage>(16);
        let (outcome_tx, outcome_rx) = bounded::<JobOutcome>(1024);
        let (done_tx, done_rx) = bounded::<Result<StateSummary, StateError>>(1);
        let stats = Arc::new(StateStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name("state-writer".to_string())
            .spawn(move || {
                let result = writer_loop(
                    &mut progress,
                    &mut ledger,
                    flush_interval,
                    control_rx,
                    outcome_rx,
                    stats_clone,
                );
                let _ = done_tx.send(result);
            })?;

        Ok(Self {
            handle: Some(handle),
            done_rx,
            control_tx,
            outcome_tx,
            stats,
        })
    }

    /// Sender that workers use to report outcomes
    pub fn outcome_sender(&self) -> Sender<JobOutcome> {
        self.outcome_tx.clone()
    }

    /// Live counters for progress display
    pub fn stats(&self) -> Arc<StateStats> {
        Arc::clone(&self.stats)
    }

    /// Request an immediate ledger flush
    pub fn request_flush(&self) {
        let _ = self.control_tx.send(StateMessage::Flush);
    }

    /// Shut down: drain remaining outcomes, final-flush, join the thread.
    ///
    /// The final flush is best-effort and bounded: if the writer does not
    /// complete within `timeout` (a stuck shared filesystem, typically),
    /// the thread is abandoned and the counters collected so far are
    /// returned, so the process can still exit.
    pub fn finish(mut self, timeout: Duration) -> Result<StateSummary, StateError> {
        // Drop our outcome sender so the writer sees the channel close
        // once all workers are gone.
        let _ = self.control_tx.send(StateMessage::Shutdown);
        drop(self.outcome_tx);

        match self.done_rx.recv_timeout(timeout) {
            Ok(result) => {
                if let Some(handle) = self.handle.take() {
                    // The loop already returned; this join is immediate
                    if handle.join().is_err() {
                        return Err(StateError::PersistFailed {
                            path: "<state writer>".into(),
                            reason: "state writer thread panicked".into(),
                        });
                    }
                }
                result
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "State writer did not finish in time, abandoning final flush"
                );
                let _ = self.handle.take(); // detach
                Ok(StateSummary {
                    completed: self.stats.completed.load(Ordering::Relaxed),
                    failed: self.stats.failed.load(Ordering::Relaxed),
                    ledger_appended: self.stats.ledger_appended.load(Ordering::Relaxed),
                })
            }
        }
    }
}

/// Apply one outcome to the progress store and ledger
fn apply_outcome(
    progress: &mut ProgressStore,
    ledger: &mut CompletionLedger,
    stats: &StateStats,
    outcome: JobOutcome,
) {
    match outcome {
        JobOutcome::Completed { id, .. } => {
            progress.mark_completed(&id);
            ledger.append(&id);
            stats.completed.fetch_add(1, Ordering::Relaxed);
        }
        JobOutcome::Failed { id, .. } => {
            let retries = progress.mark_failed(&id);
            stats.failed.fetch_add(1, Ordering::Relaxed);
            debug!(job = %id, retries, "Failure recorded");
        }
    }

    // Rank-exclusive file; saving every outcome keeps Scenario-D style
    // interrupts from losing finished work
    if let Err(e) = progress.save() {
        error!(error = %e, "Could not save progress state");
    }
}

/// Flush the ledger, folding the appended count into the stats
fn flush_ledger(ledger: &mut CompletionLedger, stats: &StateStats) {
    match ledger.flush() {
        Ok(appended) => {
            if appended > 0 {
                stats
                    .ledger_appended
                    .fetch_add(appended as u64, Ordering::Relaxed);
            }
        }
        Err(e) => warn!(error = %e, "Ledger flush failed"),
    }
}

/// Main writer loop
fn writer_loop(
    progress: &mut ProgressStore,
    ledger: &mut CompletionLedger,
    flush_interval: Duration,
    control_rx: Receiver<StateMessage>,
    outcome_rx: Receiver<JobOutcome>,
    stats: Arc<StateStats>,
) -> Result<StateSummary, StateError> {
    let mut last_flush = Instant::now();
    let mut shutting_down = false;

    loop {
        // Outcomes first; control messages are rare
        match outcome_rx.recv_timeout(IDLE_WAIT) {
            Ok(outcome) => apply_outcome(progress, ledger, &stats, outcome),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => shutting_down = true,
        }

        match control_rx.try_recv() {
            Ok(StateMessage::Outcome(outcome)) => {
                apply_outcome(progress, ledger, &stats, outcome)
            }
            Ok(StateMessage::Flush) => {
                flush_ledger(ledger, &stats);
                last_flush = Instant::now();
            }
            Ok(StateMessage::Shutdown) => shutting_down = true,
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => shutting_down = true,
        }

        if shutting_down {
            // Drain whatever outcomes are still queued so in-flight work
            // that finished during shutdown is not lost
            while let Ok(outcome) = outcome_rx.try_recv() {
                apply_outcome(progress, ledger, &stats, outcome);
            }
            break;
        }

        if last_flush.elapsed() >= flush_interval {
            flush_ledger(ledger, &stats);
            last_flush = Instant::now();
        }
    }

    // Final persistence pass
    progress.save()?;
    flush_ledger(ledger, &stats);

    let summary = StateSummary {
        completed: stats.completed.load(Ordering::Relaxed),
        failed: stats.failed.load(Ordering::Relaxed),
        ledger_appended: stats.ledger_appended.load(Ordering::Relaxed),
    };

    info!(
        completed = summary.completed,
        failed = summary.failed,
        ledger_appended = summary.ledger_appended,
        "State writer finished"
    );

    Ok(summary)
}
