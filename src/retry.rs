//! Job classification and retry policy
//!
//! Before dispatch, every job in the shard is classified against the
//! progress record, the completion ledger, and the output filesystem.
//! Only `Pending` and `Retry` jobs reach the worker pool.
//!
//! The ledger check comes first because it is an in-memory set lookup;
//! the output-existence probe hits the (possibly networked) filesystem
//! and is skipped whenever cheaper evidence already settles the job.

use crate::catalog::JobId;
use crate::progress::ProgressRecord;

/// Why a job is skipped instead of dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Recorded complete in the progress file or the ledger
    Completed,

    /// The output file already exists on durable storage
    OutputExists,

    /// Failed `max_retries` times; needs an explicit force/reset
    MaxRetriesExceeded,
}

/// Classification of one job prior to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobClass {
    /// Do not dispatch
    Skip(SkipReason),

    /// Dispatch; this will be failure attempt number `attempt` if it fails again
    Retry { attempt: u32 },

    /// Never attempted; dispatch
    Pending,
}

impl JobClass {
    /// True if the job should be handed to the worker pool
    pub fn is_runnable(&self) -> bool {
        matches!(self, JobClass::Pending | JobClass::Retry { .. })
    }
}

/// Retry ceiling policy
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Classify a job. `in_ledger` is the ledger membership test;
    /// `output_exists` is evaluated lazily so the filesystem is only
    /// probed when no cheaper evidence settles the job.
    pub fn classify<F>(
        &self,
        id: &JobId,
        progress: &ProgressRecord,
        in_ledger: bool,
        output_exists: F,
    ) -> JobClass
    where
        F: FnOnce() -> bool,
    {
        if progress.is_completed(id) || in_ledger {
            return JobClass::Skip(SkipReason::Completed);
        }

        if output_exists() {
            return JobClass::Skip(SkipReason::OutputExists);
        }

        let retries = progress.retries(id);
        if retries == 0 {
            JobClass::Pending
        } else if retries >= self.max_retries {
            JobClass::Skip(SkipReason::MaxRetriesExceeded)
        } else {
            JobClass::Retry {
                attempt: retries + 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> JobId {
        JobId::new(s)
    }

    #[test]
    fn test_pending_when_unknown() {
        let policy = RetryPolicy::new(3);
        let progress = ProgressRecord::default();
        assert_eq!(
            policy.classify(&id("x"), &progress, false, || false),
            JobClass::Pending
        );
    }

    #[test]
    fn test_completed_in_progress_skips() {
        let policy = RetryPolicy::new(3);
        let mut progress = ProgressRecord::default();
        progress.mark_completed(&id("x"));
        assert_eq!(
            policy.classify(&id("x"), &progress, false, || false),
            JobClass::Skip(SkipReason::Completed)
        );
    }

    #[test]
    fn test_ledger_entry_skips_without_probing_output() {
        let policy = RetryPolicy::new(3);
        let progress = ProgressRecord::default();
        // The output probe must not run when the ledger already answers
        let class = policy.classify(&id("job7"), &progress, true, || {
            panic!("output probed despite ledger hit")
        });
        assert_eq!(class, JobClass::Skip(SkipReason::Completed));
    }

    #[test]
    fn test_output_existence_skips() {
        let policy = RetryPolicy::new(3);
        let progress = ProgressRecord::default();
        assert_eq!(
            policy.classify(&id("x"), &progress, false, || true),
            JobClass::Skip(SkipReason::OutputExists)
        );
    }

    #[test]
    fn test_retry_progression_to_ceiling() {
        let policy = RetryPolicy::new(3);
        let mut progress = ProgressRecord::default();
        let job = id("x");

        progress.mark_failed(&job);
        assert_eq!(
            policy.classify(&job, &progress, false, || false),
            JobClass::Retry { attempt: 2 }
        );

        progress.mark_failed(&job);
        assert_eq!(
            policy.classify(&job, &progress, false, || false),
            JobClass::Retry { attempt: 3 }
        );

        progress.mark_failed(&job);
        assert_eq!(
            policy.classify(&job, &progress, false, || false),
            JobClass::Skip(SkipReason::MaxRetriesExceeded)
        );
    }

    #[test]
    fn test_completion_resets_failure_history() {
        let policy = RetryPolicy::new(3);
        let mut progress = ProgressRecord::default();
        let job = id("x");

        progress.mark_failed(&job);
        progress.mark_failed(&job);
        progress.mark_completed(&job);

        assert_eq!(
            policy.classify(&job, &progress, false, || false),
            JobClass::Skip(SkipReason::Completed)
        );
    }

    #[test]
    fn test_is_runnable() {
        assert!(JobClass::Pending.is_runnable());
        assert!(JobClass::Retry { attempt: 2 }.is_runnable());
        assert!(!JobClass::Skip(SkipReason::Completed).is_runnable());
        assert!(!JobClass::Skip(SkipReason::OutputExists).is_runnable());
        assert!(!JobClass::Skip(SkipReason::MaxRetriesExceeded).is_runnable());
    }
}
