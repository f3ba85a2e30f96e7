//! Bounded job queue feeding the worker pool
//!
//! A thin wrapper over a crossbeam bounded channel with atomic counters.
//! Dynamic mode uses one shared queue fed by a feeder thread; fixed mode
//! creates one pre-loaded queue per worker. Workers poll with a timeout so
//! the shutdown flag is observed between jobs.

use crate::catalog::Job;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Result of polling the queue
#[derive(Debug)]
pub enum Poll {
    /// A job to execute
    Job(Job),

    /// Nothing available yet; re-check the shutdown flag and poll again
    Timeout,

    /// All senders dropped and the queue drained; the worker is done
    Closed,
}

/// Statistics for the job queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total jobs enqueued
    pub enqueued: AtomicU64,

    /// Total jobs dequeued
    pub dequeued: AtomicU64,
}

/// Bounded job queue
pub struct JobQueue {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    stats: Arc<QueueStats>,
}

impl JobQueue {
    /// Create a queue with the given capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Create a queue pre-loaded with a job list; the sender side is
    /// consumed so receivers see `Closed` once the list drains.
    pub fn preloaded(jobs: Vec<Job>) -> Self {
        let queue = Self::new(jobs.len());
        for job in jobs {
            // Capacity equals the job count, so send cannot block
            let _ = queue.sender.send(job);
            queue.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        }
        queue
    }

    /// Sender handle (clone per producer); drop all senders to close the queue
    pub fn sender(&self) -> JobQueueSender {
        JobQueueSender {
            sender: self.sender.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Receiver handle (clone per worker)
    pub fn receiver(&self) -> JobQueueReceiver {
        JobQueueReceiver {
            receiver: self.receiver.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Drop the internal sender so the queue closes once drained.
    /// Call after handing out receiver handles (and any feeder senders).
    pub fn close_intake(self) -> JobQueueReceiver {
        let Self {
            sender,
            receiver,
            stats,
        } = self;
        drop(sender);
        JobQueueReceiver { receiver, stats }
    }

    /// Queue statistics
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Current queue length
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// True if no jobs are waiting
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Handle for sending jobs to the queue
#[derive(Clone)]
pub struct JobQueueSender {
    sender: Sender<Job>,
    stats: Arc<QueueStats>,
}

impl JobQueueSender {
    /// Send a job, blocking while the queue is full.
    /// Returns Err if all receivers are gone.
    pub fn send(&self, job: Job) -> Result<(), ()> {
        self.sender.send(job).map_err(|_| ())?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Handle for receiving jobs from the queue
#[derive(Clone)]
pub struct JobQueueReceiver {
    receiver: Receiver<Job>,
    stats: Arc<QueueStats>,
}

impl JobQueueReceiver {
    /// Poll for the next job with a timeout
    pub fn poll(&self, timeout: Duration) -> Poll {
        match self.receiver.recv_timeout(timeout) {
            Ok(job) => {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                Poll::Job(job)
            }
            Err(RecvTimeoutError::Timeout) => Poll::Timeout,
            Err(RecvTimeoutError::Disconnected) => Poll::Closed,
        }
    }

    /// Current queue length
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// True if no jobs are waiting
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Job, JobId};
    use std::path::Path;

    fn job(name: &str) -> Job {
        Job::resolve(JobId::new(name), Path::new("/in"), Path::new("/out"))
    }

    #[test]
    fn test_preloaded_queue_drains_then_closes() {
        let queue = JobQueue::preloaded(vec![job("a"), job("b")]);
        let rx = queue.close_intake();

        let mut seen = Vec::new();
        loop {
            match rx.poll(Duration::from_millis(10)) {
                Poll::Job(j) => seen.push(j.id.as_str().to_string()),
                Poll::Closed => break,
                Poll::Timeout => panic!("preloaded queue should not time out"),
            }
        }
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn test_poll_timeout_on_open_empty_queue() {
        let queue = JobQueue::new(4);
        let rx = queue.receiver();
        assert!(matches!(rx.poll(Duration::from_millis(5)), Poll::Timeout));
    }

    #[test]
    fn test_stats_track_flow() {
        let queue = JobQueue::new(4);
        let tx = queue.sender();
        let rx = queue.receiver();
        let stats = queue.stats();

        tx.send(job("a")).unwrap();
        tx.send(job("b")).unwrap();
        assert!(matches!(rx.poll(Duration::from_millis(10)), Poll::Job(_)));

        assert_eq!(stats.enqueued.load(Ordering::Relaxed), 2);
        assert_eq!(stats.dequeued.load(Ordering::Relaxed), 1);
    }
}
