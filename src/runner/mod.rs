//! Worker pool and run orchestration
//!
//! - [`queue`]: bounded job queue feeding the pool
//! - [`worker`]: threads invoking the external remesh process
//! - [`state_writer`]: single thread owning progress + ledger persistence
//! - [`coordinator`]: composes a full run and handles interruption

pub mod coordinator;
pub mod queue;
pub mod state_writer;
pub mod worker;

pub use coordinator::{BatchCoordinator, RunResult};
pub use queue::{JobQueue, JobQueueReceiver, JobQueueSender, Poll};
pub use state_writer::{StateSummary, StateWriter};
pub use worker::Worker;
