//! `queue` crate: in-process job queue between the HTTP surface and the
//! engine.
//!
//! Producers enqueue through a cloneable [`QueueHandle`]; a fixed pool of
//! tokio workers pulls jobs from a bounded channel and hands them to a
//! [`JobHandler`]. Handlers decide between retrying and discarding a failed
//! job; jobs out of attempts are dead-lettered.

pub mod error;
pub mod queue;

pub use error::{JobError, QueueError};
pub use queue::{DeadLetter, Job, JobHandler, JobQueue, QueueConfig, QueueHandle};
