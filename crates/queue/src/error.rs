//! Queue error types.

use thiserror::Error;

/// Returned by a [`crate::JobHandler`] for a job it could not finish.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Transient failure; the job is re-enqueued while it has attempts left.
    #[error("retry: {0}")]
    Retry(String),

    /// Permanent failure; the job is dropped.
    #[error("discard: {0}")]
    Discard(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is shut down")]
    Closed,

    #[error("queue is full")]
    Full,
}
