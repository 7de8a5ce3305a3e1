//! Error types for the delay queue.

use thiserror::Error;

use crate::{JobId, JobState};

/// Errors that can occur in queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue was shut down.
    #[error("queue is closed")]
    Closed,

    /// The queue backend could not be reached.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The job is being processed and cannot be replaced or removed.
    #[error("job is active: {0}")]
    JobActive(JobId),

    /// The job is not in a state that allows the operation.
    #[error("job {id} is {state}")]
    InvalidState { id: JobId, state: JobState },

    /// The operation is not supported for the given arguments.
    #[error("unsupported queue operation: {0}")]
    Unsupported(String),

    /// The stored payload does not decode to the expected structure.
    #[error("invalid payload for job {id}: {source}")]
    InvalidPayload {
        id: JobId,
        #[source]
        source: serde_json::Error,
    },
}
