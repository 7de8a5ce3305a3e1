//! Error types for the scheduling services.

use herald_queue::QueueError;
use herald_store::{PostId, StoreError};
use thiserror::Error;

/// Errors that can occur in scheduler, worker, sweeper and admin operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The requested publish time is not acceptable.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Post not found.
    #[error("post not found: {0}")]
    NotFound(PostId),

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The post or job is in a state that does not allow the operation.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The post's job has already been picked up by a worker.
    #[error("publishing already in progress: {0}")]
    PublishInProgress(String),

    /// The post itself is malformed.
    #[error("invalid post: {0}")]
    InvalidPost(String),

    /// The request arguments are not usable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The queue rejected the operation.
    #[error("queue unavailable: {0}")]
    QueueUnavailable(#[source] QueueError),

    /// A job payload could not be decoded.
    #[error("invalid job payload: {0}")]
    InvalidPayload(#[source] QueueError),

    /// Post store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<QueueError> for SchedulerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(id) => Self::JobNotFound(id.to_string()),
            QueueError::JobActive(id) => Self::PublishInProgress(id.to_string()),
            QueueError::InvalidState { id, state } => {
                Self::InvalidTransition(format!("job {} is {}", id, state))
            }
            QueueError::Unsupported(msg) => Self::InvalidRequest(msg),
            e @ QueueError::InvalidPayload { .. } => Self::InvalidPayload(e),
            e => Self::QueueUnavailable(e),
        }
    }
}

impl SchedulerError {
    /// Whether the error comes from infrastructure rather than the request.
    ///
    /// Infrastructure errors fail a job so the queue retries it.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::QueueUnavailable(_) | Self::Store(_) | Self::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_queue::{JobId, JobState};

    #[test]
    fn test_queue_error_mapping() {
        let id = JobId::new("publish:p1");

        assert!(matches!(
            SchedulerError::from(QueueError::NotFound(id.clone())),
            SchedulerError::JobNotFound(s) if s == "publish:p1"
        ));
        assert!(matches!(
            SchedulerError::from(QueueError::JobActive(id.clone())),
            SchedulerError::PublishInProgress(_)
        ));
        assert!(matches!(
            SchedulerError::from(QueueError::InvalidState {
                id,
                state: JobState::Waiting
            }),
            SchedulerError::InvalidTransition(_)
        ));
        assert!(matches!(
            SchedulerError::from(QueueError::Closed),
            SchedulerError::QueueUnavailable(_)
        ));
    }

    #[test]
    fn test_infrastructure_errors() {
        assert!(SchedulerError::from(QueueError::Closed).is_infrastructure());
        assert!(SchedulerError::Store(StoreError::Invalid("x".into())).is_infrastructure());
        assert!(!SchedulerError::InvalidSchedule("past".into()).is_infrastructure());
        assert!(!SchedulerError::NotFound(PostId::new("p")).is_infrastructure());
    }
}
