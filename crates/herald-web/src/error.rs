//! Error types for the HTTP API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use herald_scheduler::SchedulerError;
use herald_store::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum WebError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Request that could not be understood.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl WebError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Scheduler(e) => match e {
                SchedulerError::InvalidSchedule(_)
                | SchedulerError::InvalidPost(_)
                | SchedulerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                SchedulerError::NotFound(_) | SchedulerError::JobNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                SchedulerError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
                SchedulerError::InvalidTransition(_) | SchedulerError::PublishInProgress(_) => {
                    StatusCode::CONFLICT
                }
                SchedulerError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                SchedulerError::InvalidPayload(_)
                | SchedulerError::Store(_)
                | SchedulerError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
