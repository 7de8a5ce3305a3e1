//! Error types for the post store.

use thiserror::Error;

/// Errors that can occur in post store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record with the same identity already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The records handed to the store violate an invariant.
    #[error("invalid record: {0}")]
    Invalid(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Post missing from the store.
    pub fn post_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "post",
            id: id.to_string(),
        }
    }

    /// Destination row missing from the store.
    pub fn destination_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "post destination",
            id: id.to_string(),
        }
    }
}
