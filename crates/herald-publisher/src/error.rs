//! Error types for publisher clients.

use thiserror::Error;

/// Errors returned by a [`Publisher`](crate::Publisher).
#[derive(Debug, Error)]
pub enum PublishError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform answered with an error status.
    #[error("platform error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header).
        retry_after_secs: Option<u64>,
    },

    /// Response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The platform refused the content or credential.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl PublishError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::Api { status, .. } => *status >= 500,
            Self::RateLimited { .. } => true,
            Self::InvalidResponse(_) | Self::Rejected(_) => false,
        }
    }
}
