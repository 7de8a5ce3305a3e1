//! Publisher client for Herald.
//!
//! The delivery pipeline talks to the social platform only through the
//! [`Publisher`] trait. [`HttpPublisher`] is a reference client for a
//! Graph-style JSON API that retries transient failures with exponential
//! backoff.

mod error;
mod http;
mod publisher;
mod types;

pub use error::PublishError;
pub use http::{HttpPublisher, RetryPolicy};
pub use publisher::Publisher;
pub use types::{Credential, PublishContent, RemotePost};
