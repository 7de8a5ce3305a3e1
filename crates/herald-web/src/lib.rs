//! JSON HTTP API for Herald.
//!
//! Exposes post creation and scheduling to clients, and the queue and
//! recovery operations to operators under `/admin`.

mod error;
mod routes;

pub use error::WebError;
pub use routes::{AppState, create_router, run_server};
