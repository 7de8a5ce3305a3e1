//! Delay queue for Herald.
//!
//! This crate defines the queue contract the delivery pipeline consumes:
//! - "deliver this job no earlier than T" with deterministic job ids
//! - retry with exponential backoff up to an attempt limit
//! - pause/resume, clean, and enumeration by state
//!
//! [`MemoryDelayQueue`] is an in-process implementation. It loses its contents
//! on restart; the scheduler re-derives queue state from the post store.

mod clock;
mod error;
mod job;
mod memory;
mod queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::QueueError;
pub use job::{JobCounts, JobId, JobState, Page, QueuedJob};
pub use memory::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_MAX_ATTEMPTS, MemoryDelayQueue, QueueConfig,
};
pub use queue::DelayQueue;
