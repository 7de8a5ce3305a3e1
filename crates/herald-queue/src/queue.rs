//! The delay queue contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{JobCounts, JobId, JobState, Page, QueueError, QueuedJob};

/// A durable queue of delayed jobs keyed by caller-chosen ids.
///
/// Producers enqueue a job with a delay; consumers claim jobs once they are
/// due and report the outcome. Failed attempts are retried with backoff until
/// the attempt limit, after which the job stays in [`JobState::Failed`] until an
/// operator retries or cleans it.
#[async_trait]
pub trait DelayQueue: Send + Sync {
    /// Add a job that becomes due after `delay`.
    ///
    /// A waiting, completed or failed job with the same id is replaced. An
    /// active job with the same id fails with [`QueueError::JobActive`].
    async fn enqueue(
        &self,
        id: JobId,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<QueuedJob, QueueError>;

    async fn get(&self, id: &JobId) -> Result<Option<QueuedJob>, QueueError>;

    /// Move a failed job back to waiting, due immediately, with its attempt
    /// count reset.
    async fn retry(&self, id: &JobId) -> Result<QueuedJob, QueueError>;

    /// Remove a job. Returns `false` if there was no such job.
    async fn remove(&self, id: &JobId) -> Result<bool, QueueError>;

    /// Stop handing out jobs. Enqueueing still works.
    async fn pause(&self) -> Result<(), QueueError>;

    async fn resume(&self) -> Result<(), QueueError>;

    async fn is_paused(&self) -> Result<bool, QueueError>;

    /// Remove up to `max_count` jobs in `state` older than `max_age`
    /// (`0` means no limit). Returns the removed ids.
    async fn clean(
        &self,
        max_age: Duration,
        max_count: usize,
        state: JobState,
    ) -> Result<Vec<JobId>, QueueError>;

    async fn list(&self, state: JobState, page: Page) -> Result<Vec<QueuedJob>, QueueError>;

    async fn counts(&self) -> Result<JobCounts, QueueError>;

    /// Take the earliest due waiting job and mark it active.
    ///
    /// Returns `None` when nothing is due or the queue is paused.
    async fn claim(&self) -> Result<Option<QueuedJob>, QueueError>;

    /// Mark an active job completed.
    async fn complete(&self, id: &JobId) -> Result<QueuedJob, QueueError>;

    /// Record a failed attempt of an active job.
    ///
    /// The job goes back to waiting with a backoff delay, or to failed once
    /// its attempts are used up.
    async fn fail(&self, id: &JobId, error: &str) -> Result<QueuedJob, QueueError>;

    /// Record a failed attempt and move the job straight to failed, skipping
    /// any remaining retries.
    async fn discard(&self, id: &JobId, error: &str) -> Result<QueuedJob, QueueError>;

    /// When the next waiting job becomes due. `None` if there is none or the
    /// queue is paused.
    async fn next_run_at(&self) -> Result<Option<DateTime<Utc>>, QueueError>;

    /// Shut the queue down. Every later call fails with [`QueueError::Closed`].
    async fn close(&self);
}
