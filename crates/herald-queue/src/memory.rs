//! In-process delay queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    Clock, DelayQueue, JobCounts, JobId, JobState, Page, QueueError, QueuedJob, SystemClock,
};

/// Default number of attempts before a job is moved to failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(30);

/// Default upper bound on the retry delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(600);

/// Retry policy for queued jobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl QueueConfig {
    /// Delay before retrying a job that has failed `attempts` times.
    ///
    /// `base * 2^(attempts - 1)`, capped at `backoff_max`.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, QueuedJob>,
    paused: bool,
    closed: bool,
}

impl QueueState {
    fn open(&mut self) -> Result<&mut Self, QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        Ok(self)
    }

    fn readable(&self) -> Result<&Self, QueueError> {
        if self.closed {
            return Err(QueueError::Closed);
        }
        Ok(self)
    }

    fn active(&mut self, id: &JobId) -> Result<&mut QueuedJob, QueueError> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        if job.state != JobState::Active {
            return Err(QueueError::InvalidState {
                id: id.clone(),
                state: job.state,
            });
        }
        Ok(job)
    }
}

/// Delay queue held in memory. Jobs do not survive a restart; the scheduler's
/// startup reconciliation re-enqueues whatever the post store still expects.
#[derive(Debug)]
pub struct MemoryDelayQueue {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<QueueState>,
}

impl Default for MemoryDelayQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl MemoryDelayQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: RwLock::new(QueueState::default()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

fn after(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The timestamp a job's age is measured from.
fn age_anchor(job: &QueuedJob) -> DateTime<Utc> {
    match job.state {
        JobState::Completed | JobState::Failed => job.finished_at.unwrap_or(job.enqueued_at),
        JobState::Active => job.started_at.unwrap_or(job.enqueued_at),
        JobState::Waiting => job.enqueued_at,
    }
}

#[async_trait]
impl DelayQueue for MemoryDelayQueue {
    async fn enqueue(
        &self,
        id: JobId,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<QueuedJob, QueueError> {
        let mut guard = self.state.write().await;
        let state = guard.open()?;

        if let Some(existing) = state.jobs.get(&id)
            && existing.state == JobState::Active
        {
            return Err(QueueError::JobActive(id));
        }

        let now = self.clock.now();
        let job = QueuedJob {
            id: id.clone(),
            payload,
            state: JobState::Waiting,
            run_at: after(now, delay),
            enqueued_at: now,
            started_at: None,
            finished_at: None,
            attempts: 0,
            max_attempts: self.config.max_attempts,
            last_error: None,
        };

        let replaced = state.jobs.insert(id.clone(), job.clone()).is_some();
        debug!(job_id = %id, run_at = %job.run_at, replaced, "enqueued job");
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> Result<Option<QueuedJob>, QueueError> {
        let guard = self.state.read().await;
        Ok(guard.readable()?.jobs.get(id).cloned())
    }

    async fn retry(&self, id: &JobId) -> Result<QueuedJob, QueueError> {
        let mut guard = self.state.write().await;
        let state = guard.open()?;
        let now = self.clock.now();

        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        if job.state != JobState::Failed {
            return Err(QueueError::InvalidState {
                id: id.clone(),
                state: job.state,
            });
        }

        job.state = JobState::Waiting;
        job.run_at = now;
        job.attempts = 0;
        job.started_at = None;
        job.finished_at = None;

        info!(job_id = %id, "retrying failed job");
        Ok(job.clone())
    }

    async fn remove(&self, id: &JobId) -> Result<bool, QueueError> {
        let mut guard = self.state.write().await;
        let state = guard.open()?;

        match state.jobs.get(id).map(|j| j.state) {
            None => Ok(false),
            Some(JobState::Active) => Err(QueueError::JobActive(id.clone())),
            Some(_) => {
                state.jobs.remove(id);
                debug!(job_id = %id, "removed job");
                Ok(true)
            }
        }
    }

    async fn pause(&self) -> Result<(), QueueError> {
        let mut guard = self.state.write().await;
        guard.open()?.paused = true;
        info!("queue paused");
        Ok(())
    }

    async fn resume(&self) -> Result<(), QueueError> {
        let mut guard = self.state.write().await;
        guard.open()?.paused = false;
        info!("queue resumed");
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool, QueueError> {
        let guard = self.state.read().await;
        Ok(guard.readable()?.paused)
    }

    async fn clean(
        &self,
        max_age: Duration,
        max_count: usize,
        state: JobState,
    ) -> Result<Vec<JobId>, QueueError> {
        if state == JobState::Active {
            return Err(QueueError::Unsupported(
                "active jobs cannot be cleaned".to_string(),
            ));
        }

        let mut guard = self.state.write().await;
        let queue = guard.open()?;
        let now = self.clock.now();

        let mut candidates: Vec<(DateTime<Utc>, JobId)> = queue
            .jobs
            .values()
            .filter(|j| j.state == state && after(age_anchor(j), max_age) <= now)
            .map(|j| (age_anchor(j), j.id.clone()))
            .collect();
        candidates.sort();
        if max_count > 0 {
            candidates.truncate(max_count);
        }

        let removed: Vec<JobId> = candidates.into_iter().map(|(_, id)| id).collect();
        for id in &removed {
            queue.jobs.remove(id);
        }

        info!(state = %state, removed = removed.len(), "cleaned queue");
        Ok(removed)
    }

    async fn list(&self, state: JobState, page: Page) -> Result<Vec<QueuedJob>, QueueError> {
        let guard = self.state.read().await;
        let queue = guard.readable()?;

        let mut jobs: Vec<QueuedJob> = queue
            .jobs
            .values()
            .filter(|j| j.state == state)
            .cloned()
            .collect();

        match state {
            JobState::Waiting => jobs.sort_by(|a, b| (a.run_at, &a.id).cmp(&(b.run_at, &b.id))),
            JobState::Active => {
                jobs.sort_by(|a, b| (a.started_at, &a.id).cmp(&(b.started_at, &b.id)))
            }
            // Most recent first
            JobState::Completed | JobState::Failed => {
                jobs.sort_by(|a, b| (b.finished_at, &b.id).cmp(&(a.finished_at, &a.id)))
            }
        }

        Ok(jobs.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn counts(&self) -> Result<JobCounts, QueueError> {
        let guard = self.state.read().await;
        let queue = guard.readable()?;

        let mut counts = JobCounts {
            paused: queue.paused,
            ..JobCounts::default()
        };
        for job in queue.jobs.values() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn claim(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut guard = self.state.write().await;
        let queue = guard.open()?;
        if queue.paused {
            return Ok(None);
        }

        let now = self.clock.now();
        let next = queue
            .jobs
            .values()
            .filter(|j| j.is_due(now))
            .min_by(|a, b| (a.run_at, a.enqueued_at, &a.id).cmp(&(b.run_at, b.enqueued_at, &b.id)))
            .map(|j| j.id.clone());

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = queue.jobs.get_mut(&id) else {
            return Ok(None);
        };

        job.state = JobState::Active;
        job.started_at = Some(now);
        job.attempts += 1;

        debug!(job_id = %id, attempt = job.attempts, "claimed job");
        Ok(Some(job.clone()))
    }

    async fn complete(&self, id: &JobId) -> Result<QueuedJob, QueueError> {
        let mut guard = self.state.write().await;
        let now = self.clock.now();
        let job = guard.open()?.active(id)?;

        job.state = JobState::Completed;
        job.finished_at = Some(now);
        job.last_error = None;

        debug!(job_id = %id, "completed job");
        Ok(job.clone())
    }

    async fn fail(&self, id: &JobId, error: &str) -> Result<QueuedJob, QueueError> {
        let mut guard = self.state.write().await;
        let now = self.clock.now();
        let job = guard.open()?.active(id)?;

        job.last_error = Some(error.to_string());
        job.started_at = None;

        if job.attempts < job.max_attempts {
            let delay = self.config.retry_delay(job.attempts);
            job.state = JobState::Waiting;
            job.run_at = after(now, delay);
            warn!(
                job_id = %id,
                attempt = job.attempts,
                next_retry = %job.run_at,
                error = %error,
                "job failed, scheduled retry"
            );
        } else {
            job.state = JobState::Failed;
            job.finished_at = Some(now);
            warn!(job_id = %id, attempts = job.attempts, error = %error, "job failed permanently");
        }

        Ok(job.clone())
    }

    async fn discard(&self, id: &JobId, error: &str) -> Result<QueuedJob, QueueError> {
        let mut guard = self.state.write().await;
        let now = self.clock.now();
        let job = guard.open()?.active(id)?;

        job.state = JobState::Failed;
        job.last_error = Some(error.to_string());
        job.started_at = None;
        job.finished_at = Some(now);

        warn!(job_id = %id, error = %error, "job discarded");
        Ok(job.clone())
    }

    async fn next_run_at(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        let guard = self.state.read().await;
        let queue = guard.readable()?;
        if queue.paused {
            return Ok(None);
        }

        Ok(queue
            .jobs
            .values()
            .filter(|j| j.state == JobState::Waiting)
            .map(|j| j.run_at)
            .min())
    }

    async fn close(&self) {
        let mut state = self.state.write().await;
        if !state.closed {
            state.closed = true;
            info!(jobs = state.jobs.len(), "queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn queue() -> (MemoryDelayQueue, ManualClock) {
        let clock = ManualClock::starting_now();
        let queue = MemoryDelayQueue::with_clock(QueueConfig::default(), Arc::new(clock.clone()));
        (queue, clock)
    }

    fn id(s: &str) -> JobId {
        JobId::new(s)
    }

    #[test]
    fn test_retry_delay_doubles_until_capped() {
        let config = QueueConfig::default();
        let secs: Vec<u64> = (1..=7).map(|n| config.retry_delay(n).as_secs()).collect();
        assert_eq!(secs, vec![30, 60, 120, 240, 480, 600, 600]);
        assert_eq!(config.retry_delay(0).as_secs(), 30);
        assert_eq!(config.retry_delay(u32::MAX), config.backoff_max);
    }

    #[tokio::test]
    async fn test_claim_waits_for_run_at() {
        let (queue, clock) = queue();
        queue
            .enqueue(id("a"), json!({"n": 1}), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(queue.claim().await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(60));
        let job = queue.claim().await.unwrap().unwrap();
        assert_eq!(job.id, id("a"));
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.attempts, 1);
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_takes_earliest_due_first() {
        let (queue, clock) = queue();
        queue.enqueue(id("late"), json!(null), Duration::from_secs(20)).await.unwrap();
        queue.enqueue(id("early"), json!(null), Duration::from_secs(10)).await.unwrap();
        clock.advance(chrono::Duration::seconds(30));

        assert_eq!(queue.claim().await.unwrap().unwrap().id, id("early"));
        assert_eq!(queue.claim().await.unwrap().unwrap().id, id("late"));
    }

    #[tokio::test]
    async fn test_enqueue_replaces_waiting_but_not_active() {
        let (queue, _clock) = queue();
        queue.enqueue(id("a"), json!(1), Duration::from_secs(60)).await.unwrap();
        queue.enqueue(id("a"), json!(2), Duration::ZERO).await.unwrap();

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.waiting, 1);

        let job = queue.claim().await.unwrap().unwrap();
        assert_eq!(job.payload, json!(2));

        let err = queue.enqueue(id("a"), json!(3), Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, QueueError::JobActive(_)));
        let err = queue.remove(&id("a")).await.unwrap_err();
        assert!(matches!(err, QueueError::JobActive(_)));

        queue.complete(&id("a")).await.unwrap();
        let job = queue.enqueue(id("a"), json!(4), Duration::ZERO).await.unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn test_fail_backs_off_then_exhausts() {
        let (queue, clock) = queue();
        queue.enqueue(id("a"), json!(null), Duration::ZERO).await.unwrap();

        queue.claim().await.unwrap().unwrap();
        let job = queue.fail(&id("a"), "boom").await.unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.run_at - clock.now(), chrono::Duration::seconds(30));
        assert_eq!(job.last_error.as_deref(), Some("boom"));

        assert!(queue.claim().await.unwrap().is_none());
        clock.advance(chrono::Duration::seconds(30));
        queue.claim().await.unwrap().unwrap();
        let job = queue.fail(&id("a"), "boom").await.unwrap();
        assert_eq!(job.run_at - clock.now(), chrono::Duration::seconds(60));

        clock.advance(chrono::Duration::seconds(60));
        queue.claim().await.unwrap().unwrap();
        let job = queue.fail(&id("a"), "final").await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 3);
        assert!(job.finished_at.is_some());

        let failed = queue.list(JobState::Failed, Page::default()).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("final"));
    }

    #[tokio::test]
    async fn test_retry_only_accepts_failed_jobs() {
        let config = QueueConfig {
            max_attempts: 1,
            ..QueueConfig::default()
        };
        let queue = MemoryDelayQueue::with_clock(config, Arc::new(ManualClock::starting_now()));
        queue.enqueue(id("a"), json!(null), Duration::ZERO).await.unwrap();

        let err = queue.retry(&id("a")).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidState { state: JobState::Waiting, .. }));
        let err = queue.retry(&id("missing")).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));

        queue.claim().await.unwrap().unwrap();
        queue.fail(&id("a"), "nope").await.unwrap();

        let job = queue.retry(&id("a")).await.unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts, 0);
        assert!(queue.claim().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_discard_skips_retries() {
        let (queue, _clock) = queue();
        queue.enqueue(id("a"), json!("garbage"), Duration::ZERO).await.unwrap();
        queue.claim().await.unwrap().unwrap();

        let job = queue.discard(&id("a"), "undecodable payload").await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_requires_active() {
        let (queue, _clock) = queue();
        queue.enqueue(id("a"), json!(null), Duration::ZERO).await.unwrap();
        let err = queue.complete(&id("a")).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_remove_unknown_returns_false() {
        let (queue, _clock) = queue();
        assert!(!queue.remove(&id("nope")).await.unwrap());
        queue.enqueue(id("a"), json!(null), Duration::ZERO).await.unwrap();
        assert!(queue.remove(&id("a")).await.unwrap());
        assert!(queue.get(&id("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pause_blocks_claims() {
        let (queue, _clock) = queue();
        queue.enqueue(id("a"), json!(null), Duration::ZERO).await.unwrap();
        queue.pause().await.unwrap();

        assert!(queue.is_paused().await.unwrap());
        assert!(queue.claim().await.unwrap().is_none());
        assert!(queue.next_run_at().await.unwrap().is_none());
        assert!(queue.counts().await.unwrap().paused);

        queue.resume().await.unwrap();
        assert!(queue.next_run_at().await.unwrap().is_some());
        assert!(queue.claim().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clean_respects_age_and_limit() {
        let (queue, clock) = queue();
        for name in ["a", "b", "c"] {
            queue.enqueue(id(name), json!(null), Duration::ZERO).await.unwrap();
            queue.claim().await.unwrap().unwrap();
            queue.complete(&id(name)).await.unwrap();
            clock.advance(chrono::Duration::minutes(1));
        }

        let err = queue
            .clean(Duration::ZERO, 0, JobState::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Unsupported(_)));

        // a finished 3 minutes ago, c finished 1 minute ago
        let removed = queue
            .clean(Duration::from_secs(120), 0, JobState::Completed)
            .await
            .unwrap();
        assert_eq!(removed, vec![id("a"), id("b")]);

        queue.enqueue(id("d"), json!(null), Duration::ZERO).await.unwrap();
        queue.claim().await.unwrap().unwrap();
        queue.complete(&id("d")).await.unwrap();

        let removed = queue
            .clean(Duration::ZERO, 1, JobState::Completed)
            .await
            .unwrap();
        assert_eq!(removed, vec![id("c")]);
        assert_eq!(queue.counts().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_list_orders_and_paginates() {
        let (queue, clock) = queue();
        for (name, secs) in [("a", 30), ("b", 10), ("c", 20)] {
            queue
                .enqueue(id(name), json!(null), Duration::from_secs(secs))
                .await
                .unwrap();
        }

        let waiting = queue.list(JobState::Waiting, Page::default()).await.unwrap();
        let ids: Vec<&str> = waiting.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let page = queue
            .list(JobState::Waiting, Page { offset: 1, limit: 1 })
            .await
            .unwrap();
        assert_eq!(page[0].id, id("c"));

        clock.advance(chrono::Duration::seconds(60));
        for _ in 0..3 {
            let job = queue.claim().await.unwrap().unwrap();
            queue.complete(&job.id).await.unwrap();
            clock.advance(chrono::Duration::seconds(1));
        }
        let completed = queue.list(JobState::Completed, Page::first(2)).await.unwrap();
        let ids: Vec<&str> = completed.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_everything() {
        let (queue, _clock) = queue();
        queue.enqueue(id("a"), json!(null), Duration::ZERO).await.unwrap();
        queue.close().await;

        assert!(matches!(queue.claim().await, Err(QueueError::Closed)));
        assert!(matches!(queue.counts().await, Err(QueueError::Closed)));
        assert!(matches!(
            queue.enqueue(id("b"), json!(null), Duration::ZERO).await,
            Err(QueueError::Closed)
        ));
    }
}
