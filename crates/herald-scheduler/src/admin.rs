//! Operator surface over the queue and the recovery services.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_queue::{DelayQueue, JobCounts, JobId, JobState, Page, QueuedJob};
use herald_store::{Post, PostId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    InitializeReport, MissedReport, OverdueReport, OverdueSweeper, RescheduleOutcome, Scheduler,
    SchedulerError,
};

/// Which jobs to clean out of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanRequest {
    /// Only jobs older than this many seconds.
    #[serde(default)]
    pub max_age_secs: u64,
    /// At most this many jobs; 0 means no limit.
    #[serde(default)]
    pub max_count: usize,
    pub state: JobState,
}

/// Most recent jobs per state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateJobs {
    pub waiting: Vec<QueuedJob>,
    pub active: Vec<QueuedJob>,
    pub completed: Vec<QueuedJob>,
    pub failed: Vec<QueuedJob>,
}

/// Queue statistics for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    #[serde(flatten)]
    pub counts: JobCounts,
    pub jobs: StateJobs,
}

/// Administrative operations.
#[derive(Clone)]
pub struct Admin {
    queue: Arc<dyn DelayQueue>,
    scheduler: Scheduler,
    sweeper: OverdueSweeper,
}

impl Admin {
    pub fn new(queue: Arc<dyn DelayQueue>, scheduler: Scheduler, sweeper: OverdueSweeper) -> Self {
        Self {
            queue,
            scheduler,
            sweeper,
        }
    }

    pub async fn initialize(&self) -> Result<InitializeReport, SchedulerError> {
        self.scheduler.initialize().await
    }

    pub async fn check_overdue(&self) -> Result<OverdueReport, SchedulerError> {
        self.sweeper.check_overdue().await
    }

    pub async fn check_missed(&self) -> Result<MissedReport, SchedulerError> {
        self.sweeper.check_missed().await
    }

    /// Give a failed job a fresh set of attempts.
    #[tracing::instrument(skip(self))]
    pub async fn retry_job(&self, job_id: &JobId) -> Result<QueuedJob, SchedulerError> {
        let job = self.queue.retry(job_id).await?;
        info!(job_id = %job_id, "job retried by operator");
        Ok(job)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_job(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        if !self.queue.remove(job_id).await? {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        }
        info!(job_id = %job_id, "job removed by operator");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn clean_queue(&self, request: CleanRequest) -> Result<Vec<JobId>, SchedulerError> {
        let removed = self
            .queue
            .clean(
                Duration::from_secs(request.max_age_secs),
                request.max_count,
                request.state,
            )
            .await?;
        info!(state = %request.state, removed = removed.len(), "queue cleaned by operator");
        Ok(removed)
    }

    pub async fn pause(&self) -> Result<(), SchedulerError> {
        self.queue.pause().await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), SchedulerError> {
        self.queue.resume().await?;
        Ok(())
    }

    /// Counts per state plus the `limit` most recent jobs of each.
    pub async fn stats(&self, limit: usize) -> Result<QueueStats, SchedulerError> {
        let page = Page::first(limit);
        let counts = self.queue.counts().await?;

        let jobs = StateJobs {
            waiting: self.queue.list(JobState::Waiting, page).await?,
            active: self.queue.list(JobState::Active, page).await?,
            completed: self.queue.list(JobState::Completed, page).await?,
            failed: self.queue.list(JobState::Failed, page).await?,
        };

        Ok(QueueStats { counts, jobs })
    }

    pub async fn mark_failed(&self, post_id: &PostId, reason: &str) -> Result<Post, SchedulerError> {
        self.sweeper.mark_failed(post_id, reason).await
    }

    pub async fn reschedule_overdue(
        &self,
        post_id: &PostId,
        new_time: DateTime<Utc>,
    ) -> Result<RescheduleOutcome, SchedulerError> {
        self.sweeper.reschedule_overdue(post_id, new_time).await
    }
}
