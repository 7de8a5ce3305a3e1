//! Overdue sweeper: finds scheduled posts the queue lost track of.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_queue::{JobId, JobState, QueueError, QueuedJob};
use herald_store::{DestinationStatus, Post, PostId, PostQuery, PostStatus};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
    Context, JobPayload, RECOVERY_JOB_ID, RescheduleOutcome, Scheduler, SchedulerConfig,
    SchedulerError, publish_job_id,
};

/// Result of an overdue check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueReport {
    /// The recovery job covering the overdue posts, if there were any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub post_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissedPost {
    pub post_id: PostId,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Scheduled posts that no live job will publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissedReport {
    pub missed_count: usize,
    pub missed: Vec<MissedPost>,
}

/// Detects overdue and orphaned posts and offers manual remediation.
#[derive(Clone)]
pub struct OverdueSweeper {
    ctx: Context,
    scheduler: Scheduler,
    config: SchedulerConfig,
}

impl OverdueSweeper {
    pub fn new(ctx: Context, scheduler: Scheduler, config: SchedulerConfig) -> Self {
        Self {
            ctx,
            scheduler,
            config,
        }
    }

    /// Enqueue one recovery job for every scheduled post whose time has
    /// passed, oldest first.
    ///
    /// A waiting recovery job is replaced by one covering its posts plus the
    /// newly overdue ones. A running job is left alone and the report counts
    /// only the overdue posts it covers.
    #[tracing::instrument(skip(self))]
    pub async fn check_overdue(&self) -> Result<OverdueReport, SchedulerError> {
        let now = self.ctx.clock.now();
        let overdue = self.ctx.store.find_posts(&PostQuery::overdue(now)).await?;

        if overdue.is_empty() {
            return Ok(OverdueReport {
                job_id: None,
                post_count: 0,
            });
        }

        let job_id = JobId::new(RECOVERY_JOB_ID);
        let mut post_ids: Vec<PostId> = overdue.iter().map(|p| p.id.clone()).collect();

        match self.ctx.queue.get(&job_id).await? {
            Some(job) if job.state == JobState::Active => {
                // Posts outside the running job are picked up by a later sweep
                let covered = recovery_post_ids(&job);
                let post_count = post_ids.iter().filter(|id| covered.contains(id)).count();
                info!(
                    job_id = %job_id,
                    covered = post_count,
                    overdue = post_ids.len(),
                    "recovery job already running"
                );
                return Ok(OverdueReport {
                    job_id: Some(job_id),
                    post_count,
                });
            }
            Some(job) if job.state == JobState::Waiting => {
                // Keep ids the waiting job already carries; the worker skips
                // any that are no longer scheduled
                for id in recovery_post_ids(&job) {
                    if !post_ids.contains(&id) {
                        post_ids.push(id);
                    }
                }
            }
            _ => {}
        }

        let post_count = overdue.len();
        let payload = JobPayload::RecoverOverdue { post_ids };
        let job = self
            .ctx
            .queue
            .enqueue(job_id, payload.to_value()?, Duration::ZERO)
            .await
            .map_err(SchedulerError::QueueUnavailable)?;

        info!(job_id = %job.id, posts = post_count, "enqueued overdue recovery");
        Ok(OverdueReport {
            job_id: Some(job.id),
            post_count,
        })
    }

    /// Report scheduled posts that have no live job.
    ///
    /// Only reports; recovery happens through [`Self::check_overdue`] and
    /// [`Scheduler::initialize`].
    #[tracing::instrument(skip(self))]
    pub async fn check_missed(&self) -> Result<MissedReport, SchedulerError> {
        let scheduled = self
            .ctx
            .store
            .find_posts(&PostQuery::with_status(PostStatus::Scheduled))
            .await?;

        let recovering = self.recovering_posts().await?;
        let mut report = MissedReport::default();

        for post in scheduled {
            if recovering.contains(&post.id) {
                continue;
            }
            let live = self
                .ctx
                .queue
                .get(&publish_job_id(&post.id))
                .await?
                .is_some_and(|job| job.is_live());
            if live {
                continue;
            }

            warn!(post_id = %post.id, scheduled_at = ?post.scheduled_at, "scheduled post has no job");
            report.missed.push(MissedPost {
                post_id: post.id,
                scheduled_at: post.scheduled_at,
            });
        }

        report.missed_count = report.missed.len();
        info!(missed = report.missed_count, "checked for missed posts");
        Ok(report)
    }

    /// Force a post and its unpublished destinations to failed without
    /// attempting to publish.
    #[tracing::instrument(skip(self), fields(post_id = %post_id))]
    pub async fn mark_failed(&self, post_id: &PostId, reason: &str) -> Result<Post, SchedulerError> {
        let _guard = self.ctx.locks.lock(post_id).await;
        let mut post = self.ctx.require_post(post_id).await?;

        if post.status == PostStatus::Published {
            return Err(SchedulerError::InvalidTransition(format!(
                "post {} is already published",
                post_id
            )));
        }

        match self.ctx.queue.remove(&publish_job_id(post_id)).await {
            Ok(_) => {}
            Err(QueueError::JobActive(_)) => {
                return Err(SchedulerError::PublishInProgress(post_id.to_string()));
            }
            Err(e) => return Err(SchedulerError::QueueUnavailable(e)),
        }

        let now = self.ctx.clock.now();
        for mut row in self.ctx.store.find_destinations(post_id).await? {
            if row.status != DestinationStatus::Published {
                row.mark_failed(reason, now);
                self.ctx.store.update_destination(&row).await?;
            }
        }

        post.status = PostStatus::Failed;
        post.updated_at = now;
        self.ctx.store.update_post(&post).await?;

        warn!(post_id = %post_id, reason, "post marked failed");
        Ok(post)
    }

    /// Move an overdue post to a new time, which must be in the future.
    #[tracing::instrument(skip(self), fields(post_id = %post_id))]
    pub async fn reschedule_overdue(
        &self,
        post_id: &PostId,
        new_time: DateTime<Utc>,
    ) -> Result<RescheduleOutcome, SchedulerError> {
        let now = self.ctx.clock.now();
        if new_time <= now {
            return Err(SchedulerError::InvalidSchedule(format!(
                "new time {} must be after {}",
                new_time, now
            )));
        }
        self.scheduler.reschedule_post(post_id, new_time).await
    }

    /// One sweep: warn about posts stuck past their time and enqueue recovery.
    pub async fn sweep(&self) -> Result<OverdueReport, SchedulerError> {
        let now = self.ctx.clock.now();
        let grace = chrono::Duration::from_std(self.config.sweep_interval)
            .unwrap_or(chrono::Duration::MAX);

        if let Some(cutoff) = now.checked_sub_signed(grace) {
            for post in self.ctx.store.find_posts(&PostQuery::overdue(cutoff)).await? {
                warn!(
                    post_id = %post.id,
                    scheduled_at = ?post.scheduled_at,
                    "post still scheduled past its publish time"
                );
            }
        }

        self.ctx.locks.prune();
        self.check_overdue().await
    }

    /// Sweep every `sweep_interval` until shutdown.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval = ?self.config.sweep_interval, "overdue sweeper starting");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.sweep().await {
                Ok(report) if report.post_count > 0 => {
                    info!(posts = report.post_count, job_id = ?report.job_id, "sweep found overdue posts");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "overdue sweep failed"),
            }

            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.sweep_interval) => {}
            }
        }

        info!("overdue sweeper shut down gracefully");
    }

    /// Posts covered by a live recovery job.
    async fn recovering_posts(&self) -> Result<HashSet<PostId>, SchedulerError> {
        let Some(job) = self.ctx.queue.get(&JobId::new(RECOVERY_JOB_ID)).await? else {
            return Ok(HashSet::new());
        };
        if !job.is_live() {
            return Ok(HashSet::new());
        }

        Ok(recovery_post_ids(&job).into_iter().collect())
    }
}

/// Post ids carried by a recovery job; empty if the payload is unusable.
fn recovery_post_ids(job: &QueuedJob) -> Vec<PostId> {
    match job.decode::<JobPayload>() {
        Ok(JobPayload::RecoverOverdue { post_ids }) => post_ids,
        Ok(JobPayload::Publish { .. }) | Err(_) => Vec::new(),
    }
}
