//! Scheduler: turns publish times into queue jobs.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use herald_queue::{JobId, QueueError};
use herald_store::{DestinationStatus, Post, PostDestination, PostId, PostQuery, PostStatus, StoreError};
use tracing::{debug, info, warn};

use crate::{
    Context, CreatedPost, InitializeReport, JobPayload, NewPost, RescheduleOutcome,
    ScheduleValidation, SchedulerConfig, SchedulerError, UnscheduleOutcome, publish_job_id,
};

/// Keeps queue jobs in step with post status.
///
/// Every mutating call holds the post's lock, so it never interleaves with
/// another scheduler call or with the worker publishing the same post.
#[derive(Clone)]
pub struct Scheduler {
    ctx: Context,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(ctx: Context, config: SchedulerConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Check that `time` is usable as a publish time.
    ///
    /// Times in the past are rejected unless `allow_past` (or the debug
    /// setting) is on. Times closer than the minimum lead time are accepted
    /// with a warning rendered in `time`'s own timezone.
    pub fn validate_schedule_time<Tz>(
        &self,
        time: &DateTime<Tz>,
        allow_past: bool,
    ) -> Result<ScheduleValidation, SchedulerError>
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let now = self.ctx.clock.now();
        let at = time.with_timezone(&Utc);

        if at < now && !(allow_past || self.config.allow_past_schedules) {
            return Err(SchedulerError::InvalidSchedule(format!(
                "scheduled time {} is in the past",
                time.format("%Y-%m-%d %H:%M:%S %Z")
            )));
        }

        let lead = (at - now).to_std().unwrap_or(Duration::ZERO);
        let warning = (at >= now && lead < self.config.min_lead_time).then(|| {
            format!(
                "scheduled time {} is less than {} minutes away",
                time.format("%Y-%m-%d %H:%M:%S %Z"),
                self.config.min_lead_time.as_secs() / 60
            )
        });

        Ok(ScheduleValidation { at, warning })
    }

    /// Schedule a post for `time`, replacing any job it already has.
    #[tracing::instrument(skip(self), fields(post_id = %post_id))]
    pub async fn schedule_post(
        &self,
        post_id: &PostId,
        time: DateTime<Utc>,
    ) -> Result<JobId, SchedulerError> {
        let _guard = self.ctx.locks.lock(post_id).await;
        let post = self.ctx.require_post(post_id).await?;
        self.schedule_locked(post, time).await
    }

    /// Move a post to a new time. Never leaves two jobs behind.
    #[tracing::instrument(skip(self), fields(post_id = %post_id))]
    pub async fn reschedule_post(
        &self,
        post_id: &PostId,
        new_time: DateTime<Utc>,
    ) -> Result<RescheduleOutcome, SchedulerError> {
        let _guard = self.ctx.locks.lock(post_id).await;
        let post = self.ctx.require_post(post_id).await?;
        let old_time = post.scheduled_at;

        let job_id = self.schedule_locked(post, new_time).await?;

        info!(post_id = %post_id, old_time = ?old_time, new_time = %new_time, "rescheduled post");
        Ok(RescheduleOutcome {
            job_id,
            old_time,
            new_time,
        })
    }

    /// Cancel a post's pending job and put a scheduled post back to draft.
    ///
    /// Calling this again is a no-op. Posts that already reached published
    /// or failed keep their status.
    #[tracing::instrument(skip(self), fields(post_id = %post_id))]
    pub async fn unschedule_post(
        &self,
        post_id: &PostId,
    ) -> Result<UnscheduleOutcome, SchedulerError> {
        let _guard = self.ctx.locks.lock(post_id).await;
        let mut post = self.ctx.require_post(post_id).await?;

        let job_id = publish_job_id(post_id);
        let removed_job = match self.ctx.queue.remove(&job_id).await {
            Ok(removed) => removed,
            // Already claimed; the worker sees the post is no longer scheduled
            Err(QueueError::JobActive(_)) => {
                warn!(post_id = %post_id, "job already active, reverting post anyway");
                false
            }
            Err(e) => return Err(SchedulerError::QueueUnavailable(e)),
        };

        if post.status != PostStatus::Scheduled {
            debug!(post_id = %post_id, status = %post.status, "post not scheduled, nothing to revert");
            return Ok(UnscheduleOutcome {
                removed_job,
                reverted: false,
            });
        }

        let now = self.ctx.clock.now();
        for mut row in self.ctx.store.find_destinations(post_id).await? {
            if row.status == DestinationStatus::Scheduled && row.reset(DestinationStatus::Pending, now) {
                self.ctx.store.update_destination(&row).await?;
            }
        }

        post.status = PostStatus::Draft;
        post.scheduled_at = None;
        post.updated_at = now;
        self.ctx.store.update_post(&post).await?;

        info!(post_id = %post_id, removed_job, "unscheduled post");
        Ok(UnscheduleOutcome {
            removed_job,
            reverted: true,
        })
    }

    /// Re-enqueue jobs for scheduled posts that lost theirs, e.g. after a
    /// restart with an empty queue.
    ///
    /// Only posts with a future publish time are considered; overdue posts
    /// belong to the sweeper.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self) -> Result<InitializeReport, SchedulerError> {
        let now = self.ctx.clock.now();
        let posts = self.ctx.store.find_posts(&PostQuery::upcoming(now)).await?;
        let mut report = InitializeReport::default();

        for candidate in posts {
            let _guard = self.ctx.locks.lock(&candidate.id).await;

            // Re-read under the lock; it may have changed since the scan
            let Some(post) = self.ctx.store.find_post(&candidate.id).await? else {
                continue;
            };
            let Some(at) = post.scheduled_at else {
                continue;
            };
            if post.status != PostStatus::Scheduled || post.deleted_at.is_some() {
                continue;
            }

            let job_id = publish_job_id(&post.id);
            if let Some(job) = self.ctx.queue.get(&job_id).await?
                && job.is_live()
            {
                report.already_queued += 1;
                continue;
            }

            self.enqueue_publish(&post.id, at).await?;
            report.scheduled_count += 1;
        }

        info!(
            scheduled_count = report.scheduled_count,
            already_queued = report.already_queued,
            "scheduler initialized"
        );
        Ok(report)
    }

    /// Create a post and its destination rows.
    ///
    /// With a publish time the post is written as scheduled and a job is
    /// enqueued. A queue failure at that point is logged, not returned: the
    /// post is already durable and the sweeper or the next initialization
    /// picks it up.
    #[tracing::instrument(skip(self, new_post), fields(owner_id = %new_post.owner_id))]
    pub async fn create_post(&self, new_post: NewPost) -> Result<CreatedPost, SchedulerError> {
        if new_post.body.trim().is_empty() && new_post.media.is_empty() {
            return Err(SchedulerError::InvalidPost("post has no content".to_string()));
        }
        if new_post.destinations.is_empty() {
            return Err(SchedulerError::InvalidPost("post has no destinations".to_string()));
        }

        let validation = match new_post.scheduled_at {
            Some(at) => Some(self.validate_schedule_time(&at, false)?),
            None => None,
        };

        let now = self.ctx.clock.now();
        let mut post = Post::draft(new_post.owner_id, new_post.body);
        post.title = new_post.title;
        post.kind = new_post.kind;
        post.media = new_post.media;
        post.created_at = now;
        post.updated_at = now;

        let row_status = if let Some(v) = &validation {
            post.status = PostStatus::Scheduled;
            post.scheduled_at = Some(v.at);
            DestinationStatus::Scheduled
        } else {
            DestinationStatus::Pending
        };

        let destinations: Vec<PostDestination> = new_post
            .destinations
            .into_iter()
            .map(|d| {
                let mut row = PostDestination::new(&post.id, d.destination_id, d.credential_ref);
                row.status = row_status;
                row.created_at = now;
                row.updated_at = now;
                row
            })
            .collect();

        self.ctx
            .store
            .insert_post(post.clone(), destinations.clone())
            .await
            .map_err(|e| match e {
                StoreError::Invalid(msg) => SchedulerError::InvalidPost(msg),
                e => SchedulerError::Store(e),
            })?;

        let mut job_id = None;
        if let Some(at) = post.scheduled_at {
            let _guard = self.ctx.locks.lock(&post.id).await;
            match self.enqueue_publish(&post.id, at).await {
                Ok(id) => job_id = Some(id),
                Err(e) => {
                    warn!(post_id = %post.id, error = %e, "failed to enqueue new post, leaving it for recovery");
                }
            }
        }

        info!(post_id = %post.id, status = %post.status, destinations = destinations.len(), "created post");
        Ok(CreatedPost {
            post,
            destinations,
            job_id,
            warning: validation.and_then(|v| v.warning),
        })
    }

    /// Replace the post's job and mark it scheduled. Caller holds the lock.
    async fn schedule_locked(
        &self,
        mut post: Post,
        time: DateTime<Utc>,
    ) -> Result<JobId, SchedulerError> {
        if post.status == PostStatus::Published {
            return Err(SchedulerError::InvalidTransition(format!(
                "post {} is already published",
                post.id
            )));
        }
        if post.deleted_at.is_some() {
            return Err(SchedulerError::InvalidTransition(format!(
                "post {} was retracted",
                post.id
            )));
        }

        let job_id = publish_job_id(&post.id);
        match self.ctx.queue.remove(&job_id).await {
            Ok(_) => {}
            Err(QueueError::JobActive(_)) => {
                return Err(SchedulerError::PublishInProgress(post.id.to_string()));
            }
            Err(e) => return Err(SchedulerError::QueueUnavailable(e)),
        }

        self.enqueue_publish(&post.id, time).await?;

        let now = self.ctx.clock.now();
        for mut row in self.ctx.store.find_destinations(&post.id).await? {
            if row.reset(DestinationStatus::Scheduled, now) {
                self.ctx.store.update_destination(&row).await?;
            }
        }

        post.status = PostStatus::Scheduled;
        post.scheduled_at = Some(time);
        post.updated_at = now;
        self.ctx.store.update_post(&post).await?;

        info!(post_id = %post.id, job_id = %job_id, scheduled_at = %time, "scheduled post");
        Ok(job_id)
    }

    /// Enqueue the publish job for `post_id` due at `at`.
    async fn enqueue_publish(
        &self,
        post_id: &PostId,
        at: DateTime<Utc>,
    ) -> Result<JobId, SchedulerError> {
        let payload = JobPayload::publish(post_id.clone(), at);
        let delay = (at - self.ctx.clock.now()).to_std().unwrap_or(Duration::ZERO);

        let job = self
            .ctx
            .queue
            .enqueue(payload.job_id(), payload.to_value()?, delay)
            .await
            .map_err(|e| match e {
                QueueError::JobActive(_) => SchedulerError::PublishInProgress(post_id.to_string()),
                e => SchedulerError::QueueUnavailable(e),
            })?;

        debug!(post_id = %post_id, job_id = %job.id, run_at = %job.run_at, "enqueued publish job");
        Ok(job.id)
    }
}
