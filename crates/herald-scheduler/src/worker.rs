//! Publication worker: consumes due jobs and publishes posts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use herald_publisher::{Credential, PublishContent, Publisher};
use herald_queue::{QueueError, QueuedJob};
use herald_store::{DestinationStatus, PostDestination, PostId, PostStatus, StoreError};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::{
    Context, JobPayload, PublicationReport, PublishOutcome, SchedulerConfig, SchedulerError,
    SkipReason,
};

/// Shortest idle sleep between queue polls.
const MIN_IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Longest idle sleep between queue polls.
const MAX_IDLE_SLEEP: Duration = Duration::from_secs(1);

/// How long to sleep when nothing is due.
fn idle_sleep(now: DateTime<Utc>, next_run_at: Option<DateTime<Utc>>) -> Duration {
    match next_run_at {
        Some(next) => (next - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .clamp(MIN_IDLE_SLEEP, MAX_IDLE_SLEEP),
        None => MAX_IDLE_SLEEP,
    }
}

/// Publishes posts when their jobs come due.
pub struct PublicationWorker {
    ctx: Context,
    publisher: Arc<dyn Publisher>,
    config: SchedulerConfig,
}

impl PublicationWorker {
    pub fn new(ctx: Context, publisher: Arc<dyn Publisher>, config: SchedulerConfig) -> Self {
        Self {
            ctx,
            publisher,
            config,
        }
    }

    /// Run the consumer loop until shutdown, then wait for in-flight jobs.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let concurrency = self.config.worker_concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        info!(concurrency, "publication worker starting");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "publication task panicked");
                }
            }

            let permit = tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.ctx.queue.claim().await {
                Ok(Some(job)) => {
                    let worker = Arc::clone(&self);
                    tasks.spawn(async move {
                        worker.handle(job).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(QueueError::Closed) => {
                    info!("queue closed, worker stopping");
                    break;
                }
                Err(e) => {
                    drop(permit);
                    warn!(error = %e, "failed to claim job");
                }
            }

            let next = self.ctx.queue.next_run_at().await.ok().flatten();
            let sleep_for = idle_sleep(self.ctx.clock.now(), next);

            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "waiting for in-flight jobs");
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "publication task panicked");
            }
        }

        info!("publication worker shut down gracefully");
    }

    /// Process a claimed job and report the result to the queue.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, attempt = job.attempts))]
    pub async fn handle(&self, job: QueuedJob) {
        let report = match self.process(&job).await {
            Ok(()) => self.ctx.queue.complete(&job.id).await,
            Err(e @ SchedulerError::InvalidPayload(_)) => {
                error!(job_id = %job.id, error = %e, "discarding undecodable job");
                self.ctx.queue.discard(&job.id, &e.to_string()).await
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "job failed");
                self.ctx.queue.fail(&job.id, &e.to_string()).await
            }
        };

        if let Err(e) = report {
            error!(job_id = %job.id, error = %e, "failed to record job outcome");
        }
    }

    /// Execute a job's payload.
    ///
    /// Errors mean the job should be retried (or discarded, for undecodable
    /// payloads). Destination failures are not errors.
    pub async fn process(&self, job: &QueuedJob) -> Result<(), SchedulerError> {
        match job.decode::<JobPayload>()? {
            JobPayload::Publish {
                post_id,
                scheduled_for,
            } => {
                self.publish_post(&post_id, Some(scheduled_for)).await?;
                Ok(())
            }
            JobPayload::RecoverOverdue { post_ids } => self.recover(&post_ids).await,
        }
    }

    /// Publish overdue posts in order. One post's failure does not stop the
    /// rest; the job fails if any post hit an infrastructure error.
    async fn recover(&self, post_ids: &[PostId]) -> Result<(), SchedulerError> {
        info!(posts = post_ids.len(), "recovering overdue posts");
        let mut first_error = None;

        for post_id in post_ids {
            match self.publish_post(post_id, None).await {
                Ok(outcome) => debug!(post_id = %post_id, outcome = ?outcome, "recovered post"),
                Err(e) => {
                    error!(post_id = %post_id, error = %e, "failed to recover post");
                    if e.is_infrastructure() && first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Publish one post to every destination still waiting for it.
    ///
    /// With `scheduled_for`, the post is only published if it is still
    /// scheduled for that time; a job from before a reschedule is a no-op.
    #[tracing::instrument(skip(self), fields(post_id = %post_id))]
    pub async fn publish_post(
        &self,
        post_id: &PostId,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<PublishOutcome, SchedulerError> {
        let _guard = self.ctx.locks.lock(post_id).await;

        let Some(mut post) = self.ctx.store.find_post(post_id).await? else {
            info!(post_id = %post_id, "post no longer exists, skipping");
            return Ok(PublishOutcome::Skipped(SkipReason::Missing));
        };
        if post.deleted_at.is_some() {
            info!(post_id = %post_id, "post was retracted, skipping");
            return Ok(PublishOutcome::Skipped(SkipReason::Deleted));
        }
        if post.status != PostStatus::Scheduled {
            info!(post_id = %post_id, status = %post.status, "post not scheduled, skipping");
            return Ok(PublishOutcome::Skipped(SkipReason::NotScheduled {
                status: post.status,
            }));
        }
        // Recovery has no expected time, but the post must still be due
        let stale = match scheduled_for {
            Some(expected) => post.scheduled_at != Some(expected),
            None => !post.is_overdue(self.ctx.clock.now()),
        };
        if stale {
            info!(
                post_id = %post_id,
                scheduled_for = ?scheduled_for,
                scheduled_at = ?post.scheduled_at,
                "stale job from before a reschedule, skipping"
            );
            return Ok(PublishOutcome::Skipped(SkipReason::Stale {
                scheduled_for,
                scheduled_at: post.scheduled_at,
            }));
        }

        let rows = self.ctx.store.find_destinations(post_id).await?;
        let content = PublishContent::from(&post);
        let (open, finished): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|row| row.status.is_open());

        let results = join_all(open.into_iter().map(|row| self.deliver(&content, row))).await;

        let mut published = 0;
        let mut failed = 0;
        let mut first_error = None;
        let mut any_published = finished
            .iter()
            .any(|row| row.status == DestinationStatus::Published);

        for result in results {
            match result {
                Ok(row) if row.status == DestinationStatus::Published => {
                    published += 1;
                    any_published = true;
                }
                Ok(_) => failed += 1,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        // Rows already written stay final; a retry only picks up the rest
        if let Some(e) = first_error {
            return Err(SchedulerError::Store(e));
        }

        let now = self.ctx.clock.now();
        post.status = if any_published {
            PostStatus::Published
        } else {
            PostStatus::Failed
        };
        post.published_at = Some(now);
        post.updated_at = now;
        self.ctx.store.update_post(&post).await?;

        let report = PublicationReport {
            post_id: post_id.clone(),
            status: post.status,
            published,
            failed,
            skipped: finished.len(),
        };

        if report.is_partial() {
            warn!(
                post_id = %post_id,
                published = report.published,
                failed = report.failed,
                "post partially published"
            );
        } else {
            info!(
                post_id = %post_id,
                status = %report.status,
                published = report.published,
                failed = report.failed,
                "post processed"
            );
        }

        Ok(PublishOutcome::Delivered(report))
    }

    /// Publish to one destination and record the outcome on its row.
    async fn deliver(
        &self,
        content: &PublishContent,
        mut row: PostDestination,
    ) -> Result<PostDestination, StoreError> {
        let credential = Credential::from(&row);
        let result = self.publisher.publish(content, &credential).await;
        let now = self.ctx.clock.now();

        match result {
            Ok(remote) => {
                debug!(destination_id = %row.destination_id, remote_id = %remote.id, "destination published");
                row.mark_published(remote.id, now);
            }
            Err(e) => {
                warn!(destination_id = %row.destination_id, error = %e, "destination failed");
                row.mark_failed(e.to_string(), now);
            }
        }

        self.ctx.store.update_destination(&row).await?;
        Ok(row)
    }
}
