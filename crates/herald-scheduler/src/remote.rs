//! Maintenance of posts that are already live on their destinations.

use std::sync::Arc;

use futures_util::future::join_all;
use herald_publisher::{Credential, PublishContent, PublishError, Publisher};
use herald_queue::QueueError;
use herald_store::{DestinationStatus, PostDestination, PostId, PostStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Context, SchedulerError, publish_job_id};

/// Error text for rows that were retracted before they ever went out.
const RETRACTED_BEFORE_PUBLICATION: &str = "retracted before publication";

/// New content for a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUpdate {
    pub body: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Per-row outcome counts of a maintenance operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Rows that needed no remote call.
    pub untouched: usize,
}

fn is_live(row: &PostDestination) -> bool {
    row.status == DestinationStatus::Published && row.deleted_at.is_none()
}

/// Edits and retractions of published posts.
#[derive(Clone)]
pub struct RemoteMaintenance {
    ctx: Context,
    publisher: Arc<dyn Publisher>,
}

impl RemoteMaintenance {
    pub fn new(ctx: Context, publisher: Arc<dyn Publisher>) -> Self {
        Self { ctx, publisher }
    }

    /// Update a post's content and push the change to every destination it
    /// is live on. Failed edits are recorded on the row, which stays published.
    #[tracing::instrument(skip(self, update), fields(post_id = %post_id))]
    pub async fn edit_published(
        &self,
        post_id: &PostId,
        update: ContentUpdate,
    ) -> Result<MaintenanceReport, SchedulerError> {
        let _guard = self.ctx.locks.lock(post_id).await;
        let mut post = self.ctx.require_post(post_id).await?;

        if post.deleted_at.is_some() {
            return Err(SchedulerError::InvalidTransition(format!(
                "post {} was retracted",
                post_id
            )));
        }

        let now = self.ctx.clock.now();
        post.body = update.body;
        post.title = update.title;
        post.updated_at = now;
        self.ctx.store.update_post(&post).await?;

        let content = PublishContent::from(&post);
        let (live, rest): (Vec<_>, Vec<_>) = self
            .ctx
            .store
            .find_destinations(post_id)
            .await?
            .into_iter()
            .partition(is_live);

        let content = &content;
        let results = join_all(live.iter().map(|row| async move {
            match &row.remote_post_id {
                Some(remote_id) => {
                    self.publisher
                        .edit(remote_id, content, &Credential::from(row))
                        .await
                }
                None => Err(PublishError::InvalidResponse(
                    "published row has no remote id".to_string(),
                )),
            }
        }))
        .await;

        let mut report = MaintenanceReport {
            untouched: rest.len(),
            ..MaintenanceReport::default()
        };
        let now = self.ctx.clock.now();

        for (mut row, result) in live.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    report.succeeded += 1;
                    row.error = None;
                }
                Err(e) => {
                    warn!(destination_id = %row.destination_id, error = %e, "failed to edit remote post");
                    report.failed += 1;
                    row.error = Some(e.to_string());
                }
            }
            row.updated_at = now;
            self.ctx.store.update_destination(&row).await?;
        }

        info!(
            post_id = %post_id,
            succeeded = report.succeeded,
            failed = report.failed,
            "edited published post"
        );
        Ok(report)
    }

    /// Take a post down: cancel its job, delete it from every destination it
    /// is live on and fail the rows that never went out.
    ///
    /// The post is marked deleted once every live row was deleted.
    #[tracing::instrument(skip(self), fields(post_id = %post_id))]
    pub async fn retract_post(&self, post_id: &PostId) -> Result<MaintenanceReport, SchedulerError> {
        let _guard = self.ctx.locks.lock(post_id).await;
        let mut post = self.ctx.require_post(post_id).await?;

        match self.ctx.queue.remove(&publish_job_id(post_id)).await {
            Ok(_) => {}
            Err(QueueError::JobActive(_)) => {
                return Err(SchedulerError::PublishInProgress(post_id.to_string()));
            }
            Err(e) => return Err(SchedulerError::QueueUnavailable(e)),
        }

        let rows = self.ctx.store.find_destinations(post_id).await?;
        let mut report = MaintenanceReport::default();
        let now = self.ctx.clock.now();

        let mut live = Vec::new();
        for mut row in rows {
            if is_live(&row) && row.remote_post_id.is_some() {
                live.push(row);
            } else if row.status.is_open() {
                row.mark_failed(RETRACTED_BEFORE_PUBLICATION, now);
                self.ctx.store.update_destination(&row).await?;
                report.untouched += 1;
            } else {
                report.untouched += 1;
            }
        }

        let items: Vec<(String, Credential)> = live
            .iter()
            .filter_map(|row| {
                row.remote_post_id
                    .clone()
                    .map(|remote_id| (remote_id, Credential::from(row)))
            })
            .collect();

        let mut results: Vec<Option<Result<(), PublishError>>> =
            (0..items.len()).map(|_| None).collect();
        self.publisher
            .delete_batch(&items, &mut |index, result| {
                if let Some(slot) = results.get_mut(index) {
                    *slot = Some(result);
                }
            })
            .await;

        let now = self.ctx.clock.now();
        for (mut row, result) in live.into_iter().zip(results) {
            match result {
                Some(Ok(())) => {
                    report.succeeded += 1;
                    row.deleted_at = Some(now);
                    row.error = None;
                }
                Some(Err(e)) => {
                    warn!(destination_id = %row.destination_id, error = %e, "failed to delete remote post");
                    report.failed += 1;
                    row.error = Some(e.to_string());
                }
                None => {
                    report.failed += 1;
                    row.error = Some("delete was not attempted".to_string());
                }
            }
            row.updated_at = now;
            self.ctx.store.update_destination(&row).await?;
        }

        if matches!(post.status, PostStatus::Draft | PostStatus::Scheduled) {
            post.status = PostStatus::Failed;
        }
        if report.failed == 0 && post.deleted_at.is_none() {
            post.deleted_at = Some(now);
        }
        post.updated_at = now;
        self.ctx.store.update_post(&post).await?;

        info!(
            post_id = %post_id,
            deleted = report.succeeded,
            failed = report.failed,
            "retracted post"
        );
        Ok(report)
    }
}
