//! Scheduler types.

use chrono::{DateTime, Utc};
use herald_queue::JobId;
use herald_store::{MediaRef, Post, PostDestination, PostId, PostKind, PostStatus};
use serde::{Deserialize, Serialize};

/// Id of the consolidated overdue-recovery job.
pub const RECOVERY_JOB_ID: &str = "recover-overdue";

/// Deterministic id of a post's publish job.
pub fn publish_job_id(post_id: &PostId) -> JobId {
    JobId::new(format!("publish:{}", post_id))
}

/// What a queued job asks the worker to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// Publish one post that was scheduled for `scheduled_for`.
    Publish {
        post_id: PostId,
        scheduled_for: DateTime<Utc>,
    },
    /// Publish posts whose trigger time passed without delivery, oldest first.
    RecoverOverdue { post_ids: Vec<PostId> },
}

impl JobPayload {
    pub fn publish(post_id: PostId, scheduled_for: DateTime<Utc>) -> Self {
        Self::Publish {
            post_id,
            scheduled_for,
        }
    }

    /// The queue id this payload is stored under.
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Publish { post_id, .. } => publish_job_id(post_id),
            Self::RecoverOverdue { .. } => JobId::new(RECOVERY_JOB_ID),
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// An accepted publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleValidation {
    pub at: DateTime<Utc>,
    /// Non-fatal notice, e.g. the time is very close.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// One destination of a post being created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDestination {
    pub destination_id: String,
    pub credential_ref: String,
}

/// Request to create a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub owner_id: String,
    pub body: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub kind: PostKind,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    pub destinations: Vec<NewDestination>,
    /// Publish time. Without one the post is created as a draft.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// A freshly created post.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPost {
    pub post: Post,
    pub destinations: Vec<PostDestination>,
    /// The job enqueued for the post, if enqueueing succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleOutcome {
    pub job_id: JobId,
    pub old_time: Option<DateTime<Utc>>,
    pub new_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnscheduleOutcome {
    /// A pending job was removed from the queue.
    pub removed_job: bool,
    /// The post went back to draft.
    pub reverted: bool,
}

/// Result of re-deriving queue jobs from the post store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeReport {
    /// Jobs enqueued by this run.
    pub scheduled_count: usize,
    /// Scheduled posts that already had a live job.
    pub already_queued: usize,
}

/// Result of delivering one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationReport {
    pub post_id: PostId,
    pub status: PostStatus,
    /// Destinations published by this attempt.
    pub published: usize,
    /// Destinations that failed in this attempt.
    pub failed: usize,
    /// Destinations already finished before this attempt.
    pub skipped: usize,
}

impl PublicationReport {
    /// Some destinations succeeded and others did not.
    pub fn is_partial(&self) -> bool {
        self.published > 0 && self.failed > 0
    }
}

/// Why the worker left a post alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The post no longer exists.
    Missing,
    /// The post is not scheduled any more.
    NotScheduled { status: PostStatus },
    /// The job predates a reschedule.
    Stale {
        scheduled_for: Option<DateTime<Utc>>,
        scheduled_at: Option<DateTime<Utc>>,
    },
    /// The post was retracted.
    Deleted,
}

/// What happened when the worker processed a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    Delivered(PublicationReport),
    Skipped(SkipReason),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_wire_format() {
        let at = DateTime::parse_from_rfc3339("2030-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let payload = JobPayload::publish(PostId::new("p1"), at);

        assert_eq!(
            payload.to_value().unwrap(),
            json!({"type": "publish", "post_id": "p1", "scheduled_for": "2030-01-01T12:00:00Z"})
        );

        let recover = JobPayload::RecoverOverdue {
            post_ids: vec![PostId::new("a"), PostId::new("b")],
        };
        assert_eq!(
            recover.to_value().unwrap(),
            json!({"type": "recover_overdue", "post_ids": ["a", "b"]})
        );
    }

    #[test]
    fn test_payload_job_ids() {
        let payload = JobPayload::publish(PostId::new("p1"), Utc::now());
        assert_eq!(payload.job_id().as_str(), "publish:p1");

        let recover = JobPayload::RecoverOverdue { post_ids: vec![] };
        assert_eq!(recover.job_id().as_str(), RECOVERY_JOB_ID);
    }

    #[test]
    fn test_unknown_payload_type_rejected() {
        let result = serde_json::from_value::<JobPayload>(json!({"type": "explode"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_report() {
        let report = PublicationReport {
            post_id: PostId::new("p"),
            status: PostStatus::Published,
            published: 2,
            failed: 1,
            skipped: 0,
        };
        assert!(report.is_partial());
    }
}
