//! Post and destination records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque post identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PostId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What kind of post this is on the destination platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    /// Regular feed post.
    #[default]
    Standard,
    /// Short vertical video.
    ShortVideo,
    /// Disappears after a platform-defined window.
    Ephemeral,
}

/// Reference to an already uploaded media asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Aggregate publication status of a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    /// Created without a schedule.
    #[default]
    Draft,
    /// A trigger time is set and a job should exist in the queue.
    Scheduled,
    /// At least one destination received the post.
    Published,
    /// No destination received the post, or an operator marked it failed.
    Failed,
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Published => "published",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status of a single per-destination publication attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationStatus {
    #[default]
    Pending,
    Scheduled,
    Published,
    Failed,
}

impl DestinationStatus {
    /// Whether the worker still has to attempt this destination.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }
}

/// A unit of content to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    /// Principal that owns this post. Ownership checks happen in the caller.
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    #[serde(default)]
    pub kind: PostKind,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Set when the owner retracted the post from its destinations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Create a new draft post with a generated id.
    pub fn draft(owner_id: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: PostId::generate(),
            owner_id: owner_id.into(),
            title: None,
            body: body.into(),
            kind: PostKind::Standard,
            media: Vec::new(),
            status: PostStatus::Draft,
            scheduled_at: None,
            published_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if this post is scheduled and its trigger time has passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == PostStatus::Scheduled && self.scheduled_at.is_some_and(|at| at <= now)
    }
}

/// One publication attempt of a post to one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDestination {
    /// Row id, `<post id>:<destination id>`.
    pub id: String,
    pub post_id: PostId,
    /// Target page/account on the platform.
    pub destination_id: String,
    /// Reference to the access credential for the destination.
    pub credential_ref: String,
    #[serde(default)]
    pub status: DestinationStatus,
    /// Identifier assigned by the platform on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_post_id: Option<String>,
    /// Human-readable reason for the last failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Set when the remote post was deleted at the owner's request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PostDestination {
    /// Create a pending row for `destination_id`.
    pub fn new(
        post_id: &PostId,
        destination_id: impl Into<String>,
        credential_ref: impl Into<String>,
    ) -> Self {
        let destination_id = destination_id.into();
        let now = Utc::now();
        Self {
            id: format!("{}:{}", post_id, destination_id),
            post_id: post_id.clone(),
            destination_id,
            credential_ref: credential_ref.into(),
            status: DestinationStatus::Pending,
            remote_post_id: None,
            error: None,
            created_at: now,
            updated_at: now,
            published_at: None,
            deleted_at: None,
        }
    }

    pub fn mark_published(&mut self, remote_post_id: impl Into<String>, at: DateTime<Utc>) {
        self.status = DestinationStatus::Published;
        self.remote_post_id = Some(remote_post_id.into());
        self.error = None;
        self.published_at = Some(at);
        self.updated_at = at;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.status = DestinationStatus::Failed;
        self.remote_post_id = None;
        self.error = Some(error.into());
        self.updated_at = at;
    }

    /// Move an unpublished row to `status`, clearing any previous error.
    ///
    /// Published rows are left untouched so a retry never re-publishes them.
    pub fn reset(&mut self, status: DestinationStatus, at: DateTime<Utc>) -> bool {
        if self.status == DestinationStatus::Published || self.status == status {
            return false;
        }
        self.status = status;
        self.error = None;
        self.updated_at = at;
        true
    }
}
