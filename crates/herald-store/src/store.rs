//! The post store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Post, PostDestination, PostId, PostStatus, StoreError};

/// Filter for [`PostStore::find_posts`].
///
/// Results are ordered by `scheduled_at` ascending (unscheduled posts last),
/// then by `created_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostQuery {
    pub status: Option<PostStatus>,
    /// Only posts scheduled strictly after this instant.
    pub scheduled_after: Option<DateTime<Utc>>,
    /// Only posts scheduled at or before this instant.
    pub scheduled_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl PostQuery {
    /// All posts with the given status.
    pub fn with_status(status: PostStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Scheduled posts whose trigger time is at or before `now`.
    pub fn overdue(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(PostStatus::Scheduled),
            scheduled_before: Some(now),
            ..Self::default()
        }
    }

    /// Scheduled posts whose trigger time is after `now`.
    pub fn upcoming(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(PostStatus::Scheduled),
            scheduled_after: Some(now),
            ..Self::default()
        }
    }

    /// Check whether a post satisfies this query (ignores `limit`).
    pub fn matches(&self, post: &Post) -> bool {
        if self.status.is_some_and(|s| s != post.status) {
            return false;
        }
        if let Some(after) = self.scheduled_after
            && !post.scheduled_at.is_some_and(|at| at > after)
        {
            return false;
        }
        if let Some(before) = self.scheduled_before
            && !post.scheduled_at.is_some_and(|at| at <= before)
        {
            return false;
        }
        true
    }
}

/// Durable record of posts and their per-destination rows.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert a post and all of its destination rows atomically.
    async fn insert_post(
        &self,
        post: Post,
        destinations: Vec<PostDestination>,
    ) -> Result<(), StoreError>;

    async fn find_post(&self, id: &PostId) -> Result<Option<Post>, StoreError>;

    /// Overwrite an existing post.
    async fn update_post(&self, post: &Post) -> Result<(), StoreError>;

    async fn find_posts(&self, query: &PostQuery) -> Result<Vec<Post>, StoreError>;

    async fn find_destinations(&self, post_id: &PostId)
    -> Result<Vec<PostDestination>, StoreError>;

    /// Overwrite a single destination row.
    async fn update_destination(&self, destination: &PostDestination) -> Result<(), StoreError>;
}
