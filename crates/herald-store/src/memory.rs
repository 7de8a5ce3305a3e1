//! In-memory post store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Post, PostDestination, PostId, PostQuery, PostStore, StoreError};

/// Everything the store holds. Also the on-disk snapshot format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub(crate) posts: HashMap<PostId, Post>,
    pub(crate) destinations: HashMap<PostId, Vec<PostDestination>>,
}

/// Thread-safe in-memory post store.
#[derive(Debug, Default)]
pub struct MemoryPostStore {
    state: RwLock<StoreState>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Clone the full state for persistence.
    pub(crate) async fn snapshot(&self) -> StoreState {
        self.state.read().await.clone()
    }

    /// Number of posts in the store.
    pub async fn len(&self) -> usize {
        self.state.read().await.posts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.posts.is_empty()
    }
}

fn validate_destinations(post: &Post, destinations: &[PostDestination]) -> Result<(), StoreError> {
    if destinations.is_empty() {
        return Err(StoreError::Invalid(format!(
            "post {} has no destinations",
            post.id
        )));
    }

    let mut seen = HashSet::new();
    for row in destinations {
        if row.post_id != post.id {
            return Err(StoreError::Invalid(format!(
                "destination {} belongs to post {}, not {}",
                row.id, row.post_id, post.id
            )));
        }
        if !seen.insert(row.destination_id.as_str()) {
            return Err(StoreError::Invalid(format!(
                "duplicate destination {} for post {}",
                row.destination_id, post.id
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn insert_post(
        &self,
        post: Post,
        destinations: Vec<PostDestination>,
    ) -> Result<(), StoreError> {
        validate_destinations(&post, &destinations)?;

        let mut state = self.state.write().await;
        if state.posts.contains_key(&post.id) {
            return Err(StoreError::Conflict(format!("post {} already exists", post.id)));
        }

        debug!(post_id = %post.id, destinations = destinations.len(), "inserted post");
        state.destinations.insert(post.id.clone(), destinations);
        state.posts.insert(post.id.clone(), post);
        Ok(())
    }

    async fn find_post(&self, id: &PostId) -> Result<Option<Post>, StoreError> {
        Ok(self.state.read().await.posts.get(id).cloned())
    }

    async fn update_post(&self, post: &Post) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let slot = state
            .posts
            .get_mut(&post.id)
            .ok_or_else(|| StoreError::post_not_found(&post.id))?;
        *slot = post.clone();
        Ok(())
    }

    async fn find_posts(&self, query: &PostQuery) -> Result<Vec<Post>, StoreError> {
        let state = self.state.read().await;
        let mut posts: Vec<Post> = state
            .posts
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();

        // None sorts before Some, so flip it to put unscheduled posts last
        posts.sort_by(|a, b| {
            (a.scheduled_at.is_none(), a.scheduled_at, a.created_at).cmp(&(
                b.scheduled_at.is_none(),
                b.scheduled_at,
                b.created_at,
            ))
        });

        if let Some(limit) = query.limit {
            posts.truncate(limit);
        }
        Ok(posts)
    }

    async fn find_destinations(
        &self,
        post_id: &PostId,
    ) -> Result<Vec<PostDestination>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .destinations
            .get(post_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_destination(&self, destination: &PostDestination) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let slot = state
            .destinations
            .get_mut(&destination.post_id)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == destination.id))
            .ok_or_else(|| StoreError::destination_not_found(&destination.id))?;
        *slot = destination.clone();
        Ok(())
    }
}
