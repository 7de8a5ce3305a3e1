//! Shared handles for the scheduling services.

use std::sync::Arc;

use herald_queue::{Clock, DelayQueue};
use herald_store::{Post, PostId, PostStore};

use crate::{PostLocks, SchedulerError};

/// The store, queue, clock and lock table every service works against.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn PostStore>,
    pub queue: Arc<dyn DelayQueue>,
    pub clock: Arc<dyn Clock>,
    pub locks: PostLocks,
}

impl Context {
    pub fn new(
        store: Arc<dyn PostStore>,
        queue: Arc<dyn DelayQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            locks: PostLocks::new(),
        }
    }

    /// Load a post or fail with [`SchedulerError::NotFound`].
    pub(crate) async fn require_post(&self, post_id: &PostId) -> Result<Post, SchedulerError> {
        self.store
            .find_post(post_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(post_id.clone()))
    }
}
