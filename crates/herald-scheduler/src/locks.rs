//! Per-post async locks.

use std::sync::Arc;

use dashmap::DashMap;
use herald_store::PostId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table of per-post mutexes.
///
/// Every service that mutates a post or its destination rows holds the post's
/// lock for the whole operation. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct PostLocks {
    inner: Arc<DashMap<PostId, Arc<Mutex<()>>>>,
}

impl PostLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `post_id`.
    pub async fn lock(&self, post_id: &PostId) -> OwnedMutexGuard<()> {
        let mutex = self.inner.entry(post_id.clone()).or_default().clone();
        mutex.lock_owned().await
    }

    /// Drop table entries that nobody holds or waits for.
    pub fn prune(&self) {
        self.inner.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
