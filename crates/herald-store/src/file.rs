//! File-backed post store.
//!
//! Wraps [`MemoryPostStore`] and writes a JSON snapshot of the whole state
//! after every mutation. Writes go to a temporary sibling file that is then
//! renamed over the snapshot, so a crash never leaves a truncated file behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::memory::StoreState;
use crate::{MemoryPostStore, Post, PostDestination, PostId, PostQuery, PostStore, StoreError};

/// Post store persisted to a single JSON file.
pub struct FilePostStore {
    path: PathBuf,
    inner: MemoryPostStore,
    /// Serializes snapshot writes.
    persist_lock: Mutex<()>,
}

impl FilePostStore {
    /// Open the store at `path`, loading the existing snapshot if there is one.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StoreState>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), posts = state.posts.len(), "opened post store");

        Ok(Self {
            path,
            inner: MemoryPostStore::from_state(state),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.inner.snapshot().await;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "persisted post store");
        Ok(())
    }
}

#[async_trait]
impl PostStore for FilePostStore {
    async fn insert_post(
        &self,
        post: Post,
        destinations: Vec<PostDestination>,
    ) -> Result<(), StoreError> {
        self.inner.insert_post(post, destinations).await?;
        self.persist().await
    }

    async fn find_post(&self, id: &PostId) -> Result<Option<Post>, StoreError> {
        self.inner.find_post(id).await
    }

    async fn update_post(&self, post: &Post) -> Result<(), StoreError> {
        self.inner.update_post(post).await?;
        self.persist().await
    }

    async fn find_posts(&self, query: &PostQuery) -> Result<Vec<Post>, StoreError> {
        self.inner.find_posts(query).await
    }

    async fn find_destinations(
        &self,
        post_id: &PostId,
    ) -> Result<Vec<PostDestination>, StoreError> {
        self.inner.find_destinations(post_id).await
    }

    async fn update_destination(&self, destination: &PostDestination) -> Result<(), StoreError> {
        self.inner.update_destination(destination).await?;
        self.persist().await
    }
}
