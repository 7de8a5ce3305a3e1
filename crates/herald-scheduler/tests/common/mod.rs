//! Shared harness for the scheduler integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use herald_publisher::{Credential, PublishContent, PublishError, Publisher, RemotePost};
use herald_queue::{DelayQueue, ManualClock, MemoryDelayQueue, QueueConfig, QueuedJob};
use herald_scheduler::{
    Admin, Context, NewDestination, NewPost, OverdueSweeper, PublicationWorker, RemoteMaintenance,
    Scheduler, SchedulerConfig,
};
use herald_store::{
    MemoryPostStore, Post, PostDestination, PostId, PostQuery, PostStatus, PostStore, StoreError,
};

/// A call the fake publisher received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Publish { destination_id: String, body: String },
    Edit { remote_id: String, body: String },
    Delete { remote_id: String },
}

/// Publisher that records every call and fails chosen destinations.
#[derive(Debug, Default)]
pub struct FakePublisher {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<String>>,
    next_id: AtomicUsize,
}

impl FakePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call for `destination_id` fail.
    pub fn fail_destination(&self, destination_id: &str) {
        self.failing.lock().unwrap().insert(destination_id.to_string());
    }

    pub fn heal_destination(&self, destination_id: &str) {
        self.failing.lock().unwrap().remove(destination_id);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Publish { .. }))
            .count()
    }

    fn check(&self, destination_id: &str) -> Result<(), PublishError> {
        if self.failing.lock().unwrap().contains(destination_id) {
            return Err(PublishError::Api {
                status: 400,
                message: format!("destination {} rejected the post", destination_id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(
        &self,
        content: &PublishContent,
        credential: &Credential,
    ) -> Result<RemotePost, PublishError> {
        self.calls.lock().unwrap().push(Call::Publish {
            destination_id: credential.destination_id.clone(),
            body: content.body.clone(),
        });
        self.check(&credential.destination_id)?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(RemotePost {
            id: format!("{}_{}", credential.destination_id, n),
        })
    }

    async fn edit(
        &self,
        remote_id: &str,
        content: &PublishContent,
        credential: &Credential,
    ) -> Result<(), PublishError> {
        self.calls.lock().unwrap().push(Call::Edit {
            remote_id: remote_id.to_string(),
            body: content.body.clone(),
        });
        self.check(&credential.destination_id)
    }

    async fn delete(&self, remote_id: &str, credential: &Credential) -> Result<(), PublishError> {
        self.calls.lock().unwrap().push(Call::Delete {
            remote_id: remote_id.to_string(),
        });
        self.check(&credential.destination_id)
    }
}

/// Memory store whose row writes can be made to fail per destination.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<MemoryPostStore>,
    failing_rows: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryPostStore>) -> Self {
        Self {
            inner,
            failing_rows: Mutex::new(HashSet::new()),
        }
    }

    /// Make every row write for `destination_id` fail.
    pub fn fail_row_writes(&self, destination_id: &str) {
        self.failing_rows
            .lock()
            .unwrap()
            .insert(destination_id.to_string());
    }

    pub fn heal_row_writes(&self, destination_id: &str) {
        self.failing_rows.lock().unwrap().remove(destination_id);
    }
}

#[async_trait]
impl PostStore for FlakyStore {
    async fn insert_post(
        &self,
        post: Post,
        destinations: Vec<PostDestination>,
    ) -> Result<(), StoreError> {
        self.inner.insert_post(post, destinations).await
    }

    async fn find_post(&self, id: &PostId) -> Result<Option<Post>, StoreError> {
        self.inner.find_post(id).await
    }

    async fn update_post(&self, post: &Post) -> Result<(), StoreError> {
        self.inner.update_post(post).await
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
        if self
            .failing_rows
            .lock()
            .unwrap()
            .contains(&destination.destination_id)
        {
            return Err(StoreError::Io(std::io::Error::other("disk unavailable")));
        }
        self.inner.update_destination(destination).await
    }
}

/// Every service wired over in-memory storage and a manual clock.
pub struct Harness {
    pub clock: ManualClock,
    pub store: Arc<MemoryPostStore>,
    /// The store the services see; wraps `store`.
    pub flaky: Arc<FlakyStore>,
    pub queue: Arc<MemoryDelayQueue>,
    pub publisher: Arc<FakePublisher>,
    pub ctx: Context,
    pub scheduler: Scheduler,
    pub sweeper: OverdueSweeper,
    pub worker: PublicationWorker,
    pub admin: Admin,
    pub remote: RemoteMaintenance,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let clock = ManualClock::new(start());
        let store = Arc::new(MemoryPostStore::new());
        let queue = Arc::new(MemoryDelayQueue::with_clock(
            QueueConfig::default(),
            Arc::new(clock.clone()),
        ));
        let publisher = Arc::new(FakePublisher::new());

        let flaky = Arc::new(FlakyStore::new(store.clone()));
        let ctx = Context::new(flaky.clone(), queue.clone(), Arc::new(clock.clone()));
        let scheduler = Scheduler::new(ctx.clone(), config.clone());
        let sweeper = OverdueSweeper::new(ctx.clone(), scheduler.clone(), config.clone());
        let worker = PublicationWorker::new(ctx.clone(), publisher.clone(), config);
        let admin = Admin::new(queue.clone(), scheduler.clone(), sweeper.clone());
        let remote = RemoteMaintenance::new(ctx.clone(), publisher.clone());

        Self {
            clock,
            store,
            flaky,
            queue,
            publisher,
            ctx,
            scheduler,
            sweeper,
            worker,
            admin,
            remote,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use herald_queue::Clock;
        self.clock.now()
    }

    pub fn in_minutes(&self, minutes: i64) -> DateTime<Utc> {
        self.now() + Duration::minutes(minutes)
    }

    /// Insert a draft post with one pending row per destination.
    pub async fn draft(&self, destinations: &[&str]) -> PostId {
        let mut post = Post::draft("owner-1", "hello world");
        post.created_at = self.now();
        post.updated_at = self.now();
        let rows = destinations
            .iter()
            .map(|d| PostDestination::new(&post.id, *d, format!("token-{}", d)))
            .collect();
        let id = post.id.clone();
        self.store.insert_post(post, rows).await.unwrap();
        id
    }

    /// Insert a post already marked scheduled without enqueueing anything,
    /// as if the queue had been lost.
    pub async fn orphan(&self, at: DateTime<Utc>, destinations: &[&str]) -> PostId {
        let id = self.draft(destinations).await;
        let mut post = self.post(&id).await;
        post.status = PostStatus::Scheduled;
        post.scheduled_at = Some(at);
        self.store.update_post(&post).await.unwrap();
        id
    }

    pub fn new_post(&self, destinations: &[&str], at: Option<DateTime<Utc>>) -> NewPost {
        NewPost {
            owner_id: "owner-1".to_string(),
            body: "hello world".to_string(),
            title: None,
            kind: Default::default(),
            media: vec![],
            destinations: destinations
                .iter()
                .map(|d| NewDestination {
                    destination_id: d.to_string(),
                    credential_ref: format!("token-{}", d),
                })
                .collect(),
            scheduled_at: at,
        }
    }

    pub async fn post(&self, id: &PostId) -> Post {
        self.store.find_post(id).await.unwrap().unwrap()
    }

    pub async fn rows(&self, id: &PostId) -> Vec<PostDestination> {
        self.store.find_destinations(id).await.unwrap()
    }

    /// Claim and handle every job that is due right now.
    pub async fn drain(&self) -> Vec<QueuedJob> {
        let mut handled = Vec::new();
        while let Some(job) = self.queue.claim().await.unwrap() {
            handled.push(job.clone());
            self.worker.handle(job).await;
        }
        handled
    }

    /// Move the clock to `at` and run everything that became due.
    pub async fn run_until(&self, at: DateTime<Utc>) -> Vec<QueuedJob> {
        self.clock.set(at);
        self.drain().await
    }
}
