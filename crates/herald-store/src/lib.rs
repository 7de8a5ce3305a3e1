//! Post store for Herald.
//!
//! This crate owns the records the delivery pipeline reads and writes:
//! - `Post`: the logical content item and its aggregate status
//! - `PostDestination`: one publication attempt per target destination
//!
//! Persistence is behind the [`PostStore`] trait. Two implementations ship here:
//! an in-memory store for tests and embedding, and a file-backed store that
//! snapshots the memory store to a JSON file after every write.

mod error;
mod file;
mod memory;
mod store;
mod types;

pub use error::StoreError;
pub use file::FilePostStore;
pub use memory::MemoryPostStore;
pub use store::{PostQuery, PostStore};
pub use types::{
    DestinationStatus, MediaRef, Post, PostDestination, PostId, PostKind, PostStatus,
};
