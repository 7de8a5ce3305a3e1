//! The publisher contract.

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::{Credential, PublishContent, PublishError, RemotePost};

/// Issues publish, edit and delete calls against a destination.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create a post on the credential's destination.
    async fn publish(
        &self,
        content: &PublishContent,
        credential: &Credential,
    ) -> Result<RemotePost, PublishError>;

    /// Replace the content of an existing remote post.
    async fn edit(
        &self,
        remote_id: &str,
        content: &PublishContent,
        credential: &Credential,
    ) -> Result<(), PublishError>;

    async fn delete(&self, remote_id: &str, credential: &Credential) -> Result<(), PublishError>;

    /// Publish every item concurrently.
    ///
    /// `on_result` is called exactly once per item with the item's index,
    /// whether the call succeeded or not.
    async fn publish_batch(
        &self,
        items: &[(PublishContent, Credential)],
        on_result: &mut (dyn FnMut(usize, Result<RemotePost, PublishError>) + Send),
    ) {
        let results = join_all(
            items
                .iter()
                .map(|(content, credential)| self.publish(content, credential)),
        )
        .await;

        for (index, result) in results.into_iter().enumerate() {
            on_result(index, result);
        }
    }

    /// Delete every `(remote_id, credential)` item concurrently.
    ///
    /// `on_result` is called exactly once per item.
    async fn delete_batch(
        &self,
        items: &[(String, Credential)],
        on_result: &mut (dyn FnMut(usize, Result<(), PublishError>) + Send),
    ) {
        let results = join_all(
            items
                .iter()
                .map(|(remote_id, credential)| self.delete(remote_id, credential)),
        )
        .await;

        for (index, result) in results.into_iter().enumerate() {
            on_result(index, result);
        }
    }
}
