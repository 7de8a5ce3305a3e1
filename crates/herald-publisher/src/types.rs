//! Values passed to and returned from publishers.

use std::fmt;

use herald_store::{MediaRef, Post, PostDestination, PostKind};
use serde::{Deserialize, Serialize};

/// The content of a post as sent to a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishContent {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub kind: PostKind,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

impl PublishContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            title: None,
            kind: PostKind::Standard,
            media: Vec::new(),
        }
    }
}

impl From<&Post> for PublishContent {
    fn from(post: &Post) -> Self {
        Self {
            body: post.body.clone(),
            title: post.title.clone(),
            kind: post.kind,
            media: post.media.clone(),
        }
    }
}

/// Access credential for one destination.
///
/// The token is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub destination_id: String,
    pub access_token: String,
}

impl Credential {
    pub fn new(destination_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            destination_id: destination_id.into(),
            access_token: access_token.into(),
        }
    }
}

impl From<&PostDestination> for Credential {
    fn from(row: &PostDestination) -> Self {
        Self::new(row.destination_id.clone(), row.credential_ref.clone())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("destination_id", &self.destination_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// A post as created on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePost {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_token() {
        let cred = Credential::new("page-1", "secret-token");
        let debug = format!("{:?}", cred);
        assert!(debug.contains("page-1"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn test_content_from_post() {
        let mut post = Post::draft("user-1", "hello");
        post.title = Some("greeting".into());
        post.kind = PostKind::ShortVideo;

        let content = PublishContent::from(&post);
        assert_eq!(content.body, "hello");
        assert_eq!(content.title.as_deref(), Some("greeting"));
        assert_eq!(content.kind, PostKind::ShortVideo);
    }
}
