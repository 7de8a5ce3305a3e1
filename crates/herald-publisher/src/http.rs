//! HTTP publisher for Graph-style platform APIs.

use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::{Credential, PublishContent, PublishError, Publisher, RemotePost};

/// Retry policy for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Give up after this much time spent retrying one call.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Publisher backed by a Graph-style JSON API.
///
/// - `POST {base}/{destination}/feed` creates a post
/// - `POST {base}/{remote_id}` edits it
/// - `DELETE {base}/{remote_id}` deletes it
///
/// The credential's access token is sent as a bearer token.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpPublisher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn body(content: &PublishContent) -> serde_json::Value {
        let mut body = json!({
            "message": content.body,
            "kind": content.kind,
        });
        if let Some(title) = &content.title {
            body["name"] = json!(title);
        }
        if !content.media.is_empty() {
            body["attached_media"] = json!(content.media);
        }
        body
    }

    /// Send a request built by `build`, retrying transient failures.
    async fn send<T, F>(&self, operation: &'static str, build: F) -> Result<T, PublishError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let build = &build;
        backoff::future::retry(self.retry.backoff(), || async move {
            let result = match build().send().await {
                Ok(response) => Self::handle_response(response).await,
                Err(e) => Err(PublishError::Http(e)),
            };

            result.map_err(|e| match e {
                PublishError::RateLimited {
                    retry_after_secs: Some(secs),
                } => {
                    warn!(operation, retry_after_secs = secs, "rate limited, retrying");
                    backoff::Error::retry_after(e, Duration::from_secs(secs))
                }
                e if e.is_transient() => {
                    warn!(operation, error = %e, "transient publisher error, retrying");
                    backoff::Error::transient(e)
                }
                e => backoff::Error::permanent(e),
            })
        })
        .await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PublishError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(PublishError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            return Err(PublishError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        // Deletes may answer 204 with no body
        let json = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(json).map_err(|e| {
            let snippet: String = text.chars().take(200).collect();
            PublishError::InvalidResponse(format!("{}: {}", e, snippet))
        })
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    #[tracing::instrument(skip(self, content, credential), fields(destination_id = %credential.destination_id))]
    async fn publish(
        &self,
        content: &PublishContent,
        credential: &Credential,
    ) -> Result<RemotePost, PublishError> {
        let url = format!("{}/{}/feed", self.base_url, credential.destination_id);
        let body = Self::body(content);

        let created: CreatedResponse = self
            .send("publish", || {
                self.http
                    .post(&url)
                    .bearer_auth(&credential.access_token)
                    .json(&body)
            })
            .await?;

        debug!(remote_id = %created.id, "published post");
        Ok(RemotePost { id: created.id })
    }

    #[tracing::instrument(skip(self, content, credential), fields(destination_id = %credential.destination_id))]
    async fn edit(
        &self,
        remote_id: &str,
        content: &PublishContent,
        credential: &Credential,
    ) -> Result<(), PublishError> {
        let url = format!("{}/{}", self.base_url, remote_id);
        let body = Self::body(content);

        let _: serde_json::Value = self
            .send("edit", || {
                self.http
                    .post(&url)
                    .bearer_auth(&credential.access_token)
                    .json(&body)
            })
            .await?;

        debug!(remote_id, "edited post");
        Ok(())
    }

    #[tracing::instrument(skip(self, credential), fields(destination_id = %credential.destination_id))]
    async fn delete(&self, remote_id: &str, credential: &Credential) -> Result<(), PublishError> {
        let url = format!("{}/{}", self.base_url, remote_id);

        let _: serde_json::Value = self
            .send("delete", || {
                self.http
                    .delete(&url)
                    .bearer_auth(&credential.access_token)
            })
            .await?;

        debug!(remote_id, "deleted post");
        Ok(())
    }
}
