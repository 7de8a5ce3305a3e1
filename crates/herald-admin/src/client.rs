//! HTTP client for the daemon's `/admin` API.

use chrono::{DateTime, Utc};
use herald_queue::{JobCounts, JobState, QueuedJob};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to reach the daemon: {0}")]
    Http(#[from] reqwest::Error),

    /// The daemon answered with an error status.
    #[error("{status}: {message}")]
    Api { status: StatusCode, message: String },
}

/// Queue statistics as returned by `GET /admin/stats`.
#[derive(Debug, Deserialize)]
pub struct Stats {
    #[serde(flatten)]
    pub counts: JobCounts,
    pub jobs: StatsJobs,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsJobs {
    #[serde(default)]
    pub waiting: Vec<QueuedJob>,
    #[serde(default)]
    pub active: Vec<QueuedJob>,
    #[serde(default)]
    pub completed: Vec<QueuedJob>,
    #[serde(default)]
    pub failed: Vec<QueuedJob>,
}

impl StatsJobs {
    pub fn get(&self, state: JobState) -> &[QueuedJob] {
        match state {
            JobState::Waiting => &self.waiting,
            JobState::Active => &self.active,
            JobState::Completed => &self.completed,
            JobState::Failed => &self.failed,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissedPost {
    pub post_id: String,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Missed {
    pub missed_count: usize,
    pub missed: Vec<MissedPost>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overdue {
    pub job_id: Option<String>,
    pub post_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initialized {
    pub scheduled_count: usize,
    pub already_queued: usize,
}

#[derive(Debug, Deserialize)]
pub struct Cleaned {
    pub removed: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rescheduled {
    pub job_id: String,
    pub old_time: Option<DateTime<Utc>>,
    pub new_time: DateTime<Utc>,
}

/// Client for one daemon.
pub struct AdminClient {
    base_url: String,
    http: reqwest::Client,
}

impl AdminClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn stats(&self, limit: usize) -> Result<Stats, ClientError> {
        self.request(Method::GET, &format!("/admin/stats?limit={}", limit), None)
            .await
    }

    pub async fn initialize(&self) -> Result<Initialized, ClientError> {
        self.request(Method::POST, "/admin/initialize", None).await
    }

    pub async fn check_overdue(&self) -> Result<Overdue, ClientError> {
        self.request(Method::POST, "/admin/overdue", None).await
    }

    pub async fn check_missed(&self) -> Result<Missed, ClientError> {
        self.request(Method::GET, "/admin/missed", None).await
    }

    pub async fn retry_job(&self, job_id: &str) -> Result<QueuedJob, ClientError> {
        self.request(Method::POST, &format!("/admin/jobs/{}/retry", job_id), None)
            .await
    }

    pub async fn remove_job(&self, job_id: &str) -> Result<(), ClientError> {
        self.send(Method::DELETE, &format!("/admin/jobs/{}", job_id), None)
            .await?;
        Ok(())
    }

    pub async fn clean(
        &self,
        state: JobState,
        max_age_secs: u64,
        max_count: usize,
    ) -> Result<Cleaned, ClientError> {
        let body = json!({
            "state": state,
            "maxAgeSecs": max_age_secs,
            "maxCount": max_count,
        });
        self.request(Method::POST, "/admin/queue/clean", Some(body))
            .await
    }

    pub async fn pause(&self) -> Result<(), ClientError> {
        self.send(Method::POST, "/admin/queue/pause", None).await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ClientError> {
        self.send(Method::POST, "/admin/queue/resume", None).await?;
        Ok(())
    }

    /// Returns the post as stored after the change.
    pub async fn mark_failed(&self, post_id: &str, reason: &str) -> Result<Value, ClientError> {
        self.request(
            Method::POST,
            &format!("/admin/posts/{}/fail", post_id),
            Some(json!({ "reason": reason })),
        )
        .await
    }

    pub async fn reschedule(
        &self,
        post_id: &str,
        new_time: DateTime<Utc>,
    ) -> Result<Rescheduled, ClientError> {
        self.request(
            Method::POST,
            &format!("/admin/posts/{}/reschedule", post_id),
            Some(json!({ "newTime": new_time })),
        )
        .await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        Ok(self.send(method, path, body).await?.json().await?)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["error"].as_str().map(String::from))
            .unwrap_or(text);
        Err(ClientError::Api { status, message })
    }
}
