//! API routes.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use chrono::{DateTime, FixedOffset, Utc};
use herald_queue::{JobId, QueuedJob};
use herald_scheduler::{
    Admin, CleanRequest, ContentUpdate, CreatedPost, InitializeReport, MaintenanceReport,
    MissedReport, NewPost, OverdueReport, QueueStats, RemoteMaintenance, RescheduleOutcome,
    Scheduler, SchedulerError, UnscheduleOutcome,
};
use herald_store::{Post, PostId};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::WebError;

/// Jobs per state returned by the stats endpoint when no limit is given.
const DEFAULT_STATS_LIMIT: usize = 20;

/// Upper bound on the stats limit.
const MAX_STATS_LIMIT: usize = 500;

/// Shared state for the API server.
pub struct AppState {
    pub scheduler: Scheduler,
    pub admin: Admin,
    pub remote: RemoteMaintenance,
}

/// Create the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Posts
        .route("/posts", post(create_post))
        .route("/posts/validate-time", post(validate_time))
        .route(
            "/posts/{id}/schedule",
            post(schedule_post).put(reschedule_post).delete(unschedule_post),
        )
        .route("/posts/{id}/content", put(edit_post))
        .route("/posts/{id}", delete(retract_post))
        // Operators
        .route("/admin/initialize", post(initialize))
        .route("/admin/overdue", post(check_overdue))
        .route("/admin/missed", get(check_missed))
        .route("/admin/jobs/{id}/retry", post(retry_job))
        .route("/admin/jobs/{id}", delete(remove_job))
        .route("/admin/queue/clean", post(clean_queue))
        .route("/admin/queue/pause", post(pause_queue))
        .route("/admin/queue/resume", post(resume_queue))
        .route("/admin/stats", get(stats))
        .route("/admin/posts/{id}/fail", post(mark_failed))
        .route("/admin/posts/{id}/reschedule", post(reschedule_overdue))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn run_server(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("API server listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("API server shut down gracefully");
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// ============================================================================
// Posts
// ============================================================================

async fn create_post(
    State(state): State<Arc<AppState>>,
    Json(new_post): Json<NewPost>,
) -> Result<(StatusCode, Json<CreatedPost>), WebError> {
    let created = state.scheduler.create_post(new_post).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTimeRequest {
    /// RFC 3339 time; its offset is the timezone warnings are rendered in.
    pub time: DateTime<FixedOffset>,
    #[serde(default)]
    pub allow_past: bool,
}

#[derive(Debug, Serialize)]
pub struct ValidateTimeResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

async fn validate_time(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValidateTimeRequest>,
) -> Result<Json<ValidateTimeResponse>, WebError> {
    let response = match state
        .scheduler
        .validate_schedule_time(&request.time, request.allow_past)
    {
        Ok(validation) => ValidateTimeResponse {
            valid: true,
            error: None,
            warning: validation.warning,
        },
        Err(SchedulerError::InvalidSchedule(message)) => ValidateTimeResponse {
            valid: false,
            error: Some(message),
            warning: None,
        },
        Err(e) => return Err(e.into()),
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub scheduled_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub allow_past: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub job_id: JobId,
    pub scheduled_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

async fn schedule_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<ScheduleResponse>, WebError> {
    let validation = state
        .scheduler
        .validate_schedule_time(&request.scheduled_at, request.allow_past)?;
    let job_id = state
        .scheduler
        .schedule_post(&PostId::from(id), validation.at)
        .await?;

    Ok(Json(ScheduleResponse {
        job_id,
        scheduled_at: validation.at,
        old_time: None,
        warning: validation.warning,
    }))
}

async fn reschedule_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<ScheduleResponse>, WebError> {
    let validation = state
        .scheduler
        .validate_schedule_time(&request.scheduled_at, request.allow_past)?;
    let outcome = state
        .scheduler
        .reschedule_post(&PostId::from(id), validation.at)
        .await?;

    Ok(Json(ScheduleResponse {
        job_id: outcome.job_id,
        scheduled_at: outcome.new_time,
        old_time: outcome.old_time,
        warning: validation.warning,
    }))
}

async fn unschedule_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UnscheduleOutcome>, WebError> {
    let outcome = state.scheduler.unschedule_post(&PostId::from(id)).await?;
    Ok(Json(outcome))
}

async fn edit_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<ContentUpdate>,
) -> Result<Json<MaintenanceReport>, WebError> {
    if update.body.trim().is_empty() {
        return Err(WebError::BadRequest("body must not be empty".to_string()));
    }
    let report = state
        .remote
        .edit_published(&PostId::from(id), update)
        .await?;
    Ok(Json(report))
}

async fn retract_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MaintenanceReport>, WebError> {
    let report = state.remote.retract_post(&PostId::from(id)).await?;
    Ok(Json(report))
}

// ============================================================================
// Operators
// ============================================================================

async fn initialize(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InitializeReport>, WebError> {
    Ok(Json(state.admin.initialize().await?))
}

async fn check_overdue(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OverdueReport>, WebError> {
    Ok(Json(state.admin.check_overdue().await?))
}

async fn check_missed(State(state): State<Arc<AppState>>) -> Result<Json<MissedReport>, WebError> {
    Ok(Json(state.admin.check_missed().await?))
}

async fn retry_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QueuedJob>, WebError> {
    Ok(Json(state.admin.retry_job(&JobId::new(id)).await?))
}

async fn remove_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, WebError> {
    state.admin.remove_job(&JobId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct CleanResponse {
    pub removed: Vec<JobId>,
}

async fn clean_queue(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CleanRequest>,
) -> Result<Json<CleanResponse>, WebError> {
    let removed = state.admin.clean_queue(request).await?;
    Ok(Json(CleanResponse { removed }))
}

#[derive(Debug, Serialize)]
pub struct PauseResponse {
    pub paused: bool,
}

async fn pause_queue(State(state): State<Arc<AppState>>) -> Result<Json<PauseResponse>, WebError> {
    state.admin.pause().await?;
    Ok(Json(PauseResponse { paused: true }))
}

async fn resume_queue(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PauseResponse>, WebError> {
    state.admin.resume().await?;
    Ok(Json(PauseResponse { paused: false }))
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub limit: Option<usize>,
}

async fn stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<QueueStats>, WebError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_STATS_LIMIT)
        .min(MAX_STATS_LIMIT);
    Ok(Json(state.admin.stats(limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub reason: String,
}

async fn mark_failed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<FailRequest>,
) -> Result<Json<Post>, WebError> {
    if request.reason.trim().is_empty() {
        return Err(WebError::BadRequest("reason must not be empty".to_string()));
    }
    let post = state
        .admin
        .mark_failed(&PostId::from(id), &request.reason)
        .await?;
    Ok(Json(post))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub new_time: DateTime<Utc>,
}

async fn reschedule_overdue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<RescheduleOutcome>, WebError> {
    let outcome = state
        .admin
        .reschedule_overdue(&PostId::from(id), request.new_time)
        .await?;
    Ok(Json(outcome))
}
