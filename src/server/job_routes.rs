//! Admin routes for background jobs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::background_jobs::{JobError, JobInfo, SchedulerHandle};
use crate::server::responses::{error_response, internal_error};
use crate::server::session::Session;
use crate::server::state::{OptionalSchedulerHandle, ServerState};

const JOB_HISTORY_LIMIT: usize = 20;
const JOB_AUDIT_LIMIT: usize = 50;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobInfo>,
}

#[derive(Debug, Serialize)]
pub struct TriggerJobResponse {
    pub job_id: String,
    pub triggered: bool,
}

fn get_scheduler(handle: OptionalSchedulerHandle) -> Result<SchedulerHandle, Response> {
    handle.ok_or_else(|| {
        error_response(StatusCode::SERVICE_UNAVAILABLE, "Job scheduler not running")
    })
}

// =============================================================================
// Admin Routes
// =============================================================================

/// GET /admin/jobs
async fn list_jobs(
    session: Session,
    State(handle): State<OptionalSchedulerHandle>,
) -> impl IntoResponse {
    if !session.is_admin() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let scheduler = match get_scheduler(handle) {
        Ok(s) => s,
        Err(response) => return response,
    };

    match scheduler.list_jobs().await {
        Ok(jobs) => Json(JobListResponse { jobs }).into_response(),
        Err(e) => internal_error("list_jobs", e),
    }
}

/// GET /admin/jobs/{id}: the job, its recent runs with their summaries, and
/// its audit trail.
async fn get_job(
    session: Session,
    State(handle): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    if !session.is_admin() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let scheduler = match get_scheduler(handle) {
        Ok(s) => s,
        Err(response) => return response,
    };

    match scheduler
        .job_detail(&job_id, JOB_HISTORY_LIMIT, JOB_AUDIT_LIMIT)
        .await
    {
        Ok(Some(detail)) => Json(detail).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, JobError::NotFound.to_string()),
        Err(e) => internal_error("get_job", e),
    }
}

/// POST /admin/jobs/{id}/trigger
async fn trigger_job(
    session: Session,
    State(handle): State<OptionalSchedulerHandle>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    if !session.is_admin() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let scheduler = match get_scheduler(handle) {
        Ok(s) => s,
        Err(response) => return response,
    };

    match scheduler.trigger_job(&job_id).await {
        Ok(()) => {
            info!("Admin {} triggered job {}", session.user_id(), job_id);
            (
                StatusCode::ACCEPTED,
                Json(TriggerJobResponse {
                    job_id,
                    triggered: true,
                }),
            )
                .into_response()
        }
        Err(e @ JobError::NotFound) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ JobError::AlreadyRunning) => error_response(StatusCode::CONFLICT, e.to_string()),
        Err(e) => internal_error("trigger_job", e),
    }
}

// =============================================================================
// Router Construction
// =============================================================================

/// Routes:
/// - GET  /admin/jobs
/// - GET  /admin/jobs/{id}
/// - POST /admin/jobs/{id}/trigger
pub fn job_routes() -> Router<ServerState> {
    Router::new()
        .route("/admin/jobs", get(list_jobs))
        .route("/admin/jobs/{id}", get(get_job))
        .route("/admin/jobs/{id}/trigger", post(trigger_job))
}
