//! Student activity HTTP routes.
//!
//! Provides endpoints for:
//! - Running a full activity sweep (admin)
//! - Recomputing a single student's status
//! - Reading a student's status history

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::info;

use crate::crm_store::ChangeSource;
use crate::server::responses::{error_response, internal_error, run_blocking};
use crate::server::session::Session;
use crate::server::state::{GuardedActivityEngine, GuardedCrmStore, ServerState};

// =============================================================================
// Admin Routes
// =============================================================================

/// POST /admin/activity/sweep - Run the inactivity sweep now
async fn run_sweep(
    session: Session,
    State(activity): State<GuardedActivityEngine>,
) -> impl IntoResponse {
    if !session.is_admin() {
        return StatusCode::FORBIDDEN.into_response();
    }

    info!("Admin {} triggered an activity sweep", session.user_id());
    let result = run_blocking("activity_sweep", move || {
        activity.run_activity_sweep(Utc::now())
    })
    .await;
    match result {
        Ok(Ok(sweep)) => Json(sweep).into_response(),
        Ok(Err(e)) => internal_error("activity_sweep", e),
        Err(response) => response,
    }
}

// =============================================================================
// Staff Routes
// =============================================================================

/// POST /students/{id}/activity/recompute
async fn recompute_student(
    session: Session,
    State(activity): State<GuardedActivityEngine>,
    Path(student_id): Path<String>,
) -> impl IntoResponse {
    if !session.is_staff() {
        return StatusCode::FORBIDDEN.into_response();
    }

    match run_blocking("activity_recompute", move || {
        activity.recompute_student_status(&student_id, Utc::now(), ChangeSource::Manual)
    })
    .await
    {
        Ok(result) => Json(result).into_response(),
        Err(response) => response,
    }
}

/// GET /students/{id}/status-history
async fn get_status_history(
    session: Session,
    State(store): State<GuardedCrmStore>,
    Path(student_id): Path<String>,
) -> impl IntoResponse {
    if !session.is_staff() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let result = run_blocking("status_history", move || {
        match store.get_profile(&student_id)? {
            Some(profile) if profile.is_student => {
                store.get_status_history(&student_id).map(Some)
            }
            _ => Ok(None),
        }
    })
    .await;
    match result {
        Ok(Ok(Some(history))) => Json(history).into_response(),
        Ok(Ok(None)) => error_response(StatusCode::NOT_FOUND, "Student not found"),
        Ok(Err(e)) => internal_error("status_history", e),
        Err(response) => response,
    }
}

// =============================================================================
// Router Construction
// =============================================================================

/// Routes:
/// - POST /admin/activity/sweep
/// - POST /students/{id}/activity/recompute
/// - GET  /students/{id}/status-history
pub fn activity_routes() -> Router<ServerState> {
    let student_routes = Router::new()
        .route("/{id}/activity/recompute", post(recompute_student))
        .route("/{id}/status-history", get(get_status_history));

    Router::new()
        .route("/admin/activity/sweep", post(run_sweep))
        .nest("/students", student_routes)
}
