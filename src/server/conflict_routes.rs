//! Calendar sync conflict routes.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::crm_store::{ConflictResolution, SyncConflict};
use crate::server::responses::{error_response, internal_error, run_blocking};
use crate::server::session::Session;
use crate::server::state::ServerState;
use crate::sync_conflicts::ConflictError;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct PendingConflictsResponse {
    pub conflicts: Vec<SyncConflict>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveConflictBody {
    pub resolution: ConflictResolution,
}

#[derive(Debug, Serialize)]
pub struct ResolveConflictResponse {
    pub success: bool,
}

// =============================================================================
// Staff Routes
// =============================================================================

/// GET /conflicts - Pending conflicts on the caller's lessons
async fn get_pending_conflicts(
    session: Session,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    if !session.is_staff() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let teacher_id = session.profile.id;
    let result = run_blocking("pending_conflicts", move || {
        state.conflict_resolver.get_pending_conflicts(&teacher_id)
    })
    .await;
    match result {
        Ok(Ok(conflicts)) => Json(PendingConflictsResponse { conflicts }).into_response(),
        Ok(Err(e)) => internal_error("pending_conflicts", e),
        Err(response) => response,
    }
}

/// Whether the caller may resolve the conflict. `None` when it does not exist.
fn owns_conflict(
    state: &ServerState,
    session: &Session,
    conflict_id: &str,
) -> Result<Option<bool>> {
    let Some(conflict) = state.crm_store.get_sync_conflict(conflict_id)? else {
        return Ok(None);
    };
    if session.is_admin() {
        return Ok(Some(true));
    }
    let teacher_id = state
        .crm_store
        .get_lesson(&conflict.lesson_id)?
        .map(|lesson| lesson.teacher_id);
    Ok(Some(teacher_id.as_deref() == Some(session.user_id())))
}

/// POST /conflicts/{id}/resolve
async fn resolve_conflict(
    session: Session,
    State(state): State<ServerState>,
    Path(conflict_id): Path<String>,
    Json(body): Json<ResolveConflictBody>,
) -> impl IntoResponse {
    if !session.is_staff() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let result = run_blocking("resolve_conflict", move || -> Result<(), ConflictError> {
        match owns_conflict(&state, &session, &conflict_id)? {
            None => return Err(ConflictError::ConflictNotFound),
            Some(false) => return Err(ConflictError::Forbidden),
            Some(true) => {}
        }
        state
            .conflict_resolver
            .resolve_conflict_manually(&conflict_id, body.resolution)
    })
    .await;

    match result {
        Ok(Ok(())) => Json(ResolveConflictResponse { success: true }).into_response(),
        Ok(Err(e @ ConflictError::Forbidden)) => {
            error_response(StatusCode::FORBIDDEN, e.to_string())
        }
        Ok(Err(e @ (ConflictError::ConflictNotFound | ConflictError::LessonNotFound))) => {
            error_response(StatusCode::NOT_FOUND, e.to_string())
        }
        Ok(Err(e @ ConflictError::AlreadyResolved)) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        Ok(Err(e @ ConflictError::InvalidResolution)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Ok(Err(e)) => internal_error("resolve_conflict", e),
        Err(response) => response,
    }
}

// =============================================================================
// Router Construction
// =============================================================================

/// Routes:
/// - GET  /conflicts
/// - POST /conflicts/{id}/resolve
pub fn conflict_routes() -> Router<ServerState> {
    Router::new()
        .route("/conflicts", get(get_pending_conflicts))
        .route("/conflicts/{id}/resolve", post(resolve_conflict))
}
