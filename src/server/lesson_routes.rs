//! Lesson HTTP routes.
//!
//! Creating or editing a lesson re-evaluates the student's activity status
//! immediately, so the response carries both the lesson and the recompute.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{post, put},
    Json, Router,
};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activity::RecomputeResult;
use crate::crm_store::{utc_now, ChangeSource, Lesson, LessonStatus, NewLesson};
use crate::server::responses::{error_response, internal_error, run_blocking};
use crate::server::session::Session;
use crate::server::state::ServerState;
use crate::sync_conflicts::{ConflictError, RemoteEvent, SyncOutcome};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLessonBody {
    pub student_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    /// Defaults to `SCHEDULED`.
    #[serde(default)]
    pub status: Option<LessonStatus>,
}

/// Absent fields are left untouched.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLessonBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<LessonStatus>,
}

#[derive(Debug, Serialize)]
pub struct LessonResponse {
    pub lesson: Lesson,
    pub activity: RecomputeResult,
}

enum LessonOutcome<T> {
    Done(T),
    StudentNotFound,
    LessonNotFound,
    Forbidden,
}

impl<T: Serialize> LessonOutcome<T> {
    fn respond(self, status: StatusCode) -> Response {
        match self {
            LessonOutcome::Done(body) => (status, Json(body)).into_response(),
            LessonOutcome::StudentNotFound => {
                error_response(StatusCode::NOT_FOUND, "Student not found")
            }
            LessonOutcome::LessonNotFound => {
                error_response(StatusCode::NOT_FOUND, "Lesson not found")
            }
            LessonOutcome::Forbidden => StatusCode::FORBIDDEN.into_response(),
        }
    }
}

fn can_edit(session: &Session, lesson: &Lesson) -> bool {
    session.is_admin() || lesson.teacher_id == session.profile.id
}

// =============================================================================
// Staff Routes
// =============================================================================

/// POST /lessons - The caller becomes the lesson's teacher
async fn create_lesson(
    session: Session,
    State(state): State<ServerState>,
    Json(body): Json<CreateLessonBody>,
) -> impl IntoResponse {
    if !session.is_staff() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let result = run_blocking("create_lesson", move || -> Result<LessonOutcome<LessonResponse>> {
        match state.crm_store.get_profile(&body.student_id)? {
            Some(student) if student.is_student => {}
            _ => return Ok(LessonOutcome::StudentNotFound),
        }

        let lesson = state.crm_store.create_lesson(&NewLesson {
            teacher_id: session.profile.id.clone(),
            student_id: body.student_id,
            title: body.title,
            notes: body.notes,
            scheduled_at: body.scheduled_at.trunc_subsecs(0),
            status: body.status.unwrap_or(LessonStatus::Scheduled),
            google_event_id: None,
        })?;
        info!(
            "Lesson {} created by {} for student {}",
            lesson.id, lesson.teacher_id, lesson.student_id
        );

        let activity = state.activity.recompute_student_status(
            &lesson.student_id,
            utc_now(),
            ChangeSource::LessonHook,
        );
        Ok(LessonOutcome::Done(LessonResponse { lesson, activity }))
    })
    .await;

    match result {
        Ok(Ok(outcome)) => outcome.respond(StatusCode::CREATED),
        Ok(Err(e)) => internal_error("create_lesson", e),
        Err(response) => response,
    }
}

/// PUT /lessons/{id}
async fn update_lesson(
    session: Session,
    State(state): State<ServerState>,
    Path(lesson_id): Path<String>,
    Json(body): Json<UpdateLessonBody>,
) -> impl IntoResponse {
    if !session.is_staff() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let result = run_blocking("update_lesson", move || -> Result<LessonOutcome<LessonResponse>> {
        let mut lesson = match state.crm_store.get_lesson(&lesson_id)? {
            Some(lesson) if lesson.deleted_at.is_none() => lesson,
            _ => return Ok(LessonOutcome::LessonNotFound),
        };
        if !can_edit(&session, &lesson) {
            return Ok(LessonOutcome::Forbidden);
        }

        if let Some(title) = body.title {
            lesson.title = Some(title);
        }
        if let Some(notes) = body.notes {
            lesson.notes = Some(notes).filter(|n| !n.is_empty());
        }
        if let Some(scheduled_at) = body.scheduled_at {
            lesson.scheduled_at = scheduled_at.trunc_subsecs(0);
        }
        if let Some(status) = body.status {
            lesson.status = status;
        }
        lesson.updated_at = utc_now();

        if !state.crm_store.update_lesson(&lesson)? {
            return Ok(LessonOutcome::LessonNotFound);
        }

        let activity = state.activity.recompute_student_status(
            &lesson.student_id,
            utc_now(),
            ChangeSource::LessonHook,
        );
        Ok(LessonOutcome::Done(LessonResponse { lesson, activity }))
    })
    .await;

    match result {
        Ok(Ok(outcome)) => outcome.respond(StatusCode::OK),
        Ok(Err(e)) => internal_error("update_lesson", e),
        Err(response) => response,
    }
}

/// POST /lessons/{id}/remote-sync - Reconcile the lesson with its calendar event
async fn sync_remote_event(
    session: Session,
    State(state): State<ServerState>,
    Path(lesson_id): Path<String>,
    Json(event): Json<RemoteEvent>,
) -> impl IntoResponse {
    if !session.is_staff() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let result = run_blocking(
        "remote_sync",
        move || -> Result<LessonOutcome<SyncOutcome>, ConflictError> {
            let lesson = match state.crm_store.get_lesson(&lesson_id)? {
                Some(lesson) if lesson.deleted_at.is_none() => lesson,
                _ => return Ok(LessonOutcome::LessonNotFound),
            };
            if !can_edit(&session, &lesson) {
                return Ok(LessonOutcome::Forbidden);
            }
            state
                .conflict_resolver
                .sync_remote_event(&lesson.id, &event)
                .map(LessonOutcome::Done)
        },
    )
    .await;

    match result {
        Ok(Ok(outcome)) => outcome.respond(StatusCode::OK),
        Ok(Err(ConflictError::LessonNotFound)) => {
            error_response(StatusCode::NOT_FOUND, "Lesson not found")
        }
        Ok(Err(e)) => internal_error("remote_sync", e),
        Err(response) => response,
    }
}

// =============================================================================
// Router Construction
// =============================================================================

/// Routes:
/// - POST /lessons
/// - PUT  /lessons/{id}
/// - POST /lessons/{id}/remote-sync
pub fn lesson_routes() -> Router<ServerState> {
    Router::new()
        .route("/lessons", post(create_lesson))
        .route("/lessons/{id}", put(update_lesson))
        .route("/lessons/{id}/remote-sync", post(sync_remote_event))
}
