use super::state::ServerState;
use crate::crm_store::Profile;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::IntoResponse,
};
use tracing::{debug, error};

/// The caller, as resolved from the `X-User-Id` header set by the upstream gateway.
#[derive(Debug)]
pub struct Session {
    pub profile: Profile,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.profile.id
    }

    pub fn is_admin(&self) -> bool {
        self.profile.is_admin
    }

    /// Teachers and admins.
    pub fn is_staff(&self) -> bool {
        self.profile.is_admin || self.profile.is_teacher
    }
}

pub const HEADER_USER_ID_KEY: &str = "X-User-Id";

pub enum SessionExtractionError {
    AccessDenied,
    InternalError,
}

impl IntoResponse for SessionExtractionError {
    fn into_response(self) -> axum::response::Response {
        match self {
            SessionExtractionError::AccessDenied => StatusCode::FORBIDDEN.into_response(),
            SessionExtractionError::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

fn extract_user_id_from_headers(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(HEADER_USER_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn extract_session_from_request_parts(
    parts: &mut Parts,
    ctx: &ServerState,
) -> Result<Option<Session>, SessionExtractionError> {
    let user_id = match extract_user_id_from_headers(parts) {
        None => {
            debug!("No {} header.", HEADER_USER_ID_KEY);
            return Ok(None);
        }
        Some(x) => x,
    };

    match ctx.crm_store.get_profile(&user_id) {
        Ok(Some(profile)) => Ok(Some(Session { profile })),
        Ok(None) => {
            debug!("No profile for user_id={}", user_id);
            Ok(None)
        }
        Err(e) => {
            error!("Failed to load profile {}: {:#}", user_id, e);
            Err(SessionExtractionError::InternalError)
        }
    }
}

impl FromRequestParts<ServerState> for Session {
    type Rejection = SessionExtractionError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        extract_session_from_request_parts(parts, ctx)
            .await?
            .ok_or(SessionExtractionError::AccessDenied)
    }
}
