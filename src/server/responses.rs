//! Error bodies and blocking-call plumbing shared by the route modules.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use tracing::error;

use super::metrics;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: message.into(),
        }),
    )
        .into_response()
}

/// Logs `err` and answers with the generic 500 body. Details never reach the client.
pub fn internal_error(endpoint: &str, err: impl Display) -> Response {
    error!("{} failed: {:#}", endpoint, err);
    metrics::record_error("internal", endpoint);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}

/// Runs synchronous store/engine work off the async runtime.
pub async fn run_blocking<F, T>(endpoint: &'static str, f: F) -> Result<T, Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| internal_error(endpoint, e))
}
