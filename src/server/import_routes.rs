//! CSV song import route.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::csv_import::{ImportError, ImportRequest};
use crate::server::responses::{error_response, internal_error, run_blocking};
use crate::server::session::Session;
use crate::server::state::{GuardedCsvImporter, ServerState};

/// POST /import/csv-songs
///
/// The importer performs the role check; a non-staff caller gets a 403 with
/// the `{success, error}` body. A body that does not parse is a 400 with the
/// same shape.
async fn import_csv_songs(
    session: Session,
    State(importer): State<GuardedCsvImporter>,
    body: Result<Json<ImportRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match body {
        Ok(Json(request)) => request,
        Err(_) if !session.is_staff() => {
            return error_response(StatusCode::FORBIDDEN, ImportError::Unauthorized.to_string());
        }
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {}", rejection.body_text()),
            );
        }
    };
    let caller = session.profile;
    let result = run_blocking("csv_import", move || importer.import(&caller, &request)).await;

    match result {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(e @ ImportError::Unauthorized)) => {
            error_response(StatusCode::FORBIDDEN, e.to_string())
        }
        Ok(Err(e @ ImportError::NoRows)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Ok(Err(e @ ImportError::StudentNotFound)) => {
            error_response(StatusCode::NOT_FOUND, e.to_string())
        }
        Ok(Err(ImportError::Store(e))) => internal_error("csv_import", e),
        Err(response) => response,
    }
}

pub fn import_routes() -> Router<ServerState> {
    Router::new().route("/import/csv-songs", post(import_csv_songs))
}
