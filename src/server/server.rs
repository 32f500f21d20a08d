use anyhow::{Context, Result};
use std::future::IntoFuture;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use super::{
    activity_routes::activity_routes, conflict_routes::conflict_routes,
    import_routes::import_routes, job_routes::job_routes, lesson_routes::lesson_routes,
    log_requests, metrics::metrics_handler, state::*, ServerConfig,
};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        crm_store: GuardedCrmStore,
        activity: GuardedActivityEngine,
        csv_importer: GuardedCsvImporter,
        conflict_resolver: GuardedConflictResolver,
        scheduler_handle: OptionalSchedulerHandle,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            crm_store,
            activity,
            csv_importer,
            conflict_resolver,
            scheduler_handle,
        }
    }
}

pub fn make_app(state: ServerState) -> Router {
    let api_routes: Router = Router::new()
        .merge(activity_routes())
        .merge(import_routes())
        .merge(lesson_routes())
        .merge(conflict_routes())
        .merge(job_routes())
        .with_state(state.clone());

    let home_router: Router = Router::new()
        .route("/", get(home))
        .with_state(state.clone());

    home_router
        .nest("/v1", api_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves the API and the Prometheus metrics on the ports of
/// `state.config` until `shutdown_token` is cancelled.
pub async fn run_server(state: ServerState, shutdown_token: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Listening on port {}, metrics on port {}", port, metrics_port);

    let api = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_token.clone().cancelled_owned())
        .into_future();
    let metrics = axum::serve(metrics_listener, make_metrics_app())
        .with_graceful_shutdown(shutdown_token.cancelled_owned())
        .into_future();

    let (api_result, metrics_result) = tokio::join!(api, metrics);
    api_result?;
    metrics_result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityEngine;
    use crate::config::{ActivitySettings, CsvImportSettings, SyncConflictSettings};
    use crate::crm_store::{CrmStore, NewProfile, SqliteCrmStore, StudentStatus};
    use crate::csv_import::CsvImporter;
    use crate::server::RequestsLoggingLevel;
    use crate::sync_conflicts::ConflictResolver;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn make_state() -> (TempDir, ServerState) {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn CrmStore> =
            Arc::new(SqliteCrmStore::new(temp_dir.path().join("crm.db")).unwrap());
        let activity = Arc::new(ActivityEngine::new(
            store.clone(),
            ActivitySettings::default(),
        ));
        let importer = Arc::new(CsvImporter::new(
            store.clone(),
            CsvImportSettings::default(),
            activity.clone(),
        ));
        let resolver = Arc::new(ConflictResolver::new(
            store.clone(),
            SyncConflictSettings::default(),
            activity.clone(),
        ));
        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            ..Default::default()
        };
        let state = ServerState::new(config, store, activity, importer, resolver, None);
        (temp_dir, state)
    }

    #[test]
    fn formats_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0d 00:00:00");
        assert_eq!(
            format_uptime(Duration::from_secs(2 * 86_400 + 3 * 3600 + 4 * 60 + 5)),
            "2d 03:04:05"
        );
    }

    #[tokio::test]
    async fn responds_forbidden_on_protected_routes() {
        let (_temp_dir, state) = make_state();
        let app = make_app(state);

        let protected_routes = vec![
            ("POST", "/v1/admin/activity/sweep"),
            ("POST", "/v1/students/123/activity/recompute"),
            ("GET", "/v1/students/123/status-history"),
            ("GET", "/v1/conflicts"),
            ("GET", "/v1/admin/jobs"),
            ("POST", "/v1/admin/jobs/student_activity_sweep/trigger"),
        ];

        for (method, route) in protected_routes.into_iter() {
            let request = Request::builder()
                .method(method)
                .uri(route)
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{} {}", method, route);
        }
    }

    #[tokio::test]
    async fn unknown_user_id_is_forbidden_and_students_cannot_sweep() {
        let (_temp_dir, state) = make_state();
        let student = state
            .crm_store
            .create_profile(&NewProfile::student(
                "s@example.com",
                "Student",
                StudentStatus::Active,
            ))
            .unwrap();
        let app = make_app(state);

        for user_id in ["does-not-exist", student.id.as_str()] {
            let request = Request::builder()
                .method("POST")
                .uri("/v1/admin/activity/sweep")
                .header("X-User-Id", user_id)
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn home_is_public() {
        let (_temp_dir, state) = make_state();
        let app = make_app(state);

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
