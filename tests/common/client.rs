//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP test client that identifies its caller with the `X-User-Id` header
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    /// Profile id sent with every request, if any
    pub user_id: Option<String>,
}

impl TestClient {
    /// Creates a client that sends no identity
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            user_id: None,
        }
    }

    /// Creates a client acting as the given profile
    pub fn as_user(base_url: String, user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Self::new(base_url)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.user_id {
            Some(user_id) => builder.header("X-User-Id", user_id),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> Response {
        builder.send().await.expect("Request failed")
    }

    // ========================================================================
    // Server
    // ========================================================================

    /// GET /
    pub async fn get_home(&self) -> Response {
        Self::send(self.request(Method::GET, "/")).await
    }

    // ========================================================================
    // Activity Endpoints
    // ========================================================================

    /// POST /v1/admin/activity/sweep
    pub async fn run_activity_sweep(&self) -> Response {
        Self::send(self.request(Method::POST, "/v1/admin/activity/sweep")).await
    }

    /// POST /v1/students/{id}/activity/recompute
    pub async fn recompute_student(&self, student_id: &str) -> Response {
        Self::send(self.request(
            Method::POST,
            &format!("/v1/students/{}/activity/recompute", student_id),
        ))
        .await
    }

    /// GET /v1/students/{id}/status-history
    pub async fn get_status_history(&self, student_id: &str) -> Response {
        Self::send(self.request(
            Method::GET,
            &format!("/v1/students/{}/status-history", student_id),
        ))
        .await
    }

    // ========================================================================
    // CSV Import
    // ========================================================================

    /// POST /v1/import/csv-songs
    pub async fn import_csv_songs(
        &self,
        student_id: &str,
        rows: Vec<Value>,
        validate_only: bool,
    ) -> Response {
        Self::send(
            self.request(Method::POST, "/v1/import/csv-songs")
                .json(&json!({
                    "studentId": student_id,
                    "rows": rows,
                    "validateOnly": validate_only,
                })),
        )
        .await
    }

    /// POST /v1/import/csv-songs with an arbitrary body
    pub async fn import_csv_songs_raw(&self, body: Value) -> Response {
        Self::send(self.request(Method::POST, "/v1/import/csv-songs").json(&body)).await
    }

    // ========================================================================
    // Lessons
    // ========================================================================

    /// POST /v1/lessons
    pub async fn create_lesson(&self, body: Value) -> Response {
        Self::send(self.request(Method::POST, "/v1/lessons").json(&body)).await
    }

    /// PUT /v1/lessons/{id}
    pub async fn update_lesson(&self, lesson_id: &str, body: Value) -> Response {
        Self::send(
            self.request(Method::PUT, &format!("/v1/lessons/{}", lesson_id))
                .json(&body),
        )
        .await
    }

    /// POST /v1/lessons/{id}/remote-sync
    pub async fn sync_remote_event(&self, lesson_id: &str, event: Value) -> Response {
        Self::send(
            self.request(Method::POST, &format!("/v1/lessons/{}/remote-sync", lesson_id))
                .json(&event),
        )
        .await
    }

    // ========================================================================
    // Sync Conflicts
    // ========================================================================

    /// GET /v1/conflicts
    pub async fn get_conflicts(&self) -> Response {
        Self::send(self.request(Method::GET, "/v1/conflicts")).await
    }

    /// POST /v1/conflicts/{id}/resolve
    pub async fn resolve_conflict(&self, conflict_id: &str, resolution: &str) -> Response {
        Self::send(
            self.request(Method::POST, &format!("/v1/conflicts/{}/resolve", conflict_id))
                .json(&json!({ "resolution": resolution })),
        )
        .await
    }

    // ========================================================================
    // Admin Jobs
    // ========================================================================

    /// GET /v1/admin/jobs
    pub async fn list_jobs(&self) -> Response {
        Self::send(self.request(Method::GET, "/v1/admin/jobs")).await
    }

    /// GET /v1/admin/jobs/{id}
    pub async fn get_job(&self, job_id: &str) -> Response {
        Self::send(self.request(Method::GET, &format!("/v1/admin/jobs/{}", job_id))).await
    }

    /// POST /v1/admin/jobs/{id}/trigger
    pub async fn trigger_job(&self, job_id: &str) -> Response {
        Self::send(self.request(
            Method::POST,
            &format!("/v1/admin/jobs/{}/trigger", job_id),
        ))
        .await
    }

    /// Polls the job detail endpoint until the latest run has finished and
    /// returns the detail body.
    ///
    /// # Panics
    ///
    /// Panics if the run does not finish within `JOB_COMPLETION_TIMEOUT_MS`.
    pub async fn wait_for_job_run(&self, job_id: &str) -> Value {
        let start = std::time::Instant::now();
        loop {
            let body: Value = self.get_job(job_id).await.json().await.unwrap();
            let finished = body["history"]
                .as_array()
                .and_then(|runs| runs.first())
                .map(|run| run["status"] != "running")
                .unwrap_or(false);
            if finished && body["job"]["is_running"] == false {
                return body;
            }
            if start.elapsed() > Duration::from_millis(JOB_COMPLETION_TIMEOUT_MS) {
                panic!("Job {} did not finish in time: {}", job_id, body);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
