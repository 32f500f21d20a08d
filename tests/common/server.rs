//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own databases and scheduler.

use super::constants::*;
use super::fixtures::{seed_crm, SeededProfiles};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strummy_server::activity::ActivityEngine;
use strummy_server::background_jobs::jobs::{ConflictAutoResolveJob, StudentActivitySweepJob};
use strummy_server::background_jobs::{create_scheduler, JobContext};
use strummy_server::config::{ActivitySettings, CsvImportSettings, SyncConflictSettings};
use strummy_server::crm_store::{CrmStore, SqliteCrmStore};
use strummy_server::csv_import::CsvImporter;
use strummy_server::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use strummy_server::server_store::{ServerStore, SqliteServerStore};
use strummy_server::sync_conflicts::ConflictResolver;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance with isolated databases
///
/// When dropped, the server and its scheduler shut down and the temp
/// directory is cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// CRM store for direct database access in tests
    pub crm_store: Arc<dyn CrmStore>,

    /// Path of crm.db, for tests that need to age rows with raw SQL
    pub crm_db_path: PathBuf,

    /// Profiles seeded at startup
    pub profiles: SeededProfiles,

    // Private fields - keep resources alive until drop
    _temp_db_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    shutdown_token: CancellationToken,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Creates temporary CRM and server databases
    /// 2. Seeds profiles and catalog songs
    /// 3. Starts the job scheduler with the production jobs
    /// 4. Binds to a random port (127.0.0.1:0)
    /// 5. Spawns the server in a background task
    /// 6. Waits for the server to be ready
    ///
    /// # Panics
    ///
    /// Panics if any of the above fails.
    pub async fn spawn() -> Self {
        let temp_db_dir = TempDir::new().expect("Failed to create temp dir");
        let crm_db_path = temp_db_dir.path().join("crm.db");

        let crm_store: Arc<dyn CrmStore> =
            Arc::new(SqliteCrmStore::new(&crm_db_path).expect("Failed to open CRM store"));
        let profiles = seed_crm(crm_store.as_ref()).expect("Failed to seed CRM database");

        let server_store: Arc<dyn ServerStore> = Arc::new(
            SqliteServerStore::new(temp_db_dir.path().join("server.db"))
                .expect("Failed to create server store"),
        );

        let activity_settings = ActivitySettings {
            inactivity_threshold_days: INACTIVITY_THRESHOLD_DAYS as u32,
            ..Default::default()
        };
        let conflict_settings = SyncConflictSettings {
            auto_resolve_after_days: AUTO_RESOLVE_AFTER_DAYS as u32,
            ..Default::default()
        };

        let activity = Arc::new(ActivityEngine::new(crm_store.clone(), activity_settings));
        let csv_importer = Arc::new(CsvImporter::new(
            crm_store.clone(),
            CsvImportSettings::default(),
            activity.clone(),
        ));
        let conflict_resolver = Arc::new(ConflictResolver::new(
            crm_store.clone(),
            conflict_settings,
            activity.clone(),
        ));

        // Scheduler with the production jobs; intervals are long enough that
        // only explicit triggers run them during a test.
        let shutdown_token = CancellationToken::new();
        let job_context = JobContext::new(
            shutdown_token.child_token(),
            activity.clone(),
            conflict_resolver.clone(),
        );
        let (mut scheduler, scheduler_handle) =
            create_scheduler(server_store, shutdown_token.clone(), job_context);
        scheduler
            .register_job(Arc::new(StudentActivitySweepJob::new(24)))
            .await;
        scheduler
            .register_job(Arc::new(ConflictAutoResolveJob::new(24)))
            .await;
        tokio::spawn(async move {
            scheduler.run().await;
        });

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            ..Default::default()
        };
        let app = make_app(ServerState::new(
            config,
            crm_store.clone(),
            activity,
            csv_importer,
            conflict_resolver,
            Some(scheduler_handle),
        ));

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            crm_store,
            crm_db_path,
            profiles,
            _temp_db_dir: temp_db_dir,
            _shutdown_tx: Some(shutdown_tx),
            shutdown_token,
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    return;
                }
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }

    /// Opens a second connection to crm.db for raw fixture tweaks.
    pub fn raw_crm_connection(&self) -> rusqlite::Connection {
        rusqlite::Connection::open(&self.crm_db_path).expect("Failed to open crm.db")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.shutdown_token.cancel();
        // TempDir will be cleaned up automatically
    }
}
