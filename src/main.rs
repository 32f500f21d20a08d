use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use strummy_server::activity::ActivityEngine;
use strummy_server::background_jobs::jobs::{ConflictAutoResolveJob, StudentActivitySweepJob};
use strummy_server::background_jobs::{create_scheduler, JobContext};
use strummy_server::config;
use strummy_server::crm_store::{CrmStore, SqliteCrmStore};
use strummy_server::csv_import::CsvImporter;
use strummy_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use strummy_server::server_store::{ServerStore, SqliteServerStore};
use strummy_server::sync_conflicts::ConflictResolver;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the database files (crm.db, server.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Days without a completed lesson before an active student is marked inactive.
    #[clap(long)]
    pub inactivity_threshold_days: Option<u32>,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            inactivity_threshold_days: args.inactivity_threshold_days,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  port: {}", app_config.port);
    info!(
        "  inactivity_threshold_days: {}",
        app_config.activity.inactivity_threshold_days
    );

    info!("Initializing metrics...");
    metrics::init_metrics();

    if !app_config.crm_db_path().exists() {
        info!("Creating new CRM database at {:?}", app_config.crm_db_path());
    }
    let crm_store: Arc<dyn CrmStore> = Arc::new(SqliteCrmStore::new(app_config.crm_db_path())?);

    info!(
        "Initializing server store at {:?}",
        app_config.server_db_path()
    );
    let server_store: Arc<dyn ServerStore> =
        Arc::new(SqliteServerStore::new(app_config.server_db_path())?);

    let activity = Arc::new(ActivityEngine::new(
        crm_store.clone(),
        app_config.activity.clone(),
    ));
    let csv_importer = Arc::new(CsvImporter::new(
        crm_store.clone(),
        app_config.csv_import.clone(),
        activity.clone(),
    ));
    let conflict_resolver = Arc::new(ConflictResolver::new(
        crm_store.clone(),
        app_config.sync_conflicts.clone(),
        activity.clone(),
    ));

    // Set up background job scheduler
    let shutdown_token = CancellationToken::new();
    let job_context = JobContext::new(
        shutdown_token.child_token(),
        activity.clone(),
        conflict_resolver.clone(),
    );
    let (mut scheduler, scheduler_handle) =
        create_scheduler(server_store, shutdown_token.clone(), job_context);

    scheduler
        .register_job(Arc::new(StudentActivitySweepJob::new(
            app_config.activity.sweep_interval_hours,
        )))
        .await;
    scheduler
        .register_job(Arc::new(ConflictAutoResolveJob::new(
            app_config.sync_conflicts.auto_resolve_interval_hours,
        )))
        .await;

    info!(
        "Job scheduler initialized with {} job(s)",
        scheduler.job_count().await
    );

    let state = ServerState::new(
        ServerConfig {
            requests_logging_level: app_config.logging_level.clone(),
            port: app_config.port,
            metrics_port: app_config.metrics_port,
        },
        crm_store,
        activity,
        csv_importer,
        conflict_resolver,
        Some(scheduler_handle),
    );

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    // Run HTTP server and job scheduler concurrently
    tokio::select! {
        result = run_server(state, shutdown_token.clone()) => {
            info!("HTTP server stopped: {:?}", result);
            shutdown_token.cancel();
            result
        },
        _ = scheduler.run() => {
            info!("Scheduler stopped");
            Ok(())
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            // Give the scheduler a moment to shut down gracefully
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }
    }
}
