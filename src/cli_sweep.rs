//! One-shot maintenance run against the CRM database, for cron or manual use.
//!
//! Runs an activity sweep, optionally followed by the sync conflict
//! auto-resolve, and prints the combined result as JSON on stdout.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use strummy_server::activity::{ActivityEngine, SweepResult};
use strummy_server::config;
use strummy_server::crm_store::{CrmStore, SqliteCrmStore};
use strummy_server::sync_conflicts::{AutoResolveResult, ConflictResolver};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[command(name = "cli-sweep", version)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing crm.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Days without a completed lesson before an active student is marked inactive.
    #[clap(long)]
    pub inactivity_threshold_days: Option<u32>,

    /// Also resolve sync conflicts left pending past the configured window.
    #[clap(long)]
    pub conflicts: bool,
}

#[derive(Serialize)]
struct CliSweepOutput {
    sweep: SweepResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    conflicts: Option<AutoResolveResult>,
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    // Logs go to stderr so that stdout carries only the JSON result.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(config::FileConfig::load)
        .transpose()?;
    let cli_config = config::CliConfig {
        db_dir: cli_args.db_dir.clone(),
        inactivity_threshold_days: cli_args.inactivity_threshold_days,
        ..Default::default()
    };
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    let crm_db_path = app_config.crm_db_path();
    info!("Opening CRM database at {:?}", crm_db_path);
    let store: Arc<dyn CrmStore> = Arc::new(
        SqliteCrmStore::new(&crm_db_path)
            .with_context(|| format!("Failed to open {:?}", crm_db_path))?,
    );

    let activity = Arc::new(ActivityEngine::new(
        store.clone(),
        app_config.activity.clone(),
    ));
    let sweep = activity.run_activity_sweep(Utc::now())?;

    let conflicts = if cli_args.conflicts {
        let resolver = ConflictResolver::new(store, app_config.sync_conflicts.clone(), activity);
        Some(resolver.auto_resolve_old_conflicts(Utc::now()))
    } else {
        None
    };

    let output = CliSweepOutput { sweep, conflicts };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
