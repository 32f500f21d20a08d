mod file_config;

pub use file_config::{ActivityConfig, CsvImportConfig, FileConfig, SyncConflictsConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// Upper bound for every "days" setting (ten years).
const MAX_DAYS: u32 = 3650;
/// Upper bound for every job interval (one year).
const MAX_INTERVAL_HOURS: u64 = 8760;

/// Rejects zero and anything above `max`.
fn check_range<T>(name: &str, value: T, max: T) -> Result<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value == T::default() {
        bail!("{} must be greater than 0", name);
    }
    if value > max {
        bail!("{} must be at most {} (got {})", name, max, value);
    }
    Ok(())
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub inactivity_threshold_days: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    // Feature configs (with defaults)
    pub activity: ActivitySettings,
    pub csv_import: CsvImportSettings,
    pub sync_conflicts: SyncConflictSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let activity_defaults = ActivitySettings::default();
        let activity_file = file.activity.unwrap_or_default();
        let activity = ActivitySettings {
            inactivity_threshold_days: activity_file
                .inactivity_threshold_days
                .or(cli.inactivity_threshold_days)
                .unwrap_or(activity_defaults.inactivity_threshold_days),
            sweep_interval_hours: activity_file
                .sweep_interval_hours
                .unwrap_or(activity_defaults.sweep_interval_hours),
        };
        check_range(
            "inactivity_threshold_days",
            activity.inactivity_threshold_days,
            MAX_DAYS,
        )?;
        check_range(
            "sweep_interval_hours",
            activity.sweep_interval_hours,
            MAX_INTERVAL_HOURS,
        )?;

        let csv_defaults = CsvImportSettings::default();
        let csv_file = file.csv_import.unwrap_or_default();
        let csv_import = CsvImportSettings {
            matched_threshold: csv_file
                .matched_threshold
                .unwrap_or(csv_defaults.matched_threshold),
            low_confidence_threshold: csv_file
                .low_confidence_threshold
                .unwrap_or(csv_defaults.low_confidence_threshold),
        };
        if !(csv_import.low_confidence_threshold > 0.0
            && csv_import.low_confidence_threshold <= csv_import.matched_threshold
            && csv_import.matched_threshold <= 1.0)
        {
            bail!(
                "csv_import thresholds must satisfy 0 < low_confidence_threshold ({}) <= matched_threshold ({}) <= 1",
                csv_import.low_confidence_threshold,
                csv_import.matched_threshold
            );
        }

        let conflict_defaults = SyncConflictSettings::default();
        let conflict_file = file.sync_conflicts.unwrap_or_default();
        let sync_conflicts = SyncConflictSettings {
            simultaneous_threshold_ms: conflict_file
                .simultaneous_threshold_ms
                .unwrap_or(conflict_defaults.simultaneous_threshold_ms),
            enable_manual_review: conflict_file
                .enable_manual_review
                .unwrap_or(conflict_defaults.enable_manual_review),
            auto_resolve_after_days: conflict_file
                .auto_resolve_after_days
                .unwrap_or(conflict_defaults.auto_resolve_after_days),
            auto_resolve_interval_hours: conflict_file
                .auto_resolve_interval_hours
                .unwrap_or(conflict_defaults.auto_resolve_interval_hours),
        };
        if sync_conflicts.simultaneous_threshold_ms < 0 {
            bail!("simultaneous_threshold_ms must not be negative");
        }
        check_range(
            "auto_resolve_after_days",
            sync_conflicts.auto_resolve_after_days,
            MAX_DAYS,
        )?;
        check_range(
            "auto_resolve_interval_hours",
            sync_conflicts.auto_resolve_interval_hours,
            MAX_INTERVAL_HOURS,
        )?;

        Ok(Self {
            db_dir,
            port,
            metrics_port,
            logging_level,
            activity,
            csv_import,
            sync_conflicts,
        })
    }

    pub fn crm_db_path(&self) -> PathBuf {
        self.db_dir.join("crm.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }
}

#[derive(Debug, Clone)]
pub struct ActivitySettings {
    /// Days without a completed lesson before an active student goes inactive.
    pub inactivity_threshold_days: u32,
    pub sweep_interval_hours: u64,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            inactivity_threshold_days: 28,
            sweep_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CsvImportSettings {
    pub matched_threshold: f64,
    pub low_confidence_threshold: f64,
}

impl Default for CsvImportSettings {
    fn default() -> Self {
        Self {
            matched_threshold: 0.85,
            low_confidence_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConflictSettings {
    /// Edits closer together than this are considered simultaneous.
    pub simultaneous_threshold_ms: i64,
    pub enable_manual_review: bool,
    pub auto_resolve_after_days: u32,
    pub auto_resolve_interval_hours: u64,
}

impl Default for SyncConflictSettings {
    fn default() -> Self {
        Self {
            simultaneous_threshold_ms: 60_000,
            enable_manual_review: true,
            auto_resolve_after_days: 7,
            auto_resolve_interval_hours: 24,
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
