use super::models::{
    JobAuditEntry, JobAuditEventType, JobRun, JobRunOutcome, JobRunStatus, JobScheduleState,
};
use super::schema::SERVER_VERSIONED_SCHEMAS;
use super::ServerStore;
use crate::sqlite_persistence::open_versioned_db;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

const JOB_RUN_COLUMNS: &str =
    "id, job_id, started_at, finished_at, status, error_message, triggered_by, summary";

const INTERRUPTED_RUN_ERROR: &str = "Interrupted by server restart";

#[derive(Debug, thiserror::Error)]
#[error("unexpected {column} '{value}'")]
struct UnexpectedValue {
    column: &'static str,
    value: String,
}

pub struct SqliteServerStore {
    conn: Arc<Mutex<Connection>>,
}

/// Millisecond precision keeps runs started within the same second ordered.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn read_datetime(row: &rusqlite::Row, column: &'static str) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(column)?;
    parse_datetime(column, &value)
}

fn read_optional_datetime(
    row: &rusqlite::Row,
    column: &'static str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(column)?;
    value.map(|v| parse_datetime(column, &v)).transpose()
}

fn parse_datetime(column: &'static str, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                Type::Text,
                format!("{}: {}", column, e).into(),
            )
        })
}

fn read_enum<T>(
    row: &rusqlite::Row,
    column: &'static str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let value: String = row.get(column)?;
    parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            Box::new(UnexpectedValue { column, value }),
        )
    })
}

/// Summaries and audit details are informational: a corrupt blob reads as
/// missing instead of failing the whole row.
fn read_json(row: &rusqlite::Row, column: &'static str) -> rusqlite::Result<Option<Value>> {
    let value: Option<String> = row.get(column)?;
    Ok(value.and_then(|s| serde_json::from_str(&s).ok()))
}

fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
    Ok(JobRun {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        started_at: read_datetime(row, "started_at")?,
        finished_at: read_optional_datetime(row, "finished_at")?,
        status: read_enum(row, "status", JobRunStatus::parse)?,
        error_message: row.get("error_message")?,
        triggered_by: row.get("triggered_by")?,
        summary: read_json(row, "summary")?,
    })
}

fn row_to_schedule_state(row: &rusqlite::Row) -> rusqlite::Result<JobScheduleState> {
    Ok(JobScheduleState {
        job_id: row.get("job_id")?,
        next_run_at: read_datetime(row, "next_run_at")?,
        last_run_at: read_optional_datetime(row, "last_run_at")?,
    })
}

fn row_to_audit_entry(row: &rusqlite::Row) -> rusqlite::Result<JobAuditEntry> {
    Ok(JobAuditEntry {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        event_type: read_enum(row, "event_type", JobAuditEventType::parse)?,
        timestamp: read_datetime(row, "timestamp")?,
        duration_ms: row.get("duration_ms")?,
        details: read_json(row, "details")?,
        error: row.get("error")?,
    })
}

impl SqliteServerStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), SERVER_VERSIONED_SCHEMAS, "server")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl ServerStore for SqliteServerStore {
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job_id,
                format_datetime(&Utc::now()),
                JobRunStatus::Running.as_str(),
                triggered_by
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(&self, run_id: i64, outcome: &JobRunOutcome) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE job_runs
             SET finished_at = ?1, status = ?2, error_message = ?3, summary = ?4
             WHERE id = ?5",
            params![
                format_datetime(&Utc::now()),
                outcome.status().as_str(),
                outcome.error(),
                outcome.summary().map(Value::to_string),
                run_id
            ],
        )?;
        Ok(())
    }

    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
            JOB_RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(params![job_id, limit as i64], row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
        Ok(self.get_job_history(job_id, 1)?.into_iter().next())
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                JobRunStatus::Failed.as_str(),
                format_datetime(&Utc::now()),
                INTERRUPTED_RUN_ERROR,
                JobRunStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }

    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>> {
        let conn = self.conn.lock().unwrap();
        let state = conn
            .query_row(
                "SELECT job_id, next_run_at, last_run_at FROM job_schedules WHERE job_id = ?1",
                params![job_id],
                row_to_schedule_state,
            )
            .optional()?;
        Ok(state)
    }

    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        // A missing last_run_at never erases one already recorded.
        conn.execute(
            "INSERT INTO job_schedules (job_id, next_run_at, last_run_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET
                next_run_at = ?2,
                last_run_at = COALESCE(?3, last_run_at)",
            params![
                state.job_id,
                format_datetime(&state.next_run_at),
                state.last_run_at.as_ref().map(format_datetime)
            ],
        )?;
        Ok(())
    }

    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&Value>,
        error: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_audit_log (job_id, event_type, timestamp, duration_ms, details, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job_id,
                event_type.as_str(),
                format_datetime(&Utc::now()),
                duration_ms,
                details.map(Value::to_string),
                error
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_job_audit_log_by_job(&self, job_id: &str, limit: usize) -> Result<Vec<JobAuditEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, event_type, timestamp, duration_ms, details, error
             FROM job_audit_log
             WHERE job_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![job_id, limit as i64], row_to_audit_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}
