//! Bookkeeping for the background jobs: runs with their summaries, the next
//! scheduled time of each job, and an audit trail. Lives in `server.db`,
//! apart from the CRM data.

mod models;
mod schema;
mod sqlite_server_store;

pub use models::*;
pub use schema::SERVER_VERSIONED_SCHEMAS;
pub use sqlite_server_store::SqliteServerStore;

use anyhow::Result;

pub trait ServerStore: Send + Sync {
    /// Opens a run in the "running" state and returns its id.
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64>;
    fn record_job_finish(&self, run_id: i64, outcome: &JobRunOutcome) -> Result<()>;
    /// Most recent runs first.
    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>>;
    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
    /// Fails runs left "running" by a previous process.
    fn mark_stale_jobs_failed(&self) -> Result<usize>;

    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>>;
    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()>;

    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64>;
    fn get_job_audit_log_by_job(&self, job_id: &str, limit: usize) -> Result<Vec<JobAuditEntry>>;
}
