use super::context::JobContext;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job not found")]
    NotFound,
    #[error("Job is already running")]
    AlreadyRunning,
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Job was cancelled")]
    Cancelled,
}

/// What a successful run reports: a one-line headline for the logs and the
/// full result, stored with the run and shown by the admin API.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub headline: String,
    pub details: Value,
}

impl JobSummary {
    pub fn new<T: Serialize>(headline: impl Into<String>, result: &T) -> Result<Self, JobError> {
        let details = serde_json::to_value(result)
            .map_err(|e| JobError::ExecutionFailed(format!("Unserializable result: {}", e)))?;
        Ok(Self {
            headline: headline.into(),
            details,
        })
    }
}

/// A unit of periodic work.
///
/// Jobs are executed synchronously through `spawn_blocking`. Long-running
/// work should check `ctx.is_cancelled()` and return `JobError::Cancelled`;
/// shutdown cancels every running job and waits a short grace period.
pub trait BackgroundJob: Send + Sync {
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Time between runs, counted from the end of the previous run (or from
    /// registration for a job that never ran).
    fn interval(&self) -> Duration;

    fn execute(&self, ctx: &JobContext) -> Result<JobSummary, JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_serializes_the_result() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Counts {
            deactivated_count: usize,
        }

        let summary = JobSummary::new("1 deactivated", &Counts { deactivated_count: 1 }).unwrap();
        assert_eq!(summary.headline, "1 deactivated");
        assert_eq!(summary.details, serde_json::json!({"deactivatedCount": 1}));
    }

    #[test]
    fn job_error_messages() {
        assert_eq!(JobError::NotFound.to_string(), "Job not found");
        assert_eq!(
            JobError::ExecutionFailed("db locked".to_string()).to_string(),
            "Execution failed: db locked"
        );
    }
}
