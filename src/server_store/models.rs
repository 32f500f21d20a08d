use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobRunStatus::Running),
            "completed" => Some(JobRunStatus::Completed),
            "failed" => Some(JobRunStatus::Failed),
            _ => None,
        }
    }
}

/// How a run ended, as written back to `job_runs`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRunOutcome {
    /// `summary` holds the job's counters, e.g. a sweep's activated and
    /// deactivated students.
    Completed { summary: Option<Value> },
    Failed { error: String },
}

impl JobRunOutcome {
    pub fn status(&self) -> JobRunStatus {
        match self {
            JobRunOutcome::Completed { .. } => JobRunStatus::Completed,
            JobRunOutcome::Failed { .. } => JobRunStatus::Failed,
        }
    }

    pub fn summary(&self) -> Option<&Value> {
        match self {
            JobRunOutcome::Completed { summary } => summary.as_ref(),
            JobRunOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobRunOutcome::Completed { .. } => None,
            JobRunOutcome::Failed { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: i64,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    /// "schedule" or "manual".
    pub triggered_by: String,
    pub summary: Option<Value>,
}

impl JobRun {
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_milliseconds())
    }
}

#[derive(Debug, Clone)]
pub struct JobScheduleState {
    pub job_id: String,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAuditEventType {
    Started,
    Completed,
    Failed,
}

impl JobAuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAuditEventType::Started => "started",
            JobAuditEventType::Completed => "completed",
            JobAuditEventType::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(JobAuditEventType::Started),
            "completed" => Some(JobAuditEventType::Completed),
            "failed" => Some(JobAuditEventType::Failed),
            _ => None,
        }
    }
}

impl From<&JobRunOutcome> for JobAuditEventType {
    fn from(outcome: &JobRunOutcome) -> Self {
        match outcome {
            JobRunOutcome::Completed { .. } => JobAuditEventType::Completed,
            JobRunOutcome::Failed { .. } => JobAuditEventType::Failed,
        }
    }
}

/// One line of the per-job audit trail. Completed entries repeat the run
/// summary in `details`.
#[derive(Debug, Clone, Serialize)]
pub struct JobAuditEntry {
    pub id: i64,
    pub job_id: String,
    pub event_type: JobAuditEventType,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub details: Option<Value>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_accessors() {
        let done = JobRunOutcome::Completed {
            summary: Some(json!({"processed": 2})),
        };
        assert_eq!(done.status(), JobRunStatus::Completed);
        assert_eq!(done.summary(), Some(&json!({"processed": 2})));
        assert_eq!(JobAuditEventType::from(&done), JobAuditEventType::Completed);

        let failed = JobRunOutcome::Failed {
            error: "Cancelled".to_string(),
        };
        assert_eq!(failed.status(), JobRunStatus::Failed);
        assert_eq!(failed.error(), Some("Cancelled"));
        assert!(failed.summary().is_none());
    }

    #[test]
    fn duration_needs_a_finish_time() {
        let started_at = Utc::now();
        let mut run = JobRun {
            id: 1,
            job_id: "student_activity_sweep".to_string(),
            started_at,
            finished_at: None,
            status: JobRunStatus::Running,
            error_message: None,
            triggered_by: "manual".to_string(),
            summary: None,
        };
        assert_eq!(run.duration_ms(), None);

        run.finished_at = Some(started_at + chrono::Duration::milliseconds(1500));
        assert_eq!(run.duration_ms(), Some(1500));
    }
}
