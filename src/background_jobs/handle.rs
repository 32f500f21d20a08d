use super::job::{BackgroundJob, JobError};
use crate::server_store::{JobAuditEntry, JobRun, ServerStore};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};

/// A registered job as listed by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobScheduleInfo {
    #[serde(rename = "type")]
    pub schedule_type: &'static str,
    pub value_secs: u64,
}

impl JobScheduleInfo {
    pub fn every(interval: Duration) -> Self {
        JobScheduleInfo {
            schedule_type: "interval",
            value_secs: interval.as_secs(),
        }
    }
}

/// One run, with the counters the job reported when it completed.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub status: &'static str,
    pub error_message: Option<String>,
    pub triggered_by: String,
    pub summary: Option<Value>,
}

impl From<JobRun> for JobRunInfo {
    fn from(run: JobRun) -> Self {
        JobRunInfo {
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|dt| dt.to_rfc3339()),
            duration_ms: run.duration_ms(),
            status: run.status.as_str(),
            error_message: run.error_message,
            triggered_by: run.triggered_by,
            summary: run.summary,
        }
    }
}

/// Everything the admin detail page shows for one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    pub job: JobInfo,
    /// Most recent first.
    pub history: Vec<JobRunInfo>,
    /// Most recent first.
    pub audit: Vec<JobAuditEntry>,
}

pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

/// State shared between the scheduler loop and its handles.
pub struct SharedJobState {
    /// Set at registration, never changes afterwards.
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    pub running_jobs: HashSet<String>,
}

/// Read and trigger access to the scheduler for the HTTP layer.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    shared_state: Arc<RwLock<SharedJobState>>,
    server_store: Arc<dyn ServerStore>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedJobState>>,
        server_store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
            server_store,
        }
    }

    fn job_info(
        &self,
        job_id: &str,
        job: &Arc<dyn BackgroundJob>,
        is_running: bool,
    ) -> Result<JobInfo> {
        let last_run = self
            .server_store
            .get_last_run(job_id)?
            .map(JobRunInfo::from);
        let next_run_at = self
            .server_store
            .get_schedule_state(job_id)?
            .map(|s| s.next_run_at.to_rfc3339());

        Ok(JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            schedule: JobScheduleInfo::every(job.interval()),
            is_running,
            last_run,
            next_run_at,
        })
    }

    /// All registered jobs, sorted by id.
    pub async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        let state = self.shared_state.read().await;
        let mut jobs = state
            .jobs
            .iter()
            .map(|(job_id, job)| self.job_info(job_id, job, state.running_jobs.contains(job_id)))
            .collect::<Result<Vec<_>>>()?;

        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        let state = self.shared_state.read().await;
        state
            .jobs
            .get(job_id)
            .map(|job| self.job_info(job_id, job, state.running_jobs.contains(job_id)))
            .transpose()
    }

    /// `None` for an unregistered job.
    pub async fn job_detail(
        &self,
        job_id: &str,
        history_limit: usize,
        audit_limit: usize,
    ) -> Result<Option<JobDetail>> {
        let Some(job) = self.get_job(job_id).await? else {
            return Ok(None);
        };
        let history = self
            .server_store
            .get_job_history(job_id, history_limit)?
            .into_iter()
            .map(JobRunInfo::from)
            .collect();
        let audit = self
            .server_store
            .get_job_audit_log_by_job(job_id, audit_limit)?;

        Ok(Some(JobDetail {
            job,
            history,
            audit,
        }))
    }

    /// Asks the scheduler loop to start a run now. Fails with `NotFound` or
    /// `AlreadyRunning` without queueing anything.
    pub async fn trigger_job(&self, job_id: &str) -> Result<(), JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }
}
