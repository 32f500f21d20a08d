use super::context::JobContext;
use super::handle::{SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, JobError};
use crate::server::metrics;
use crate::server_store::{JobAuditEventType, JobRunOutcome, JobScheduleState, ServerStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on how long the loop sleeps between schedule checks.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Grace period granted to running jobs on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub struct JobScheduler {
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Task handles of running jobs, owned by the loop.
    running_handles: HashMap<String, JoinHandle<()>>,

    job_cancel_tokens: HashMap<String, CancellationToken>,

    server_store: Arc<dyn ServerStore>,

    command_receiver: mpsc::Receiver<SchedulerCommand>,

    shutdown_token: CancellationToken,

    job_context: JobContext,
}

impl JobScheduler {
    pub fn new(
        server_store: Arc<dyn ServerStore>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            server_store,
            command_receiver,
            shutdown_token,
            job_context,
        }
    }

    /// Registers a job. A job that never ran gets its first run scheduled
    /// one interval from now; a persisted schedule is kept as is.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());

        match self.server_store.get_schedule_state(&job_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                let state = JobScheduleState {
                    job_id: job_id.clone(),
                    next_run_at: next_run_after(Utc::now(), job.interval()),
                    last_run_at: None,
                };
                if let Err(e) = self.server_store.update_schedule_state(&state) {
                    warn!("Failed to initialize schedule state for {}: {}", job_id, e);
                }
            }
            Err(e) => warn!("Failed to read schedule state for {}: {}", job_id, e),
        }

        self.shared_state.write().await.jobs.insert(job_id, job);
    }

    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        match self.server_store.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale jobs: {}", e);
            }
        }

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        {
            let state = self.shared_state.read().await;
            if !state.jobs.contains_key(job_id) {
                return Err(JobError::NotFound);
            }
            if state.running_jobs.contains(job_id) {
                return Err(JobError::AlreadyRunning);
            }
        }

        self.spawn_job(job_id, "manual").await;
        Ok(())
    }

    fn next_run_time(&self, job_id: &str) -> Option<DateTime<Utc>> {
        match self.server_store.get_schedule_state(job_id) {
            Ok(state) => state.map(|s| s.next_run_at),
            Err(e) => {
                warn!("Failed to read schedule state for {}: {}", job_id, e);
                None
            }
        }
    }

    async fn time_until_next_scheduled_job(&self) -> Duration {
        let now = Utc::now();
        let mut min_duration = MAX_IDLE;

        let state = self.shared_state.read().await;
        for job_id in state.jobs.keys() {
            if state.running_jobs.contains(job_id) {
                continue;
            }
            if let Some(next_run) = self.next_run_time(job_id) {
                if next_run <= now {
                    return Duration::ZERO;
                }
                let duration = (next_run - now).to_std().unwrap_or(Duration::from_secs(1));
                min_duration = min_duration.min(duration);
            }
        }

        min_duration
    }

    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let due: Vec<String> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .keys()
                .filter(|job_id| !state.running_jobs.contains(*job_id))
                .filter(|job_id| {
                    self.next_run_time(job_id)
                        .is_some_and(|next_run| next_run <= now)
                })
                .cloned()
                .collect()
        };

        for job_id in due {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = match self.shared_state.read().await.jobs.get(job_id) {
            Some(job) => Arc::clone(job),
            None => {
                error!("Attempted to spawn unknown job: {}", job_id);
                return;
            }
        };

        let run_id = match self.server_store.record_job_start(job_id, triggered_by) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to record job start for {}: {}", job_id, e);
                return;
            }
        };
        if let Err(e) =
            self.server_store
                .log_job_audit(job_id, JobAuditEventType::Started, None, None, None)
        {
            warn!("Failed to write audit entry for {}: {}", job_id, e);
        }

        info!(
            "Starting job: {} (run_id: {}, triggered_by: {})",
            job_id, run_id, triggered_by
        );

        self.shared_state
            .write()
            .await
            .running_jobs
            .insert(job_id.to_string());

        // Push the next run out before the job starts so that a slow run does
        // not get scheduled a second time.
        let schedule_state = JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at: next_run_after(Utc::now(), job.interval()),
            last_run_at: None,
        };
        if let Err(e) = self.server_store.update_schedule_state(&schedule_state) {
            warn!("Failed to update schedule state for {}: {}", job_id, e);
        }

        metrics::set_background_job_running(job_id, true);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = self.job_context.with_cancellation_token(cancel_token);

        let server_store = Arc::clone(&self.server_store);
        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            let (outcome, status_label) = match result {
                Ok(Ok(summary)) => {
                    info!(
                        "Job {} completed in {:?}: {}",
                        job_id_owned, elapsed, summary.headline
                    );
                    (
                        JobRunOutcome::Completed {
                            summary: Some(summary.details),
                        },
                        "success",
                    )
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    let error = "Cancelled".to_string();
                    (JobRunOutcome::Failed { error }, "cancelled")
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    let error = e.to_string();
                    (JobRunOutcome::Failed { error }, "failed")
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    let error = format!("Task panic: {}", e);
                    (JobRunOutcome::Failed { error }, "panic")
                }
            };

            metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            if let Err(e) = server_store.log_job_audit(
                &job_id_owned,
                JobAuditEventType::from(&outcome),
                Some(elapsed.as_millis() as i64),
                outcome.summary(),
                outcome.error(),
            ) {
                warn!("Failed to write audit entry for {}: {}", job_id_owned, e);
            }
            if let Err(e) = server_store.record_job_finish(run_id, &outcome) {
                error!("Failed to record job finish for {}: {}", job_id_owned, e);
            }

            shared_state.write().await.running_jobs.remove(&job_id_owned);
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    async fn update_schedule_after_run(&self, job_id: &str) {
        let job = match self.shared_state.read().await.jobs.get(job_id) {
            Some(job) => Arc::clone(job),
            None => return,
        };

        let now = Utc::now();
        let state = JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at: next_run_after(now, job.interval()),
            last_run_at: Some(now),
        };
        if let Err(e) = self.server_store.update_schedule_state(&state) {
            error!("Failed to update schedule state for {}: {}", job_id, e);
        }
    }

    async fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            if let Some(handle) = self.running_handles.remove(&job_id) {
                let _ = handle.await;
            }
            self.job_cancel_tokens.remove(&job_id);
            self.update_schedule_after_run(&job_id).await;
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        let mut wait_jobs = Vec::new();
        for (job_id, handle) in self.running_handles.drain() {
            if let Some(token) = self.job_cancel_tokens.get(&job_id) {
                debug!("Cancelling job: {}", job_id);
                token.cancel();
            }
            wait_jobs.push(handle);
        }

        for handle in wait_jobs {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

fn next_run_after(from: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    from + chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::days(1))
}

/// Builds a scheduler together with the handle used by the HTTP layer.
pub fn create_scheduler(
    server_store: Arc<dyn ServerStore>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState {
        jobs: HashMap::new(),
        running_jobs: HashSet::new(),
    }));

    let scheduler = JobScheduler::new(
        server_store.clone(),
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
    );
    let handle = SchedulerHandle::new(command_tx, shared_state, server_store);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityEngine;
    use crate::background_jobs::job::JobSummary;
    use crate::config::{ActivitySettings, SyncConflictSettings};
    use crate::crm_store::SqliteCrmStore;
    use crate::server_store::{JobRunStatus, SqliteServerStore};
    use crate::sync_conflicts::ConflictResolver;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86_400);

    struct TestJob {
        id: &'static str,
        interval: Duration,
        execution_count: Arc<AtomicUsize>,
        should_fail: bool,
    }

    impl TestJob {
        fn daily(id: &'static str, should_fail: bool) -> (Arc<Self>, Arc<AtomicUsize>) {
            let count = Arc::new(AtomicUsize::new(0));
            let job = Arc::new(Self {
                id,
                interval: DAY,
                execution_count: count.clone(),
                should_fail,
            });
            (job, count)
        }
    }

    impl BackgroundJob for TestJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Job"
        }

        fn description(&self) -> &'static str {
            "A test job for unit tests"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        fn execute(&self, _ctx: &JobContext) -> Result<JobSummary, JobError> {
            let runs = self.execution_count.fetch_add(1, Ordering::SeqCst) + 1;
            if self.should_fail {
                Err(JobError::ExecutionFailed("Test failure".to_string()))
            } else {
                JobSummary::new(format!("run {}", runs), &serde_json::json!({ "runs": runs }))
            }
        }
    }

    struct Harness {
        scheduler: JobScheduler,
        handle: SchedulerHandle,
        server_store: Arc<SqliteServerStore>,
        shutdown_token: CancellationToken,
        _temp_dir: TempDir,
    }

    fn harness() -> Harness {
        let temp_dir = TempDir::new().unwrap();
        let server_store =
            Arc::new(SqliteServerStore::new(temp_dir.path().join("server.db")).unwrap());
        let crm_store = Arc::new(SqliteCrmStore::new(temp_dir.path().join("crm.db")).unwrap());
        let activity = Arc::new(ActivityEngine::new(
            crm_store.clone(),
            ActivitySettings::default(),
        ));
        let resolver = Arc::new(ConflictResolver::new(
            crm_store,
            SyncConflictSettings::default(),
            activity.clone(),
        ));

        let shutdown_token = CancellationToken::new();
        let job_context = JobContext::new(shutdown_token.child_token(), activity, resolver);
        let (scheduler, handle) =
            create_scheduler(server_store.clone(), shutdown_token.clone(), job_context);

        Harness {
            scheduler,
            handle,
            server_store,
            shutdown_token,
            _temp_dir: temp_dir,
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..40 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    #[tokio::test]
    async fn test_register_and_list_jobs() {
        let mut h = harness();
        assert!(h.handle.list_jobs().await.unwrap().is_empty());

        let (job, _) = TestJob::daily("test_job", false);
        h.scheduler.register_job(job).await;

        assert_eq!(h.scheduler.job_count().await, 1);
        let jobs = h.handle.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "test_job");
        assert_eq!(jobs[0].name, "Test Job");
        assert_eq!(jobs[0].schedule.value_secs, 86_400);
        assert!(!jobs[0].is_running);
        assert!(jobs[0].last_run.is_none());
        assert!(jobs[0].next_run_at.is_some());
        assert!(h.handle.get_job("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_run_is_one_interval_away() {
        let mut h = harness();
        let before = Utc::now();
        let (job, _) = TestJob::daily("interval_job", false);
        h.scheduler.register_job(job).await;

        let state = h
            .server_store
            .get_schedule_state("interval_job")
            .unwrap()
            .unwrap();
        assert!(state.next_run_at >= before + chrono::Duration::hours(23));
        assert!(state.last_run_at.is_none());
        assert!(h.scheduler.time_until_next_scheduled_job().await <= MAX_IDLE);
    }

    #[tokio::test]
    async fn test_overdue_job_runs_when_scheduler_starts() {
        let mut h = harness();
        let (job, count) = TestJob::daily("overdue_job", false);
        h.server_store
            .update_schedule_state(&JobScheduleState {
                job_id: "overdue_job".to_string(),
                next_run_at: Utc::now() - chrono::Duration::hours(1),
                last_run_at: None,
            })
            .unwrap();
        h.scheduler.register_job(job).await;

        let mut scheduler = h.scheduler;
        let sched_handle = tokio::spawn(async move { scheduler.run().await });

        wait_until(|| count.load(Ordering::SeqCst) >= 1).await;
        wait_until(|| {
            h.server_store
                .get_last_run("overdue_job")
                .unwrap()
                .is_some_and(|run| run.status != JobRunStatus::Running)
        })
        .await;

        let detail = h.handle.job_detail("overdue_job", 10, 10).await.unwrap().unwrap();
        assert_eq!(detail.history.len(), 1);
        assert_eq!(detail.history[0].status, "completed");
        assert_eq!(detail.history[0].triggered_by, "schedule");
        assert_eq!(detail.history[0].summary, Some(serde_json::json!({ "runs": 1 })));

        assert_eq!(detail.audit[0].event_type, JobAuditEventType::Completed);
        assert!(detail.audit[0].duration_ms.is_some());
        assert_eq!(detail.audit[0].details, detail.history[0].summary);
        assert_eq!(detail.audit[1].event_type, JobAuditEventType::Started);

        let state = h
            .server_store
            .get_schedule_state("overdue_job")
            .unwrap()
            .unwrap();
        assert!(state.next_run_at > Utc::now() + chrono::Duration::hours(23));

        h.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_failed_job_records_error() {
        let mut h = harness();
        let (job, count) = TestJob::daily("failing_job", true);
        h.scheduler.register_job(job).await;

        let mut scheduler = h.scheduler;
        let sched_handle = tokio::spawn(async move { scheduler.run().await });

        h.handle.trigger_job("failing_job").await.unwrap();
        wait_until(|| {
            h.server_store
                .get_last_run("failing_job")
                .unwrap()
                .is_some_and(|run| run.status == JobRunStatus::Failed)
        })
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let last = h.server_store.get_last_run("failing_job").unwrap().unwrap();
        assert!(last.error_message.unwrap().contains("Test failure"));
        assert!(last.summary.is_none());

        let audit = h
            .server_store
            .get_job_audit_log_by_job("failing_job", 10)
            .unwrap();
        assert_eq!(audit[0].event_type, JobAuditEventType::Failed);

        h.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let mut h = harness();
        let (job, count) = TestJob::daily("manual_job", false);
        h.scheduler.register_job(job).await;

        let mut scheduler = h.scheduler;
        let sched_handle = tokio::spawn(async move { scheduler.run().await });

        assert!(matches!(
            h.handle.trigger_job("missing").await,
            Err(JobError::NotFound)
        ));
        h.handle.trigger_job("manual_job").await.unwrap();
        wait_until(|| count.load(Ordering::SeqCst) == 1).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        wait_until(|| {
            h.server_store
                .get_last_run("manual_job")
                .unwrap()
                .is_some_and(|run| run.status == JobRunStatus::Completed)
        })
        .await;
        let last = h.server_store.get_last_run("manual_job").unwrap().unwrap();
        assert_eq!(last.triggered_by, "manual");

        h.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_trigger_while_running_is_rejected() {
        struct SlowJob {
            started: Arc<AtomicBool>,
        }

        impl BackgroundJob for SlowJob {
            fn id(&self) -> &'static str {
                "slow_job"
            }
            fn name(&self) -> &'static str {
                "Slow Job"
            }
            fn description(&self) -> &'static str {
                "Takes a while"
            }
            fn interval(&self) -> Duration {
                DAY
            }
            fn execute(&self, ctx: &JobContext) -> Result<JobSummary, JobError> {
                self.started.store(true, Ordering::SeqCst);
                for _ in 0..50 {
                    if ctx.is_cancelled() {
                        return Err(JobError::Cancelled);
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                JobSummary::new("done", &())
            }
        }

        let mut h = harness();
        let started = Arc::new(AtomicBool::new(false));
        h.scheduler
            .register_job(Arc::new(SlowJob {
                started: started.clone(),
            }))
            .await;

        let mut scheduler = h.scheduler;
        let sched_handle = tokio::spawn(async move { scheduler.run().await });

        h.handle.trigger_job("slow_job").await.unwrap();
        wait_until(|| started.load(Ordering::SeqCst)).await;
        let job = h.handle.get_job("slow_job").await.unwrap().unwrap();
        assert!(job.is_running);
        assert!(matches!(
            h.handle.trigger_job("slow_job").await,
            Err(JobError::AlreadyRunning)
        ));

        // Running jobs stop early on shutdown
        h.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(3), sched_handle).await;
        let last = h.server_store.get_last_run("slow_job").unwrap().unwrap();
        assert_eq!(last.status, JobRunStatus::Failed);
        assert_eq!(last.error_message.as_deref(), Some("Cancelled"));
    }
}
