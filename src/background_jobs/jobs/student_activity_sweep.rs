//! Periodic activity sweep over every tracked student.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSummary},
};
use chrono::Utc;
use std::time::Duration;

pub struct StudentActivitySweepJob {
    interval: Duration,
}

impl StudentActivitySweepJob {
    pub fn new(interval_hours: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_hours * 60 * 60),
        }
    }
}

impl BackgroundJob for StudentActivitySweepJob {
    fn id(&self) -> &'static str {
        "student_activity_sweep"
    }

    fn name(&self) -> &'static str {
        "Student Activity Sweep"
    }

    fn description(&self) -> &'static str {
        "Flip active and inactive students based on recent and upcoming lessons"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn execute(&self, ctx: &JobContext) -> Result<JobSummary, JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let result = ctx
            .activity
            .run_activity_sweep_until(Utc::now(), || ctx.is_cancelled())
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;

        // Each student is committed on its own; the next run picks up the rest.
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        JobSummary::new(
            format!(
                "{} students checked, {} activated, {} deactivated",
                result.processed, result.activated_count, result.deactivated_count
            ),
            &result,
        )
    }
}
