//! Closes sync conflicts nobody reviewed in time, keeping the local lesson.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSummary},
};
use chrono::Utc;
use std::time::Duration;
use tracing::warn;

pub struct ConflictAutoResolveJob {
    interval: Duration,
}

impl ConflictAutoResolveJob {
    pub fn new(interval_hours: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_hours * 60 * 60),
        }
    }
}

impl BackgroundJob for ConflictAutoResolveJob {
    fn id(&self) -> &'static str {
        "sync_conflict_auto_resolve"
    }

    fn name(&self) -> &'static str {
        "Sync Conflict Auto-Resolve"
    }

    fn description(&self) -> &'static str {
        "Resolve pending calendar sync conflicts older than the review window with local data"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn execute(&self, ctx: &JobContext) -> Result<JobSummary, JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let result = ctx.conflict_resolver.auto_resolve_old_conflicts(Utc::now());
        if result.failed > 0 {
            warn!("{} sync conflict(s) could not be auto-resolved", result.failed);
        }
        JobSummary::new(
            format!("{} resolved, {} failed", result.resolved, result.failed),
            &result,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::jobs::test_support::job_fixture;
    use crate::crm_store::{
        utc_now, ConflictStatus, CrmStore, LessonStatus, NewLesson, NewProfile, StudentStatus,
    };
    use serde_json::json;

    #[test]
    fn test_execute_resolves_only_old_conflicts() {
        let f = job_fixture();
        let teacher = f
            .crm_store
            .create_profile(&NewProfile::teacher("t@x", "T"))
            .unwrap();
        let student = f
            .crm_store
            .create_profile(&NewProfile::student("s@x", "S", StudentStatus::Active))
            .unwrap();
        let lesson = f
            .crm_store
            .create_lesson(&NewLesson {
                teacher_id: teacher.id.clone(),
                student_id: student.id.clone(),
                title: Some("Lesson".to_string()),
                notes: None,
                scheduled_at: utc_now(),
                status: LessonStatus::Scheduled,
                google_event_id: Some("evt".to_string()),
            })
            .unwrap();
        let fresh = f
            .crm_store
            .insert_sync_conflict(&lesson.id, "evt", &json!({"remote_title": "X"}))
            .unwrap();

        let job = ConflictAutoResolveJob::new(24);
        let summary = job.execute(&f.ctx).unwrap();

        let conflict = f.crm_store.get_sync_conflict(&fresh.id).unwrap().unwrap();
        assert_eq!(conflict.status, ConflictStatus::Pending);

        assert_eq!(summary.headline, "0 resolved, 0 failed");
        assert_eq!(summary.details, json!({"resolved": 0, "failed": 0}));
    }
}
