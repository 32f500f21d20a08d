//! Student activity status engine.
//!
//! Flips students between `active` and `inactive` depending on whether they
//! had a completed lesson inside the lookback window or have one scheduled in
//! the future. Every flip is persisted together with an audit record.

mod decision;

pub use decision::{decide_transition, is_tracked};

use crate::config::ActivitySettings;
use crate::crm_store::{
    ChangeSource, CrmStore, Profile, StatusTransition, StudentStatus, StudentSummary,
};
use crate::server::metrics;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    pub processed: usize,
    pub activated_count: usize,
    pub deactivated_count: usize,
    pub activated: Vec<StudentSummary>,
    pub deactivated: Vec<StudentSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeResult {
    pub updated: bool,
    pub previous_status: Option<StudentStatus>,
    pub new_status: Option<StudentStatus>,
}

impl RecomputeResult {
    fn unchanged(status: Option<StudentStatus>) -> Self {
        Self {
            updated: false,
            previous_status: status,
            new_status: status,
        }
    }
}

pub struct ActivityEngine {
    store: Arc<dyn CrmStore>,
    settings: ActivitySettings,
}

impl ActivityEngine {
    pub fn new(store: Arc<dyn CrmStore>, settings: ActivitySettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &ActivitySettings {
        &self.settings
    }

    /// Evaluates every `active` and `inactive` student once, in order.
    ///
    /// A student that cannot be loaded or evaluated is logged and skipped.
    /// Only a failure to list the students fails the sweep.
    pub fn run_activity_sweep(&self, now: DateTime<Utc>) -> Result<SweepResult> {
        self.run_activity_sweep_until(now, || false)
    }

    /// Same as [`Self::run_activity_sweep`] but stops before the next student
    /// once `is_cancelled` returns true.
    pub fn run_activity_sweep_until(
        &self,
        now: DateTime<Utc>,
        is_cancelled: impl Fn() -> bool,
    ) -> Result<SweepResult> {
        let now = now.trunc_subsecs(0);
        let mut result = SweepResult::default();

        let student_ids = self
            .store
            .list_student_ids_by_status(&[StudentStatus::Active, StudentStatus::Inactive])
            .context("Activity sweep could not list students")?;

        for student_id in &student_ids {
            if is_cancelled() {
                info!(
                    "Activity sweep cancelled after {} of {} students",
                    result.processed,
                    student_ids.len()
                );
                break;
            }
            result.processed += 1;

            let student = match self.store.get_profile(student_id) {
                Ok(Some(student)) => student,
                Ok(None) => {
                    debug!("Student {} disappeared during activity sweep", student_id);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping unreadable student {} in activity sweep: {:#}", student_id, e);
                    continue;
                }
            };

            match self.evaluate(&student, now, ChangeSource::Sweep) {
                Ok(Some(StudentStatus::Active)) => result.activated.push(student.summary()),
                Ok(Some(_)) => result.deactivated.push(student.summary()),
                Ok(None) => {}
                Err(e) => warn!("Skipping student {} in activity sweep: {:#}", student.id, e),
            }
        }

        result.activated_count = result.activated.len();
        result.deactivated_count = result.deactivated.len();
        info!(
            "Activity sweep processed {} students: {} activated, {} deactivated",
            result.processed, result.activated_count, result.deactivated_count
        );
        Ok(result)
    }

    /// Re-evaluates a single student. Never fails: lookup and store errors
    /// are logged and reported as "not updated, status unknown".
    pub fn recompute_student_status(
        &self,
        student_id: &str,
        now: DateTime<Utc>,
        source: ChangeSource,
    ) -> RecomputeResult {
        let now = now.trunc_subsecs(0);
        let student = match self.store.get_profile(student_id) {
            Ok(Some(student)) => student,
            Ok(None) => {
                debug!("Recompute requested for unknown student {}", student_id);
                return RecomputeResult::unchanged(None);
            }
            Err(e) => {
                error!("Failed to load student {}: {:#}", student_id, e);
                return RecomputeResult::unchanged(None);
            }
        };

        match self.evaluate(&student, now, source) {
            Ok(Some(new_status)) => RecomputeResult {
                updated: true,
                previous_status: student.student_status,
                new_status: Some(new_status),
            },
            Ok(None) => RecomputeResult::unchanged(student.student_status),
            Err(e) => {
                error!("Failed to recompute status of student {}: {:#}", student_id, e);
                RecomputeResult::unchanged(None)
            }
        }
    }

    /// Applies the transition the student is due for, if any, and returns the new status.
    fn evaluate(
        &self,
        student: &Profile,
        now: DateTime<Utc>,
        source: ChangeSource,
    ) -> Result<Option<StudentStatus>> {
        let Some(current) = student.student_status.filter(|s| is_tracked(*s)) else {
            return Ok(None);
        };

        let threshold_days = self.settings.inactivity_threshold_days;
        let boundary = now - Duration::days(threshold_days as i64);
        let has_recent_completed = self
            .store
            .last_completed_lesson_at(&student.id, &now)?
            .is_some_and(|at| at >= boundary);
        let has_future_scheduled = self
            .store
            .next_scheduled_lesson_at(&student.id, &now)?
            .is_some();

        let Some(new_status) =
            decide_transition(current, has_recent_completed, has_future_scheduled)
        else {
            return Ok(None);
        };

        let transition = StatusTransition {
            student_id: student.id.clone(),
            previous: current,
            new: new_status,
            changed_at: now,
            change_source: source,
            notes: format!(
                "Automatic status change: recent completed lesson={}, future scheduled lesson={} (threshold {} days)",
                has_recent_completed, has_future_scheduled, threshold_days
            ),
        };

        if !self.store.apply_status_transition(&transition)? {
            warn!(
                "Status of student {} changed concurrently, skipping {} -> {}",
                student.id,
                current.as_str(),
                new_status.as_str()
            );
            return Ok(None);
        }

        let direction = match new_status {
            StudentStatus::Active => "activated",
            _ => "deactivated",
        };
        metrics::record_activity_transition(direction, source.as_str());
        info!(
            "Student {} {} ({} -> {}, source {})",
            student.id,
            direction,
            current.as_str(),
            new_status.as_str(),
            source.as_str()
        );
        Ok(Some(new_status))
    }
}
