//! Reconciliation of local lessons with their remote calendar events.

mod detection;
mod models;

pub use detection::{detect_conflict, resolve_conflict};
pub use models::{
    AutoResolveResult, ConflictError, ConflictFields, ConflictInfo, EventStart, FieldDiff,
    RemoteEvent, StoredRemoteFields, SyncOutcome,
};

use crate::activity::{ActivityEngine, RecomputeResult};
use crate::config::SyncConflictSettings;
use crate::crm_store::{
    utc_now, ChangeSource, ConflictResolution, ConflictStatus, CrmStore, Lesson, SyncConflict,
};
use crate::server::metrics;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct ConflictResolver {
    store: Arc<dyn CrmStore>,
    settings: SyncConflictSettings,
    activity: Arc<ActivityEngine>,
}

impl ConflictResolver {
    pub fn new(
        store: Arc<dyn CrmStore>,
        settings: SyncConflictSettings,
        activity: Arc<ActivityEngine>,
    ) -> Self {
        Self {
            store,
            settings,
            activity,
        }
    }

    pub fn settings(&self) -> &SyncConflictSettings {
        &self.settings
    }

    /// Carries out `resolution` for `lesson` against `event`. Returns the id
    /// of the queued conflict for manual review, and the activity recompute
    /// when the lesson was overwritten.
    pub fn apply_resolution(
        &self,
        lesson: &Lesson,
        event: &RemoteEvent,
        resolution: ConflictResolution,
    ) -> Result<(Option<String>, Option<RecomputeResult>)> {
        match resolution {
            ConflictResolution::UseLocal => {
                info!("Conflict on lesson {} resolved with local data", lesson.id);
                Ok((None, None))
            }
            ConflictResolution::UseRemote => {
                let mut updated = lesson.clone();
                updated.title = Some(event.summary.clone());
                updated.scheduled_at = event.start.date_time;
                updated.notes = event.description.clone().filter(|d| !d.is_empty());
                updated.updated_at = utc_now();
                self.store.update_lesson(&updated)?;
                info!("Conflict on lesson {} resolved with remote data", lesson.id);
                let activity = self.activity.recompute_student_status(
                    &lesson.student_id,
                    utc_now(),
                    ChangeSource::LessonHook,
                );
                Ok((None, Some(activity)))
            }
            ConflictResolution::ManualReview => {
                let remote = StoredRemoteFields {
                    remote_title: Some(event.summary.clone()),
                    remote_scheduled_at: Some(event.start.date_time),
                    remote_notes: event.description.clone(),
                    remote_updated: Some(event.updated),
                };
                let conflict = self.store.insert_sync_conflict(
                    &lesson.id,
                    &event.id,
                    &serde_json::to_value(&remote)?,
                )?;
                warn!(
                    "Conflict on lesson {} flagged for manual review ({})",
                    lesson.id, conflict.id
                );
                Ok((Some(conflict.id), None))
            }
        }
    }

    /// Detects, resolves and applies in one go.
    pub fn sync_remote_event(
        &self,
        lesson_id: &str,
        event: &RemoteEvent,
    ) -> Result<SyncOutcome, ConflictError> {
        let lesson = self
            .store
            .get_lesson(lesson_id)?
            .ok_or(ConflictError::LessonNotFound)?;

        let Some(info) = detect_conflict(&lesson, event) else {
            return Ok(SyncOutcome::in_sync());
        };

        let resolution = resolve_conflict(&info, &self.settings);
        metrics::record_sync_conflict(resolution.as_str());
        let (conflict_id, activity) = self.apply_resolution(&lesson, event, resolution)?;

        Ok(SyncOutcome {
            conflict: true,
            resolution: Some(resolution),
            fields: Some(info.fields),
            conflict_id,
            activity,
        })
    }

    /// Pending conflicts on lessons taught by `teacher_id`, newest first.
    pub fn get_pending_conflicts(&self, teacher_id: &str) -> Result<Vec<SyncConflict>> {
        self.store.get_pending_conflicts_for_teacher(teacher_id)
    }

    pub fn resolve_conflict_manually(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
    ) -> Result<(), ConflictError> {
        if resolution == ConflictResolution::ManualReview {
            return Err(ConflictError::InvalidResolution);
        }

        let conflict = self
            .store
            .get_sync_conflict(conflict_id)?
            .ok_or(ConflictError::ConflictNotFound)?;
        if conflict.status == ConflictStatus::Resolved {
            return Err(ConflictError::AlreadyResolved);
        }

        let now = utc_now();
        let lesson_update = match resolution {
            ConflictResolution::UseRemote => {
                let remote: StoredRemoteFields =
                    serde_json::from_value(conflict.conflict_data.clone())?;
                let mut lesson = self
                    .store
                    .get_lesson(&conflict.lesson_id)?
                    .ok_or(ConflictError::LessonNotFound)?;
                if let Some(title) = remote.remote_title {
                    lesson.title = Some(title);
                }
                if let Some(scheduled_at) = remote.remote_scheduled_at {
                    lesson.scheduled_at = scheduled_at;
                }
                lesson.notes = remote.remote_notes.filter(|n| !n.is_empty());
                lesson.updated_at = now;
                Some(lesson)
            }
            _ => None,
        };

        if !self.store.resolve_sync_conflict(
            conflict_id,
            resolution,
            &now,
            lesson_update.as_ref(),
        )? {
            return Err(ConflictError::AlreadyResolved);
        }
        info!(
            "Conflict {} on lesson {} resolved manually with {}",
            conflict_id,
            conflict.lesson_id,
            resolution.as_str()
        );

        if let Some(lesson) = lesson_update {
            self.activity
                .recompute_student_status(&lesson.student_id, now, ChangeSource::LessonHook);
        }
        Ok(())
    }

    /// Resolves every conflict left pending longer than the configured
    /// window in favour of the local data.
    pub fn auto_resolve_old_conflicts(&self, now: DateTime<Utc>) -> AutoResolveResult {
        let cutoff = now - Duration::days(self.settings.auto_resolve_after_days as i64);
        let mut result = AutoResolveResult::default();

        let conflicts = match self.store.list_pending_conflicts_older_than(&cutoff) {
            Ok(conflicts) => conflicts,
            Err(e) => {
                error!("Failed to list old sync conflicts: {:#}", e);
                return result;
            }
        };

        for conflict in conflicts {
            match self.resolve_conflict_manually(&conflict.id, ConflictResolution::UseLocal) {
                Ok(()) => result.resolved += 1,
                Err(e) => {
                    warn!("Failed to auto-resolve conflict {}: {}", conflict.id, e);
                    result.failed += 1;
                }
            }
        }

        if result.resolved > 0 {
            info!("Auto-resolved {} old sync conflict(s)", result.resolved);
        }
        result
    }
}
