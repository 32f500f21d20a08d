mod models;
mod schema;
mod sqlite_crm_store;

pub use models::*;
pub use schema::CRM_VERSIONED_SCHEMAS;
pub use sqlite_crm_store::SqliteCrmStore;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

pub trait CrmStore: Send + Sync {
    // Profiles
    fn get_profile(&self, id: &str) -> Result<Option<Profile>>;
    fn create_profile(&self, profile: &NewProfile) -> Result<Profile>;
    /// Ids of students whose current status is one of `statuses`, oldest first.
    fn list_student_ids_by_status(&self, statuses: &[StudentStatus]) -> Result<Vec<String>>;

    // Derived lesson facts
    /// Latest `scheduled_at` among the student's non-deleted completed lessons
    /// that are not in the future relative to `now`.
    fn last_completed_lesson_at(
        &self,
        student_id: &str,
        now: &DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;
    /// Earliest `scheduled_at` strictly after `now` among the student's
    /// non-deleted scheduled lessons.
    fn next_scheduled_lesson_at(
        &self,
        student_id: &str,
        now: &DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    // Status transitions
    /// Applies the transition and appends its audit record atomically.
    /// Returns false when the student's status no longer equals `previous`.
    fn apply_status_transition(&self, transition: &StatusTransition) -> Result<bool>;
    fn get_status_history(&self, student_id: &str) -> Result<Vec<StatusHistoryEntry>>;

    // Songs
    /// Non-deleted songs in catalog order.
    fn list_songs(&self) -> Result<Vec<Song>>;
    fn create_song(&self, title: &str, author: &str) -> Result<Song>;
    fn count_songs(&self) -> Result<usize>;

    // Lessons
    fn find_lesson_on_date(
        &self,
        teacher_id: &str,
        student_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Lesson>>;
    fn create_lesson(&self, lesson: &NewLesson) -> Result<Lesson>;
    fn get_lesson(&self, id: &str) -> Result<Option<Lesson>>;
    /// Persists every mutable field of `lesson`. Returns false if it does not exist.
    fn update_lesson(&self, lesson: &Lesson) -> Result<bool>;
    fn count_lessons(&self) -> Result<usize>;
    fn link_song_to_lesson(
        &self,
        lesson_id: &str,
        song_id: &str,
        status: LessonSongStatus,
    ) -> Result<()>;
    fn lesson_song_ids(&self, lesson_id: &str) -> Result<Vec<String>>;

    // Sync conflicts
    fn insert_sync_conflict(
        &self,
        lesson_id: &str,
        google_event_id: &str,
        conflict_data: &serde_json::Value,
    ) -> Result<SyncConflict>;
    fn get_sync_conflict(&self, id: &str) -> Result<Option<SyncConflict>>;
    /// Pending conflicts on lessons taught by `teacher_id`, newest first.
    fn get_pending_conflicts_for_teacher(&self, teacher_id: &str) -> Result<Vec<SyncConflict>>;
    fn list_pending_conflicts_older_than(
        &self,
        cutoff: &DateTime<Utc>,
    ) -> Result<Vec<SyncConflict>>;
    /// Marks a pending conflict resolved, optionally writing `lesson_update`
    /// in the same transaction. Returns false if the conflict was not pending.
    fn resolve_sync_conflict(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
        resolved_at: &DateTime<Utc>,
        lesson_update: Option<&Lesson>,
    ) -> Result<bool>;
}
