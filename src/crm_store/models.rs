use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Coarse lifecycle stage of a student.
///
/// Only `Active` and `Inactive` are ever changed automatically; the other
/// stages are managed by staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Lead,
    Trial,
    Active,
    Inactive,
    Churned,
}

impl StudentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Lead => "lead",
            StudentStatus::Trial => "trial",
            StudentStatus::Active => "active",
            StudentStatus::Inactive => "inactive",
            StudentStatus::Churned => "churned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lead" => Some(StudentStatus::Lead),
            "trial" => Some(StudentStatus::Trial),
            "active" => Some(StudentStatus::Active),
            "inactive" => Some(StudentStatus::Inactive),
            "churned" => Some(StudentStatus::Churned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LessonStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Rescheduled,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::Scheduled => "SCHEDULED",
            LessonStatus::InProgress => "IN_PROGRESS",
            LessonStatus::Completed => "COMPLETED",
            LessonStatus::Cancelled => "CANCELLED",
            LessonStatus::Rescheduled => "RESCHEDULED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(LessonStatus::Scheduled),
            "IN_PROGRESS" => Some(LessonStatus::InProgress),
            "COMPLETED" => Some(LessonStatus::Completed),
            "CANCELLED" => Some(LessonStatus::Cancelled),
            "RESCHEDULED" => Some(LessonStatus::Rescheduled),
            _ => None,
        }
    }
}

/// Learning progress of a song within a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonSongStatus {
    ToLearn,
    Started,
    Remembered,
    WithAuthor,
    Mastered,
}

impl LessonSongStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonSongStatus::ToLearn => "to_learn",
            LessonSongStatus::Started => "started",
            LessonSongStatus::Remembered => "remembered",
            LessonSongStatus::WithAuthor => "with_author",
            LessonSongStatus::Mastered => "mastered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "to_learn" => Some(LessonSongStatus::ToLearn),
            "started" => Some(LessonSongStatus::Started),
            "remembered" => Some(LessonSongStatus::Remembered),
            "with_author" => Some(LessonSongStatus::WithAuthor),
            "mastered" => Some(LessonSongStatus::Mastered),
            _ => None,
        }
    }
}

/// What caused a student status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Sweep,
    LessonHook,
    Manual,
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSource::Sweep => "sweep",
            ChangeSource::LessonHook => "lesson_hook",
            ChangeSource::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sweep" => Some(ChangeSource::Sweep),
            "lesson_hook" => Some(ChangeSource::LessonHook),
            "manual" => Some(ChangeSource::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::Pending => "pending",
            ConflictStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ConflictStatus::Pending),
            "resolved" => Some(ConflictStatus::Resolved),
            _ => None,
        }
    }
}

/// Outcome chosen for a local/remote lesson conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    UseLocal,
    UseRemote,
    ManualReview,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::UseLocal => "use_local",
            ConflictResolution::UseRemote => "use_remote",
            ConflictResolution::ManualReview => "manual_review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "use_local" => Some(ConflictResolution::UseLocal),
            "use_remote" => Some(ConflictResolution::UseRemote),
            "manual_review" => Some(ConflictResolution::ManualReview),
            _ => None,
        }
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub is_admin: bool,
    pub is_teacher: bool,
    pub is_student: bool,
    /// Created by staff before the student ever signed in.
    pub is_shadow: bool,
    pub student_status: Option<StudentStatus>,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn summary(&self) -> StudentSummary {
        StudentSummary {
            id: self.id.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
        }
    }
}

/// Fields needed to create a profile. The id and creation time are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewProfile {
    pub email: String,
    pub full_name: Option<String>,
    pub is_admin: bool,
    pub is_teacher: bool,
    pub is_student: bool,
    pub is_shadow: bool,
    pub student_status: Option<StudentStatus>,
}

impl NewProfile {
    pub fn student(email: &str, full_name: &str, status: StudentStatus) -> Self {
        Self {
            email: email.to_string(),
            full_name: Some(full_name.to_string()),
            is_student: true,
            student_status: Some(status),
            ..Default::default()
        }
    }

    pub fn teacher(email: &str, full_name: &str) -> Self {
        Self {
            email: email.to_string(),
            full_name: Some(full_name.to_string()),
            is_teacher: true,
            ..Default::default()
        }
    }

    pub fn admin(email: &str, full_name: &str) -> Self {
        Self {
            email: email.to_string(),
            full_name: Some(full_name.to_string()),
            is_admin: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentSummary {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub teacher_id: String,
    pub student_id: String,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: LessonStatus,
    pub google_event_id: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLesson {
    pub teacher_id: String,
    pub student_id: String,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: LessonStatus,
    pub google_event_id: Option<String>,
}

/// A single automatic status change, persisted together with its audit record.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub student_id: String,
    pub previous: StudentStatus,
    pub new: StudentStatus,
    pub changed_at: DateTime<Utc>,
    pub change_source: ChangeSource,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub student_id: String,
    pub previous_data: serde_json::Value,
    pub new_data: serde_json::Value,
    pub change_source: ChangeSource,
    pub notes: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncConflict {
    pub id: String,
    pub lesson_id: String,
    pub google_event_id: String,
    pub conflict_data: serde_json::Value,
    pub status: ConflictStatus,
    pub resolution: Option<ConflictResolution>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Timestamps
// =============================================================================

/// Formats a timestamp the way every CRM table stores it: RFC 3339, whole
/// seconds, `Z` suffix. Stored values therefore sort chronologically as text.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current time truncated to whole seconds, matching stored precision.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Start of the given calendar day in UTC.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::default()).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn enums_round_trip_their_wire_strings() {
        for status in [
            StudentStatus::Lead,
            StudentStatus::Trial,
            StudentStatus::Active,
            StudentStatus::Inactive,
            StudentStatus::Churned,
        ] {
            assert_eq!(StudentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LessonStatus::parse("IN_PROGRESS"), Some(LessonStatus::InProgress));
        assert_eq!(LessonStatus::parse("completed"), None);
        assert_eq!(
            serde_json::to_value(LessonStatus::Completed).unwrap(),
            serde_json::json!("COMPLETED")
        );
        assert_eq!(
            serde_json::to_value(ConflictResolution::ManualReview).unwrap(),
            serde_json::json!("manual_review")
        );
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let earlier = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(format_timestamp(&earlier), "2024-03-09T23:59:59Z");
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
    }

    #[test]
    fn start_of_day_is_midnight_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(format_timestamp(&start_of_day(date)), "2024-02-29T00:00:00Z");
    }
}
