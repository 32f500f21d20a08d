use crate::activity::RecomputeResult;
use crate::crm_store::ConflictResolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A calendar event as delivered by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start: EventStart,
    /// Last modification time on the calendar side.
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStart {
    #[serde(rename = "dateTime")]
    pub date_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff<T> {
    pub local: T,
    pub remote: T,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConflictFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<FieldDiff<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<FieldDiff<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<FieldDiff<Option<String>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub lesson_id: String,
    pub lesson_updated: DateTime<Utc>,
    pub event_updated: DateTime<Utc>,
    /// Absolute distance between the two modification times.
    pub time_difference_ms: i64,
    pub fields: ConflictFields,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub conflict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<ConflictFields>,
    /// Set when the conflict was queued for manual review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<String>,
    /// Set when remote data was written to the lesson.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<RecomputeResult>,
}

impl SyncOutcome {
    pub fn in_sync() -> Self {
        Self {
            conflict: false,
            resolution: None,
            fields: None,
            conflict_id: None,
            activity: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AutoResolveResult {
    pub resolved: usize,
    pub failed: usize,
}

/// Remote side of a conflict queued for manual review, as stored in `conflict_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredRemoteFields {
    pub remote_title: Option<String>,
    pub remote_scheduled_at: Option<DateTime<Utc>>,
    pub remote_notes: Option<String>,
    pub remote_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConflictError {
    #[error("Lesson not found")]
    LessonNotFound,
    #[error("Conflict not found")]
    ConflictNotFound,
    #[error("Conflict belongs to another teacher")]
    Forbidden,
    #[error("Conflict already resolved")]
    AlreadyResolved,
    #[error("Resolution must be use_local or use_remote")]
    InvalidResolution,
    #[error("Stored conflict data is malformed: {0}")]
    MalformedConflictData(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
