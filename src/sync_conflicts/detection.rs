use super::models::{ConflictFields, ConflictInfo, FieldDiff, RemoteEvent};
use crate::config::SyncConflictSettings;
use crate::crm_store::{ConflictResolution, Lesson};

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}

/// Compares the lesson with the remote event. Returns `None` when title,
/// start time and notes all agree; missing notes equal empty notes.
pub fn detect_conflict(lesson: &Lesson, event: &RemoteEvent) -> Option<ConflictInfo> {
    let local_title = lesson.title.as_deref().unwrap_or_default();
    let local_notes = lesson.notes.as_deref().unwrap_or_default();
    let remote_notes = event.description.as_deref().unwrap_or_default();

    let mut fields = ConflictFields::default();
    if local_title != event.summary {
        fields.title = Some(FieldDiff {
            local: local_title.to_string(),
            remote: event.summary.clone(),
        });
    }
    if lesson.scheduled_at != event.start.date_time {
        fields.scheduled_at = Some(FieldDiff {
            local: lesson.scheduled_at,
            remote: event.start.date_time,
        });
    }
    if local_notes != remote_notes {
        fields.notes = Some(FieldDiff {
            local: non_empty(Some(local_notes)),
            remote: non_empty(Some(remote_notes)),
        });
    }

    if fields == ConflictFields::default() {
        return None;
    }

    Some(ConflictInfo {
        lesson_id: lesson.id.clone(),
        lesson_updated: lesson.updated_at,
        event_updated: event.updated,
        time_difference_ms: (event.updated - lesson.updated_at).num_milliseconds().abs(),
        fields,
    })
}

/// Last write wins, unless both edits are close enough to be considered
/// simultaneous and manual review is enabled.
pub fn resolve_conflict(
    info: &ConflictInfo,
    settings: &SyncConflictSettings,
) -> ConflictResolution {
    if settings.enable_manual_review
        && info.time_difference_ms < settings.simultaneous_threshold_ms
    {
        return ConflictResolution::ManualReview;
    }
    if info.lesson_updated > info.event_updated {
        ConflictResolution::UseLocal
    } else {
        ConflictResolution::UseRemote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm_store::LessonStatus;
    use crate::sync_conflicts::models::EventStart;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 15, 0, 0).unwrap()
    }

    fn lesson() -> Lesson {
        Lesson {
            id: "lesson-1".to_string(),
            teacher_id: "t".to_string(),
            student_id: "s".to_string(),
            title: Some("Guitar lesson".to_string()),
            notes: None,
            scheduled_at: base_time(),
            status: LessonStatus::Scheduled,
            google_event_id: Some("evt-1".to_string()),
            deleted_at: None,
            created_at: base_time() - Duration::days(1),
            updated_at: base_time() - Duration::hours(2),
        }
    }

    fn event() -> RemoteEvent {
        RemoteEvent {
            id: "evt-1".to_string(),
            summary: "Guitar lesson".to_string(),
            description: Some(String::new()),
            start: EventStart {
                date_time: base_time(),
            },
            updated: base_time() - Duration::hours(1),
        }
    }

    #[test]
    fn identical_data_is_not_a_conflict() {
        assert!(detect_conflict(&lesson(), &event()).is_none());
    }

    #[test]
    fn start_time_is_compared_as_an_instant() {
        let event: RemoteEvent = serde_json::from_value(serde_json::json!({
            "id": "evt-1",
            "summary": "Guitar lesson",
            "start": { "dateTime": "2024-05-10T17:00:00+02:00" },
            "updated": "2024-05-10T14:00:00Z"
        }))
        .unwrap();
        assert!(detect_conflict(&lesson(), &event).is_none());
    }

    #[test]
    fn differing_fields_are_reported() {
        let mut remote = event();
        remote.summary = "Moved lesson".to_string();
        remote.start.date_time = base_time() + Duration::hours(1);
        remote.description = Some("Bring capo".to_string());

        let info = detect_conflict(&lesson(), &remote).unwrap();
        assert_eq!(info.lesson_id, "lesson-1");
        assert_eq!(info.time_difference_ms, 3_600_000);
        assert_eq!(info.fields.title.as_ref().unwrap().remote, "Moved lesson");
        assert_eq!(
            info.fields.scheduled_at.as_ref().unwrap().remote,
            base_time() + Duration::hours(1)
        );
        assert_eq!(
            info.fields.notes,
            Some(FieldDiff {
                local: None,
                remote: Some("Bring capo".to_string()),
            })
        );
    }

    #[test]
    fn close_edits_go_to_manual_review() {
        let mut remote = event();
        remote.summary = "Changed".to_string();
        remote.updated = lesson().updated_at + Duration::seconds(30);

        let info = detect_conflict(&lesson(), &remote).unwrap();
        let settings = SyncConflictSettings::default();
        assert_eq!(
            resolve_conflict(&info, &settings),
            ConflictResolution::ManualReview
        );

        let settings = SyncConflictSettings {
            enable_manual_review: false,
            ..Default::default()
        };
        assert_eq!(
            resolve_conflict(&info, &settings),
            ConflictResolution::UseRemote
        );
    }

    #[test]
    fn newer_side_wins_outside_threshold() {
        let settings = SyncConflictSettings::default();
        let mut remote = event();
        remote.summary = "Changed".to_string();

        remote.updated = lesson().updated_at + Duration::minutes(5);
        let info = detect_conflict(&lesson(), &remote).unwrap();
        assert_eq!(
            resolve_conflict(&info, &settings),
            ConflictResolution::UseRemote
        );

        remote.updated = lesson().updated_at - Duration::minutes(5);
        let info = detect_conflict(&lesson(), &remote).unwrap();
        assert_eq!(
            resolve_conflict(&info, &settings),
            ConflictResolution::UseLocal
        );
    }

    #[test]
    fn threshold_is_exclusive() {
        let settings = SyncConflictSettings::default();
        let mut remote = event();
        remote.summary = "Changed".to_string();
        remote.updated = lesson().updated_at + Duration::milliseconds(60_000);

        let info = detect_conflict(&lesson(), &remote).unwrap();
        assert_eq!(
            resolve_conflict(&info, &settings),
            ConflictResolution::UseRemote
        );
    }
}
