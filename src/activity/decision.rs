use crate::crm_store::StudentStatus;

/// Decides whether a student's status should flip given the two derived
/// lesson facts. Only `active` and `inactive` students are ever moved.
pub fn decide_transition(
    current: StudentStatus,
    has_recent_completed: bool,
    has_future_scheduled: bool,
) -> Option<StudentStatus> {
    let engaged = has_recent_completed || has_future_scheduled;
    match current {
        StudentStatus::Active if !engaged => Some(StudentStatus::Inactive),
        StudentStatus::Inactive if engaged => Some(StudentStatus::Active),
        _ => None,
    }
}

/// Whether the automatic engine considers this status at all.
pub fn is_tracked(status: StudentStatus) -> bool {
    matches!(status, StudentStatus::Active | StudentStatus::Inactive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_without_any_lesson_goes_inactive() {
        assert_eq!(
            decide_transition(StudentStatus::Active, false, false),
            Some(StudentStatus::Inactive)
        );
    }

    #[test]
    fn active_with_either_fact_stays() {
        assert_eq!(decide_transition(StudentStatus::Active, true, false), None);
        assert_eq!(decide_transition(StudentStatus::Active, false, true), None);
        assert_eq!(decide_transition(StudentStatus::Active, true, true), None);
    }

    #[test]
    fn inactive_with_either_fact_goes_active() {
        assert_eq!(
            decide_transition(StudentStatus::Inactive, true, false),
            Some(StudentStatus::Active)
        );
        assert_eq!(
            decide_transition(StudentStatus::Inactive, false, true),
            Some(StudentStatus::Active)
        );
        assert_eq!(decide_transition(StudentStatus::Inactive, false, false), None);
    }

    #[test]
    fn staff_managed_statuses_never_change() {
        for status in [
            StudentStatus::Lead,
            StudentStatus::Trial,
            StudentStatus::Churned,
        ] {
            for (recent, future) in [(false, false), (true, false), (false, true), (true, true)] {
                assert_eq!(decide_transition(status, recent, future), None);
            }
            assert!(!is_tracked(status));
        }
    }
}
