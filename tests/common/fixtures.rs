//! Test fixture creation for the CRM database
//!
//! Profiles and catalog songs are seeded directly through the store, the same
//! way an upstream admin tool would create them.

use super::constants::*;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use strummy_server::crm_store::{
    CrmStore, Lesson, LessonStatus, NewLesson, NewProfile, Profile, StudentStatus,
};

/// Profiles created for every test server.
#[derive(Debug, Clone)]
pub struct SeededProfiles {
    pub admin: Profile,
    pub teacher: Profile,
    pub other_teacher: Profile,
    pub student: Profile,
}

/// Seeds the admin, two teachers, one active student and the song catalog.
pub fn seed_crm(store: &dyn CrmStore) -> Result<SeededProfiles> {
    let admin = store.create_profile(&NewProfile::admin(ADMIN_EMAIL, "Ada Admin"))?;
    let teacher = store.create_profile(&NewProfile::teacher(TEACHER_EMAIL, "Tom Teacher"))?;
    let other_teacher =
        store.create_profile(&NewProfile::teacher(OTHER_TEACHER_EMAIL, "Olga Teacher"))?;
    let student = store.create_profile(&NewProfile::student(
        STUDENT_EMAIL,
        STUDENT_NAME,
        StudentStatus::Active,
    ))?;

    store.create_song(WONDERWALL_TITLE, WONDERWALL_AUTHOR)?;
    store.create_song(HOTEL_CALIFORNIA_TITLE, HOTEL_CALIFORNIA_AUTHOR)?;

    Ok(SeededProfiles {
        admin,
        teacher,
        other_teacher,
        student,
    })
}

/// Creates a student with the given status.
pub fn add_student(store: &dyn CrmStore, email: &str, status: StudentStatus) -> Profile {
    store
        .create_profile(&NewProfile::student(email, email, status))
        .expect("Failed to create student")
}

/// Creates a lesson scheduled `days_from_now` days away (negative for the past).
pub fn add_lesson(
    store: &dyn CrmStore,
    teacher: &Profile,
    student: &Profile,
    days_from_now: i64,
    status: LessonStatus,
) -> Lesson {
    store
        .create_lesson(&NewLesson {
            teacher_id: teacher.id.clone(),
            student_id: student.id.clone(),
            title: Some("Guitar lesson".to_string()),
            notes: None,
            scheduled_at: days_from(Utc::now(), days_from_now),
            status,
            google_event_id: Some(format!("evt-{}", uuid::Uuid::new_v4())),
        })
        .expect("Failed to create lesson")
}

pub fn days_from(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now + Duration::days(days)
}
