//! SQLite schema definitions for the CRM database.
//!
//! Profiles, songs, lessons, the lesson/song join table, the student status
//! audit trail and (from version 2) calendar sync conflicts.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const FK_PROFILE: ForeignKey = ForeignKey {
    foreign_table: "profiles",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const FK_LESSON: ForeignKey = ForeignKey {
    foreign_table: "lessons",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const FK_SONG: ForeignKey = ForeignKey {
    foreign_table: "songs",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

// =============================================================================
// Version 1 - Profiles, songs, lessons and status history
// =============================================================================

const PROFILES_TABLE_V1: Table = Table {
    name: "profiles",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("email", &SqlType::Text, non_null = true),
        sqlite_column!("full_name", &SqlType::Text),
        sqlite_column!("is_admin", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("is_teacher", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("is_student", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("is_shadow", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("student_status", &SqlType::Text),
        sqlite_column!("status_changed_at", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_profiles_student_status", "student_status")],
    unique_constraints: &[],
};

const SONGS_TABLE_V1: Table = Table {
    name: "songs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("author", &SqlType::Text, non_null = true),
        sqlite_column!("deleted_at", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const LESSONS_TABLE_V1: Table = Table {
    name: "lessons",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "teacher_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&FK_PROFILE)
        ),
        sqlite_column!(
            "student_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&FK_PROFILE)
        ),
        sqlite_column!("title", &SqlType::Text),
        sqlite_column!("notes", &SqlType::Text),
        sqlite_column!("scheduled_at", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("google_event_id", &SqlType::Text),
        sqlite_column!("deleted_at", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_lessons_student_scheduled", "student_id, scheduled_at"),
        ("idx_lessons_teacher", "teacher_id"),
    ],
    unique_constraints: &[],
};

const LESSON_SONGS_TABLE_V1: Table = Table {
    name: "lesson_songs",
    columns: &[
        sqlite_column!(
            "lesson_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&FK_LESSON)
        ),
        sqlite_column!(
            "song_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&FK_SONG)
        ),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["lesson_id", "song_id"]],
};

/// Append-only audit trail of student status changes.
const STUDENT_STATUS_HISTORY_TABLE_V1: Table = Table {
    name: "student_status_history",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "student_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&FK_PROFILE)
        ),
        sqlite_column!("previous_data", &SqlType::Text, non_null = true),
        sqlite_column!("new_data", &SqlType::Text, non_null = true),
        sqlite_column!("change_source", &SqlType::Text, non_null = true),
        sqlite_column!("notes", &SqlType::Text),
        sqlite_column!("changed_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_status_history_student", "student_id, changed_at")],
    unique_constraints: &[],
};

// =============================================================================
// Version 2 - Calendar sync conflicts
// =============================================================================

const SYNC_CONFLICTS_TABLE_V2: Table = Table {
    name: "sync_conflicts",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "lesson_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&FK_LESSON)
        ),
        sqlite_column!("google_event_id", &SqlType::Text, non_null = true),
        sqlite_column!("conflict_data", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("resolution", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("resolved_at", &SqlType::Text),
    ],
    indices: &[("idx_sync_conflicts_status_created", "status, created_at")],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    SYNC_CONFLICTS_TABLE_V2.create(conn)
}

pub const CRM_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            PROFILES_TABLE_V1,
            SONGS_TABLE_V1,
            LESSONS_TABLE_V1,
            LESSON_SONGS_TABLE_V1,
            STUDENT_STATUS_HISTORY_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            PROFILES_TABLE_V1,
            SONGS_TABLE_V1,
            LESSONS_TABLE_V1,
            LESSON_SONGS_TABLE_V1,
            STUDENT_STATUS_HISTORY_TABLE_V1,
            SYNC_CONFLICTS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
