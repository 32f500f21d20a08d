use super::models::{
    format_timestamp, start_of_day, utc_now, ChangeSource, ConflictResolution, ConflictStatus,
    Lesson, LessonSongStatus, LessonStatus, NewLesson, NewProfile, Profile, Song,
    StatusHistoryEntry, StatusTransition, StudentStatus, SyncConflict,
};
use super::schema::CRM_VERSIONED_SCHEMAS;
use super::CrmStore;
use crate::sqlite_persistence::open_versioned_db;
use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, SubsecRound, Utc};
use rusqlite::{params, params_from_iter, types::Type, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const PROFILE_COLUMNS: &str = "id, email, full_name, is_admin, is_teacher, is_student, is_shadow, \
     student_status, status_changed_at, created_at";

const LESSON_COLUMNS: &str = "id, teacher_id, student_id, title, notes, scheduled_at, status, \
     google_event_id, deleted_at, created_at, updated_at";

const CONFLICT_COLUMNS: &str =
    "c.id, c.lesson_id, c.google_event_id, c.conflict_data, c.status, c.resolution, \
     c.created_at, c.resolved_at";

/// A stored value that does not map onto its typed field.
#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} in column {column}")]
struct InvalidColumnValue {
    column: &'static str,
    value: String,
}

fn invalid_column(row: &Row, column: &'static str, value: String) -> rusqlite::Error {
    let index = row.as_ref().column_index(column).unwrap_or_default();
    rusqlite::Error::FromSqlConversionFailure(
        index,
        Type::Text,
        Box::new(InvalidColumnValue { column, value }),
    )
}

fn parse_column<T>(
    row: &Row,
    column: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    match parse(&raw) {
        Some(value) => Ok(value),
        None => Err(invalid_column(row, column, raw)),
    }
}

fn parse_optional_column<T>(
    row: &Row,
    column: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(column)?;
    match raw {
        None => Ok(None),
        Some(raw) => match parse(&raw) {
            Some(value) => Ok(Some(value)),
            None => Err(invalid_column(row, column, raw)),
        },
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// For aggregates read outside a row decoder.
fn stored_datetime(column: &'static str, raw: String) -> Result<DateTime<Utc>> {
    match parse_datetime(&raw) {
        Some(value) => Ok(value),
        None => Err(InvalidColumnValue { column, value: raw }.into()),
    }
}

fn parse_json(s: &str) -> Option<serde_json::Value> {
    serde_json::from_str(s).ok()
}

pub struct SqliteCrmStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCrmStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), CRM_VERSIONED_SCHEMAS, "CRM")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_profile(row: &Row) -> rusqlite::Result<Profile> {
        Ok(Profile {
            id: row.get("id")?,
            email: row.get("email")?,
            full_name: row.get("full_name")?,
            is_admin: row.get("is_admin")?,
            is_teacher: row.get("is_teacher")?,
            is_student: row.get("is_student")?,
            is_shadow: row.get("is_shadow")?,
            student_status: parse_optional_column(row, "student_status", StudentStatus::parse)?,
            status_changed_at: parse_optional_column(row, "status_changed_at", parse_datetime)?,
            created_at: parse_column(row, "created_at", parse_datetime)?,
        })
    }

    fn row_to_song(row: &Row) -> rusqlite::Result<Song> {
        Ok(Song {
            id: row.get("id")?,
            title: row.get("title")?,
            author: row.get("author")?,
            created_at: parse_column(row, "created_at", parse_datetime)?,
        })
    }

    fn row_to_lesson(row: &Row) -> rusqlite::Result<Lesson> {
        Ok(Lesson {
            id: row.get("id")?,
            teacher_id: row.get("teacher_id")?,
            student_id: row.get("student_id")?,
            title: row.get("title")?,
            notes: row.get("notes")?,
            scheduled_at: parse_column(row, "scheduled_at", parse_datetime)?,
            status: parse_column(row, "status", LessonStatus::parse)?,
            google_event_id: row.get("google_event_id")?,
            deleted_at: parse_optional_column(row, "deleted_at", parse_datetime)?,
            created_at: parse_column(row, "created_at", parse_datetime)?,
            updated_at: parse_column(row, "updated_at", parse_datetime)?,
        })
    }

    fn row_to_history_entry(row: &Row) -> rusqlite::Result<StatusHistoryEntry> {
        Ok(StatusHistoryEntry {
            id: row.get("id")?,
            student_id: row.get("student_id")?,
            previous_data: parse_column(row, "previous_data", parse_json)?,
            new_data: parse_column(row, "new_data", parse_json)?,
            change_source: parse_column(row, "change_source", ChangeSource::parse)?,
            notes: row.get("notes")?,
            changed_at: parse_column(row, "changed_at", parse_datetime)?,
        })
    }

    fn row_to_conflict(row: &Row) -> rusqlite::Result<SyncConflict> {
        Ok(SyncConflict {
            id: row.get("id")?,
            lesson_id: row.get("lesson_id")?,
            google_event_id: row.get("google_event_id")?,
            conflict_data: parse_column(row, "conflict_data", parse_json)?,
            status: parse_column(row, "status", ConflictStatus::parse)?,
            resolution: parse_optional_column(row, "resolution", ConflictResolution::parse)?,
            created_at: parse_column(row, "created_at", parse_datetime)?,
            resolved_at: parse_optional_column(row, "resolved_at", parse_datetime)?,
        })
    }

    fn write_lesson(conn: &Connection, lesson: &Lesson) -> Result<usize> {
        let changed = conn.execute(
            "UPDATE lessons SET title = ?1, notes = ?2, scheduled_at = ?3, status = ?4,
                google_event_id = ?5, deleted_at = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                lesson.title,
                lesson.notes,
                format_timestamp(&lesson.scheduled_at),
                lesson.status.as_str(),
                lesson.google_event_id,
                lesson.deleted_at.as_ref().map(format_timestamp),
                format_timestamp(&lesson.updated_at),
                lesson.id
            ],
        )?;
        Ok(changed)
    }

    fn count(&self, table: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}

impl CrmStore for SqliteCrmStore {
    fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let conn = self.conn.lock().unwrap();
        let profile = conn
            .query_row(
                &format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS),
                params![id],
                Self::row_to_profile,
            )
            .optional()?;
        Ok(profile)
    }

    fn create_profile(&self, profile: &NewProfile) -> Result<Profile> {
        let conn = self.conn.lock().unwrap();
        let now = utc_now();
        let created = Profile {
            id: Uuid::new_v4().to_string(),
            email: profile.email.clone(),
            full_name: profile.full_name.clone(),
            is_admin: profile.is_admin,
            is_teacher: profile.is_teacher,
            is_student: profile.is_student,
            is_shadow: profile.is_shadow,
            student_status: profile.student_status,
            status_changed_at: profile.student_status.map(|_| now),
            created_at: now,
        };

        conn.execute(
            "INSERT INTO profiles (id, email, full_name, is_admin, is_teacher, is_student,
                is_shadow, student_status, status_changed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                created.id,
                created.email,
                created.full_name,
                created.is_admin,
                created.is_teacher,
                created.is_student,
                created.is_shadow,
                created.student_status.map(|s| s.as_str()),
                created.status_changed_at.as_ref().map(format_timestamp),
                format_timestamp(&created.created_at)
            ],
        )?;

        Ok(created)
    }

    fn list_student_ids_by_status(&self, statuses: &[StudentStatus]) -> Result<Vec<String>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT id FROM profiles WHERE student_status IN ({})
             ORDER BY created_at, rowid",
            placeholders
        ))?;

        let ids = stmt
            .query_map(
                params_from_iter(statuses.iter().map(|s| s.as_str())),
                |row| row.get(0),
            )?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(ids)
    }

    fn last_completed_lesson_at(
        &self,
        student_id: &str,
        now: &DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let latest: Option<String> = conn.query_row(
            "SELECT MAX(scheduled_at) FROM lessons
             WHERE student_id = ?1 AND status = ?2 AND deleted_at IS NULL
               AND scheduled_at <= ?3",
            params![
                student_id,
                LessonStatus::Completed.as_str(),
                format_timestamp(now)
            ],
            |row| row.get(0),
        )?;
        latest.map(|raw| stored_datetime("scheduled_at", raw)).transpose()
    }

    fn next_scheduled_lesson_at(
        &self,
        student_id: &str,
        now: &DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let next: Option<String> = conn.query_row(
            "SELECT MIN(scheduled_at) FROM lessons
             WHERE student_id = ?1 AND status = ?2 AND deleted_at IS NULL
               AND scheduled_at > ?3",
            params![
                student_id,
                LessonStatus::Scheduled.as_str(),
                format_timestamp(now)
            ],
            |row| row.get(0),
        )?;
        next.map(|raw| stored_datetime("scheduled_at", raw)).transpose()
    }

    fn apply_status_transition(&self, transition: &StatusTransition) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let changed_at = format_timestamp(&transition.changed_at);

        let updated = tx.execute(
            "UPDATE profiles SET student_status = ?1, status_changed_at = ?2
             WHERE id = ?3 AND student_status = ?4",
            params![
                transition.new.as_str(),
                changed_at,
                transition.student_id,
                transition.previous.as_str()
            ],
        )?;
        if updated == 0 {
            // Status moved under us; dropping the transaction rolls back.
            return Ok(false);
        }

        let previous_data = serde_json::json!({ "student_status": transition.previous.as_str() });
        let new_data = serde_json::json!({ "student_status": transition.new.as_str() });
        tx.execute(
            "INSERT INTO student_status_history
                (student_id, previous_data, new_data, change_source, notes, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                transition.student_id,
                previous_data.to_string(),
                new_data.to_string(),
                transition.change_source.as_str(),
                transition.notes,
                changed_at
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    fn get_status_history(&self, student_id: &str) -> Result<Vec<StatusHistoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, student_id, previous_data, new_data, change_source, notes, changed_at
             FROM student_status_history WHERE student_id = ?1
             ORDER BY changed_at DESC, id DESC",
        )?;

        let entries = stmt
            .query_map(params![student_id], Self::row_to_history_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn list_songs(&self) -> Result<Vec<Song>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, author, created_at FROM songs
             WHERE deleted_at IS NULL ORDER BY created_at, rowid",
        )?;

        let songs = stmt
            .query_map([], Self::row_to_song)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(songs)
    }

    fn create_song(&self, title: &str, author: &str) -> Result<Song> {
        let conn = self.conn.lock().unwrap();
        let song = Song {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            author: author.to_string(),
            created_at: utc_now(),
        };

        conn.execute(
            "INSERT INTO songs (id, title, author, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                song.id,
                song.title,
                song.author,
                format_timestamp(&song.created_at)
            ],
        )?;

        Ok(song)
    }

    fn count_songs(&self) -> Result<usize> {
        self.count("songs")
    }

    fn find_lesson_on_date(
        &self,
        teacher_id: &str,
        student_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Lesson>> {
        let day_start = start_of_day(date);
        let next_day = day_start + Days::new(1);

        let conn = self.conn.lock().unwrap();
        let lesson = conn
            .query_row(
                &format!(
                    "SELECT {} FROM lessons
                     WHERE teacher_id = ?1 AND student_id = ?2 AND deleted_at IS NULL
                       AND scheduled_at >= ?3 AND scheduled_at < ?4
                     ORDER BY scheduled_at, rowid LIMIT 1",
                    LESSON_COLUMNS
                ),
                params![
                    teacher_id,
                    student_id,
                    format_timestamp(&day_start),
                    format_timestamp(&next_day)
                ],
                Self::row_to_lesson,
            )
            .optional()?;
        Ok(lesson)
    }

    fn create_lesson(&self, lesson: &NewLesson) -> Result<Lesson> {
        let conn = self.conn.lock().unwrap();
        let now = utc_now();
        let created = Lesson {
            id: Uuid::new_v4().to_string(),
            teacher_id: lesson.teacher_id.clone(),
            student_id: lesson.student_id.clone(),
            title: lesson.title.clone(),
            notes: lesson.notes.clone(),
            scheduled_at: lesson.scheduled_at.trunc_subsecs(0),
            status: lesson.status,
            google_event_id: lesson.google_event_id.clone(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO lessons (id, teacher_id, student_id, title, notes, scheduled_at,
                status, google_event_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                created.id,
                created.teacher_id,
                created.student_id,
                created.title,
                created.notes,
                format_timestamp(&created.scheduled_at),
                created.status.as_str(),
                created.google_event_id,
                format_timestamp(&created.created_at),
                format_timestamp(&created.updated_at)
            ],
        )?;

        Ok(created)
    }

    fn get_lesson(&self, id: &str) -> Result<Option<Lesson>> {
        let conn = self.conn.lock().unwrap();
        let lesson = conn
            .query_row(
                &format!("SELECT {} FROM lessons WHERE id = ?1", LESSON_COLUMNS),
                params![id],
                Self::row_to_lesson,
            )
            .optional()?;
        Ok(lesson)
    }

    fn update_lesson(&self, lesson: &Lesson) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        Ok(Self::write_lesson(&conn, lesson)? > 0)
    }

    fn count_lessons(&self) -> Result<usize> {
        self.count("lessons")
    }

    fn link_song_to_lesson(
        &self,
        lesson_id: &str,
        song_id: &str,
        status: LessonSongStatus,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO lesson_songs (lesson_id, song_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(lesson_id, song_id) DO UPDATE SET status = ?3",
            params![
                lesson_id,
                song_id,
                status.as_str(),
                format_timestamp(&utc_now())
            ],
        )?;
        Ok(())
    }

    fn lesson_song_ids(&self, lesson_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT song_id FROM lesson_songs WHERE lesson_id = ?1 ORDER BY created_at, rowid",
        )?;
        let ids = stmt
            .query_map(params![lesson_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn insert_sync_conflict(
        &self,
        lesson_id: &str,
        google_event_id: &str,
        conflict_data: &serde_json::Value,
    ) -> Result<SyncConflict> {
        let conn = self.conn.lock().unwrap();
        let conflict = SyncConflict {
            id: Uuid::new_v4().to_string(),
            lesson_id: lesson_id.to_string(),
            google_event_id: google_event_id.to_string(),
            conflict_data: conflict_data.clone(),
            status: ConflictStatus::Pending,
            resolution: None,
            created_at: utc_now(),
            resolved_at: None,
        };

        conn.execute(
            "INSERT INTO sync_conflicts (id, lesson_id, google_event_id, conflict_data, status,
                created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                conflict.id,
                conflict.lesson_id,
                conflict.google_event_id,
                conflict.conflict_data.to_string(),
                conflict.status.as_str(),
                format_timestamp(&conflict.created_at)
            ],
        )?;

        Ok(conflict)
    }

    fn get_sync_conflict(&self, id: &str) -> Result<Option<SyncConflict>> {
        let conn = self.conn.lock().unwrap();
        let conflict = conn
            .query_row(
                &format!("SELECT {} FROM sync_conflicts c WHERE c.id = ?1", CONFLICT_COLUMNS),
                params![id],
                Self::row_to_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    fn get_pending_conflicts_for_teacher(&self, teacher_id: &str) -> Result<Vec<SyncConflict>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sync_conflicts c
             JOIN lessons l ON l.id = c.lesson_id
             WHERE c.status = ?1 AND l.teacher_id = ?2
             ORDER BY c.created_at DESC, c.rowid DESC",
            CONFLICT_COLUMNS
        ))?;

        let conflicts = stmt
            .query_map(
                params![ConflictStatus::Pending.as_str(), teacher_id],
                Self::row_to_conflict,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn list_pending_conflicts_older_than(
        &self,
        cutoff: &DateTime<Utc>,
    ) -> Result<Vec<SyncConflict>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sync_conflicts c
             WHERE c.status = ?1 AND c.created_at < ?2
             ORDER BY c.created_at, c.rowid",
            CONFLICT_COLUMNS
        ))?;

        let conflicts = stmt
            .query_map(
                params![ConflictStatus::Pending.as_str(), format_timestamp(cutoff)],
                Self::row_to_conflict,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn resolve_sync_conflict(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
        resolved_at: &DateTime<Utc>,
        lesson_update: Option<&Lesson>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE sync_conflicts SET status = ?1, resolution = ?2, resolved_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                ConflictStatus::Resolved.as_str(),
                resolution.as_str(),
                format_timestamp(resolved_at),
                conflict_id,
                ConflictStatus::Pending.as_str()
            ],
        )?;
        if updated == 0 {
            return Ok(false);
        }

        if let Some(lesson) = lesson_update {
            if Self::write_lesson(&tx, lesson)? == 0 {
                anyhow::bail!("Lesson {} not found", lesson.id);
            }
        }

        tx.commit()?;
        Ok(true)
    }
}
