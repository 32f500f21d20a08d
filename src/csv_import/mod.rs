//! Spreadsheet song-history import.
//!
//! Each row (`DD.MM.YYYY`, title, author) is fuzzy-matched against the song
//! catalog, then linked to the student's lesson on that date, creating the
//! song and the lesson when needed.

mod models;
mod similarity;
mod validation;

pub use models::{
    CsvRow, ImportError, ImportRequest, ImportResponse, ImportSummary, MatchStatus, RowResult,
};
pub use similarity::{best_match, levenshtein_distance, normalize, similarity};
pub use validation::{parse_row_date, validate_row, RowError, ValidRow};

use crate::activity::ActivityEngine;
use crate::config::CsvImportSettings;
use crate::crm_store::{
    start_of_day, utc_now, ChangeSource, CrmStore, LessonSongStatus, LessonStatus, NewLesson,
    Profile, Song,
};
use crate::server::metrics;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use similarity::round_score;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const IMPORTED_LESSON_TITLE: &str = "Lesson (imported)";
const UNKNOWN_AUTHOR: &str = "Unknown";

pub struct CsvImporter {
    store: Arc<dyn CrmStore>,
    settings: CsvImportSettings,
    activity: Arc<ActivityEngine>,
}

impl CsvImporter {
    pub fn new(
        store: Arc<dyn CrmStore>,
        settings: CsvImportSettings,
        activity: Arc<ActivityEngine>,
    ) -> Self {
        Self {
            store,
            settings,
            activity,
        }
    }

    pub fn classify(&self, score: f64) -> MatchStatus {
        if score >= self.settings.matched_threshold {
            MatchStatus::Matched
        } else if score >= self.settings.low_confidence_threshold {
            MatchStatus::LowConfidence
        } else {
            MatchStatus::New
        }
    }

    /// Imports `request` on behalf of `caller`, who becomes the teacher of
    /// any lesson created. Row level problems are reported in the results;
    /// only whole-request problems are returned as errors.
    pub fn import(
        &self,
        caller: &Profile,
        request: &ImportRequest,
    ) -> Result<ImportResponse, ImportError> {
        if !(caller.is_teacher || caller.is_admin) {
            return Err(ImportError::Unauthorized);
        }
        if request.rows.is_empty() {
            return Err(ImportError::NoRows);
        }
        match self.store.get_profile(&request.student_id)? {
            Some(profile) if profile.is_student => {}
            _ => return Err(ImportError::StudentNotFound),
        }

        let mut session = ImportSession {
            importer: self,
            teacher_id: &caller.id,
            student_id: &request.student_id,
            validate_only: request.validate_only,
            candidates: self.store.list_songs()?,
            lessons: HashMap::new(),
            lessons_created: 0,
            lessons_existing: 0,
        };

        let results: Vec<RowResult> = request
            .rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                let result = session.process_row(index, row);
                metrics::record_csv_import_row(result.match_status.as_str(), result.success);
                result
            })
            .collect();

        let summary = ImportSummary {
            total_rows: request.rows.len(),
            songs_matched: results
                .iter()
                .filter(|r| r.success && r.match_status.reuses_song())
                .count(),
            songs_created: results.iter().filter(|r| r.song_created).count(),
            lessons_created: session.lessons_created,
            lessons_existing: session.lessons_existing,
            errors: results.iter().filter(|r| !r.success).count(),
        };

        info!(
            "CSV import for student {} ({}): {} rows, {} matched, {} songs created, {} lessons created, {} errors",
            request.student_id,
            if request.validate_only { "validate only" } else { "applied" },
            summary.total_rows,
            summary.songs_matched,
            summary.songs_created,
            summary.lessons_created,
            summary.errors
        );

        if !request.validate_only {
            self.activity.recompute_student_status(
                &request.student_id,
                utc_now(),
                ChangeSource::LessonHook,
            );
        }

        Ok(ImportResponse {
            success: true,
            results,
            summary,
        })
    }
}

/// Mutable state of one import request.
struct ImportSession<'a> {
    importer: &'a CsvImporter,
    teacher_id: &'a str,
    student_id: &'a str,
    validate_only: bool,
    /// Catalog songs plus those created earlier in this import.
    candidates: Vec<Song>,
    /// Lesson resolved for each date so far.
    lessons: HashMap<NaiveDate, String>,
    lessons_created: usize,
    lessons_existing: usize,
}

impl ImportSession<'_> {
    fn process_row(&mut self, row_index: usize, row: &CsvRow) -> RowResult {
        let valid = match validate_row(row) {
            Ok(valid) => valid,
            Err(e) => return RowResult::failed(row_index, row, e.to_string()),
        };

        let best = best_match(&valid.title, &valid.author, &self.candidates);
        let match_status = best
            .map(|(_, score)| self.importer.classify(score))
            .unwrap_or(MatchStatus::New);
        let reused = best
            .filter(|_| match_status.reuses_song())
            .map(|(index, _)| &self.candidates[index]);

        let mut result = RowResult {
            row_index,
            date: row.date.clone(),
            title: valid.title.clone(),
            author: valid.author.clone(),
            match_status,
            match_score: best.map(|(_, score)| round_score(score)),
            matched_song_title: reused.map(|song| song.title.clone()),
            song_id: reused.map(|song| song.id.clone()),
            lesson_id: None,
            song_created: false,
            lesson_created: false,
            success: true,
            error: None,
        };

        if self.validate_only {
            return result;
        }

        if let Err(e) = self.persist_row(&valid, &mut result) {
            warn!("CSV import row {} failed: {:#}", row_index, e);
            result.success = false;
            result.error = Some(format!("{:#}", e));
        }
        result
    }

    fn persist_row(&mut self, row: &ValidRow, result: &mut RowResult) -> Result<()> {
        let (lesson_id, lesson_created) = self.resolve_lesson(row.date)?;
        result.lesson_id = Some(lesson_id.clone());
        result.lesson_created = lesson_created;

        let song_id = match &result.song_id {
            Some(id) => id.clone(),
            None => {
                let author = if row.author.is_empty() {
                    UNKNOWN_AUTHOR
                } else {
                    row.author.as_str()
                };
                let song = self
                    .importer
                    .store
                    .create_song(&row.title, author)
                    .context("Failed to create song")?;
                result.song_created = true;
                result.song_id = Some(song.id.clone());
                let id = song.id.clone();
                self.candidates.push(song);
                id
            }
        };

        self.importer
            .store
            .link_song_to_lesson(&lesson_id, &song_id, LessonSongStatus::ToLearn)
            .context("Failed to link song to lesson")?;
        Ok(())
    }

    /// Lesson for `date`, and whether this call created it.
    fn resolve_lesson(&mut self, date: NaiveDate) -> Result<(String, bool)> {
        if let Some(id) = self.lessons.get(&date) {
            return Ok((id.clone(), false));
        }

        let store = &self.importer.store;
        if let Some(existing) = store
            .find_lesson_on_date(self.teacher_id, self.student_id, date)
            .context("Failed to look up lesson")?
        {
            self.lessons_existing += 1;
            self.lessons.insert(date, existing.id.clone());
            return Ok((existing.id, false));
        }

        let lesson = store
            .create_lesson(&NewLesson {
                teacher_id: self.teacher_id.to_string(),
                student_id: self.student_id.to_string(),
                title: Some(IMPORTED_LESSON_TITLE.to_string()),
                notes: None,
                scheduled_at: start_of_day(date),
                status: LessonStatus::Completed,
                google_event_id: None,
            })
            .context("Failed to create lesson")?;
        self.lessons_created += 1;
        self.lessons.insert(date, lesson.id.clone());
        Ok((lesson.id, true))
    }
}
