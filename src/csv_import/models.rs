use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub student_id: String,
    #[serde(default)]
    pub rows: Vec<CsvRow>,
    #[serde(default)]
    pub validate_only: bool,
}

/// One spreadsheet line as submitted. Missing fields deserialize to empty
/// values so that they fail row validation instead of the whole request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CsvRow {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
}

impl CsvRow {
    pub fn trimmed_author(&self) -> String {
        self.author
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    LowConfidence,
    New,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Matched => "matched",
            MatchStatus::LowConfidence => "low_confidence",
            MatchStatus::New => "new",
        }
    }

    /// Whether an existing catalog song is reused for this row.
    pub fn reuses_song(&self) -> bool {
        matches!(self, MatchStatus::Matched | MatchStatus::LowConfidence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResult {
    pub row_index: usize,
    pub date: String,
    pub title: String,
    pub author: String,
    pub match_status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_song_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
    pub song_created: bool,
    pub lesson_created: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RowResult {
    pub(super) fn failed(row_index: usize, row: &CsvRow, error: String) -> Self {
        Self {
            row_index,
            date: row.date.clone(),
            title: row.title.trim().to_string(),
            author: row.trimmed_author(),
            match_status: MatchStatus::New,
            match_score: None,
            matched_song_title: None,
            song_id: None,
            lesson_id: None,
            song_created: false,
            lesson_created: false,
            success: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub total_rows: usize,
    pub songs_matched: usize,
    pub songs_created: usize,
    pub lessons_created: usize,
    pub lessons_existing: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResponse {
    pub success: bool,
    pub results: Vec<RowResult>,
    pub summary: ImportSummary,
}

/// Reasons the whole request is rejected before any row is looked at.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("No rows to import")]
    NoRows,
    #[error("Student not found")]
    StudentNotFound,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
