use super::models::CsvRow;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DATE_PATTERN: Regex =
        Regex::new(r"^[0-9]{2}\.[0-9]{2}\.[0-9]{4}$").expect("Failed to compile date pattern");
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowError {
    #[error("Invalid date format: {0} (expected DD.MM.YYYY)")]
    InvalidDateFormat(String),
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Title is required")]
    MissingTitle,
}

/// A row that passed validation, with whitespace trimmed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRow {
    pub date: NaiveDate,
    pub title: String,
    pub author: String,
}

/// Parses a `DD.MM.YYYY` date, rejecting other layouts and impossible days.
pub fn parse_row_date(raw: &str) -> Result<NaiveDate, RowError> {
    let raw = raw.trim();
    if !DATE_PATTERN.is_match(raw) {
        return Err(RowError::InvalidDateFormat(raw.to_string()));
    }
    NaiveDate::parse_from_str(raw, "%d.%m.%Y").map_err(|_| RowError::InvalidDate(raw.to_string()))
}

pub fn validate_row(row: &CsvRow) -> Result<ValidRow, RowError> {
    let date = parse_row_date(&row.date)?;
    let title = row.title.trim();
    if title.is_empty() {
        return Err(RowError::MissingTitle);
    }
    Ok(ValidRow {
        date,
        title: title.to_string(),
        author: row.trimmed_author(),
    })
}
