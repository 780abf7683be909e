//! Date parsing helpers for the date transforms

use crate::core::error::{StepError, StepResult};
use chrono::{Datelike, NaiveDate, NaiveDateTime};

/// Weekday names, Monday first
pub const WEEKDAYS: [&str; 7] = [
    "Montag",
    "Dienstag",
    "Mittwoch",
    "Donnerstag",
    "Freitag",
    "Samstag",
    "Sonntag",
];

/// Format dates are stored in
pub const DATE_OUTPUT_FORMAT: &str = "%Y-%m-%d";

/// Parse a date with a strftime-style format; time fields in the format are accepted
pub fn parse_date(value: &str, format: &str) -> StepResult<NaiveDate> {
    NaiveDate::parse_from_str(value, format)
        .or_else(|_| NaiveDateTime::parse_from_str(value, format).map(|dt| dt.date()))
        .map_err(|e| {
            StepError::invalid_value(
                value,
                format!("does not match date format '{}': {}", format, e),
            )
        })
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_OUTPUT_FORMAT).to_string()
}

pub fn weekday_name(date: NaiveDate) -> &'static str {
    WEEKDAYS[date.weekday().num_days_from_monday() as usize]
}
