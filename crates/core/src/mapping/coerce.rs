//! Value coercion for free-text CMS fields.

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use regex_lite::Regex;
use tracing::warn;

use crate::models::RETENTION_PERIOD;

/// Accepted timestamp layouts, tried in order.
pub const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y年%m月%d日",
    "%Y/%m/%d %H:%M:%S",
];

/// Longest string value written to the archive, in characters.
pub const MAX_STRING_LEN: usize = 1000;

pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;

fn embedded_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{4})[-/](\d{1,2})[-/](\d{1,2})").expect("embedded date pattern compiles")
    })
}

fn four_digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}").expect("year pattern compiles"))
}

/// Parse `raw` against [`DATE_FORMATS`].
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS.iter().find_map(|fmt| {
        if fmt.contains("%H") {
            NaiveDateTime::parse_from_str(raw, fmt).ok().map(|dt| dt.date())
        } else {
            NaiveDate::parse_from_str(raw, fmt).ok()
        }
    })
}

/// Normalize a timestamp to `YYYY-MM-DD`.
///
/// Falls back to the first `YYYY-M-D` or `YYYY/M/D` substring, zero-padded.
/// Returns an empty string when nothing date-like is found.
pub fn normalize_date(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if let Some(date) = parse_date(raw) {
        return date.format("%Y-%m-%d").to_string();
    }
    if let Some(caps) = embedded_date().captures(raw) {
        return format!("{}-{:0>2}-{:0>2}", &caps[1], &caps[2], &caps[3]);
    }
    warn!(value = raw, "failed to parse date");
    String::new()
}

/// Derive the four-digit year of a timestamp.
pub fn extract_year(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if let Some(date) = parse_date(raw) {
        return date.year().to_string();
    }
    let plausible = four_digits()
        .find(raw)
        .map(|m| m.as_str())
        .filter(|y| y.parse::<i32>().is_ok_and(|y| (MIN_YEAR..=MAX_YEAR).contains(&y)));
    match plausible {
        Some(year) => year.to_string(),
        None => {
            warn!(value = raw, "failed to extract year");
            String::new()
        }
    }
}

/// Whether `value` is exactly `YYYY-MM-DD` and names a real day.
pub fn is_strict_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
        && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// Trim, collapse internal whitespace runs to one space and cap the length.
pub fn clean_string(raw: &str) -> String {
    let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.chars().count() > MAX_STRING_LEN {
        warn!(max = MAX_STRING_LEN, "string truncated");
        return cleaned.chars().take(MAX_STRING_LEN).collect();
    }
    cleaned
}

/// Parse a retention period in years, falling back to [`RETENTION_PERIOD`].
pub fn parse_retention(raw: &str) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(years) => years,
        Err(_) => {
            warn!(value = raw, "invalid retention period, using default");
            RETENTION_PERIOD
        }
    }
}
