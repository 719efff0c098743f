//! Permissive field parsers for imported rows.
//!
//! None of these fail: an unrecognised value becomes `None`, except the
//! email check, which the pipeline reports as a row error.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::types::{Gender, MaritalStatus};

/// `local@domain.tld`, no whitespace, at least a two-letter tld.
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[A-Za-z]{2,}$").unwrap());

/// Tried in order. `DD/MM/YYYY` wins over the US reading of slashed dates.
const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y",
    "%Y-%m-%d",
    "%m-%d-%Y",
    "%d %B %Y",
    "%B %d, %Y",
    "%B %d %Y",
];

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn parse_gender(raw: &str) -> Option<Gender> {
    match raw.trim().to_lowercase().as_str() {
        "m" | "male" | "man" => Some(Gender::Male),
        "f" | "female" | "woman" => Some(Gender::Female),
        _ => None,
    }
}

pub fn parse_marital_status(raw: &str) -> Option<MaritalStatus> {
    match raw.trim().to_lowercase().as_str() {
        "s" | "single" => Some(MaritalStatus::Single),
        "m" | "married" => Some(MaritalStatus::Married),
        "d" | "divorced" => Some(MaritalStatus::Divorced),
        "w" | "widowed" | "widow" | "widower" => Some(MaritalStatus::Widowed),
        _ => None,
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}
