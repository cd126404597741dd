//! Content fingerprinting for cheap exact-duplicate detection.
//!
//! The fingerprint is a pure function of (normalized title, event date,
//! normalized location). Absent fields still produce a fingerprint, just
//! with lower discriminating power — callers must not treat a collision on
//! a date-less report as high confidence.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::types::Report;

/// Placeholder for a field the witness left blank. Known blank synonyms
/// collapse to this so "unknown" and "" fingerprint identically.
const MISSING: &str = "unspecified";

const BLANK_SYNONYMS: &[&str] = &["", "unknown", "n/a", "na", "none", "not specified", "unspecified"];

/// Lowercase, strip punctuation, collapse whitespace runs.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            for lc in c.to_lowercase() {
                out.push(lc);
            }
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

fn normalized_part(value: Option<&str>) -> String {
    let normalized = normalize(value.unwrap_or(""));
    if BLANK_SYNONYMS.contains(&normalized.as_str()) {
        MISSING.to_string()
    } else {
        normalized
    }
}

/// Deterministic fingerprint from title, event date, and location text.
/// Same inputs always yield the same output, across calls and restarts.
pub fn fingerprint(title: &str, event_at: Option<DateTime<Utc>>, location: Option<&str>) -> String {
    let title_part = normalized_part(Some(title));
    let date_part = event_at
        .map(|d| d.date_naive().to_string())
        .unwrap_or_else(|| MISSING.to_string());
    let location_part = normalized_part(location);

    let key = format!("{title_part}|{date_part}|{location_part}");
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)
}

/// Fingerprint a report from its current fields.
pub fn report_fingerprint(report: &Report) -> String {
    fingerprint(
        &report.title,
        report.event_at,
        report.location_text().as_deref(),
    )
}
