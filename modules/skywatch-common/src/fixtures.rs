//! Report builders for deterministic tests across the workspace.
//! No network, no database: construct exactly the corpus a test needs.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::types::*;

/// A minimal report with every optional field empty.
pub fn blank_report() -> Report {
    let created = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    Report {
        id: Uuid::new_v4(),
        title: "Untitled sighting".to_string(),
        summary: None,
        description: String::new(),
        category: PhenomenonCategory::Other,
        location_name: None,
        country: None,
        state: None,
        city: None,
        latitude: None,
        longitude: None,
        event_at: None,
        event_date_approximate: false,
        witness_count: 0,
        has_physical_evidence: false,
        has_photo_video: false,
        has_official_report: false,
        evidence_summary: None,
        source_type: SourceType::WitnessSubmission,
        credibility: Credibility::Unverified,
        tags: vec![],
        quality_score: None,
        quality_grade: None,
        quality_dimensions: None,
        quality_scored_at: None,
        quality_scorer_version: None,
        content_fingerprint: None,
        created_at: created,
        updated_at: created,
    }
}

/// A geocoded report with a precise event date.
pub fn report_at(lat: f64, lng: f64, event_at: DateTime<Utc>) -> Report {
    let mut r = blank_report();
    r.latitude = Some(lat);
    r.longitude = Some(lng);
    r.event_at = Some(event_at);
    r
}

/// A dated report without coordinates.
pub fn report_on(event_at: DateTime<Utc>) -> Report {
    let mut r = blank_report();
    r.event_at = Some(event_at);
    r
}
