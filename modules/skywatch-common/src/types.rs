use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::quality::{Grade, QualityDimensions};

// --- Geo helpers ---

/// Haversine great-circle distance between two lat/lng points in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PhenomenonCategory {
    Uap,
    Cryptid,
    Apparition,
    Poltergeist,
    MissingTime,
    Electromagnetic,
    Psychic,
    Other,
}

impl std::fmt::Display for PhenomenonCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhenomenonCategory::Uap => write!(f, "uap"),
            PhenomenonCategory::Cryptid => write!(f, "cryptid"),
            PhenomenonCategory::Apparition => write!(f, "apparition"),
            PhenomenonCategory::Poltergeist => write!(f, "poltergeist"),
            PhenomenonCategory::MissingTime => write!(f, "missing_time"),
            PhenomenonCategory::Electromagnetic => write!(f, "electromagnetic"),
            PhenomenonCategory::Psychic => write!(f, "psychic"),
            PhenomenonCategory::Other => write!(f, "other"),
        }
    }
}

impl PhenomenonCategory {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "uap" | "ufo" | "lights" | "craft" => Self::Uap,
            "cryptid" | "creature" => Self::Cryptid,
            "apparition" | "ghost" | "haunting" => Self::Apparition,
            "poltergeist" => Self::Poltergeist,
            "missing_time" | "lost_time" => Self::MissingTime,
            "electromagnetic" | "em_interference" => Self::Electromagnetic,
            "psychic" | "precognition" | "telepathy" => Self::Psychic,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    WitnessSubmission,
    NewsScrape,
    ArchiveImport,
    SocialMedia,
    ModeratorEntry,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::WitnessSubmission => write!(f, "witness_submission"),
            SourceType::NewsScrape => write!(f, "news_scrape"),
            SourceType::ArchiveImport => write!(f, "archive_import"),
            SourceType::SocialMedia => write!(f, "social_media"),
            SourceType::ModeratorEntry => write!(f, "moderator_entry"),
        }
    }
}

impl SourceType {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "news_scrape" | "news" => Self::NewsScrape,
            "archive_import" | "archive" => Self::ArchiveImport,
            "social_media" | "social" => Self::SocialMedia,
            "moderator_entry" | "moderator" => Self::ModeratorEntry,
            _ => Self::WitnessSubmission,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Credibility {
    Unverified,
    Questionable,
    Plausible,
    Corroborated,
}

impl std::fmt::Display for Credibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credibility::Unverified => write!(f, "unverified"),
            Credibility::Questionable => write!(f, "questionable"),
            Credibility::Plausible => write!(f, "plausible"),
            Credibility::Corroborated => write!(f, "corroborated"),
        }
    }
}

impl Credibility {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "questionable" => Self::Questionable,
            "plausible" => Self::Plausible,
            "corroborated" => Self::Corroborated,
            _ => Self::Unverified,
        }
    }
}

// --- Report ---

/// A single anomalous-phenomenon report. Free-text and witness fields are
/// owned by the ingestion layer; the quality/fingerprint fields are derived
/// here and written back by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub title: String,
    pub summary: Option<String>,
    pub description: String,
    pub category: PhenomenonCategory,

    pub location_name: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    pub event_at: Option<DateTime<Utc>>,
    /// True when the witness could only give an approximate date
    /// ("sometime last summer"). Approximate dates are excluded from
    /// wave candidacy.
    pub event_date_approximate: bool,

    pub witness_count: u32,
    pub has_physical_evidence: bool,
    pub has_photo_video: bool,
    pub has_official_report: bool,
    pub evidence_summary: Option<String>,

    pub source_type: SourceType,
    pub credibility: Credibility,
    pub tags: Vec<String>,

    // Derived, core-owned.
    pub quality_score: Option<i16>,
    pub quality_grade: Option<Grade>,
    pub quality_dimensions: Option<QualityDimensions>,
    pub quality_scored_at: Option<DateTime<Utc>>,
    pub quality_scorer_version: Option<String>,
    pub content_fingerprint: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    /// Coordinates when the report is geocoded.
    pub fn coords(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }

    /// Event date usable for precise temporal analysis (waves). Approximate
    /// dates are excluded.
    pub fn precise_event_at(&self) -> Option<DateTime<Utc>> {
        if self.event_date_approximate {
            None
        } else {
            self.event_at
        }
    }

    /// Best-effort single location string for fingerprinting and fuzzy
    /// matching: the free-text place name, falling back to city/state/country.
    pub fn location_text(&self) -> Option<String> {
        if let Some(name) = &self.location_name {
            if !name.trim().is_empty() {
                return Some(name.clone());
            }
        }
        let parts: Vec<&str> = [self.city.as_deref(), self.state.as_deref(), self.country.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }

    /// Eligible for rescoring when the stored version differs from the
    /// current scorer version (or the report was never scored).
    pub fn score_is_stale(&self, current_version: &str) -> bool {
        self.quality_scorer_version.as_deref() != Some(current_version)
    }
}

// --- Duplicate matches ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    Low,
    Medium,
    High,
    Certain,
}

impl std::fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchConfidence::Low => write!(f, "low"),
            MatchConfidence::Medium => write!(f, "medium"),
            MatchConfidence::High => write!(f, "high"),
            MatchConfidence::Certain => write!(f, "certain"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ExactFingerprint,
    Fuzzy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchResolution {
    Pending,
    Confirmed,
    Rejected,
}

impl std::fmt::Display for MatchResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchResolution::Pending => write!(f, "pending"),
            MatchResolution::Confirmed => write!(f, "confirmed"),
            MatchResolution::Rejected => write!(f, "rejected"),
        }
    }
}

/// A proposed duplicate pair. Always stored in canonical order
/// (`report_a_id < report_b_id`) so a pair occupies at most one row.
/// The resolution field is written only by moderation tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub report_a_id: Uuid,
    pub report_b_id: Uuid,
    pub title_similarity: f64,
    pub location_similarity: f64,
    pub date_similarity: f64,
    pub content_similarity: f64,
    pub overall_score: f64,
    pub confidence: MatchConfidence,
    pub match_kind: MatchKind,
    pub resolution: MatchResolution,
}

impl DuplicateMatch {
    /// Reorder so the lower id comes first. Component scores are symmetric,
    /// so only the ids swap.
    pub fn canonicalize(mut self) -> Self {
        if self.report_b_id < self.report_a_id {
            std::mem::swap(&mut self.report_a_id, &mut self.report_b_id);
        }
        self
    }

    pub fn is_canonical(&self) -> bool {
        self.report_a_id < self.report_b_id
    }
}

// --- Detected patterns ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    GeographicCluster,
    TemporalAnomaly,
    FlapWave,
    CharacteristicCorrelation,
    RegionalConcentration,
    SeasonalPattern,
    TimeOfDayPattern,
    DateCorrelation,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternType::GeographicCluster => write!(f, "geographic_cluster"),
            PatternType::TemporalAnomaly => write!(f, "temporal_anomaly"),
            PatternType::FlapWave => write!(f, "flap_wave"),
            PatternType::CharacteristicCorrelation => write!(f, "characteristic_correlation"),
            PatternType::RegionalConcentration => write!(f, "regional_concentration"),
            PatternType::SeasonalPattern => write!(f, "seasonal_pattern"),
            PatternType::TimeOfDayPattern => write!(f, "time_of_day_pattern"),
            PatternType::DateCorrelation => write!(f, "date_correlation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PatternStatus {
    Emerging,
    Active,
    Decayed,
}

impl std::fmt::Display for PatternStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternStatus::Emerging => write!(f, "emerging"),
            PatternStatus::Active => write!(f, "active"),
            PatternStatus::Decayed => write!(f, "decayed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    LowSampleSize,
    ShortTimeWindow,
    SingleCategory,
    NoPreciseLocation,
    WellEstablished,
    MultiPhenomenon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EffectMagnitude {
    Negligible,
    Small,
    Medium,
    Large,
    VeryLarge,
}

impl std::fmt::Display for EffectMagnitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EffectMagnitude::Negligible => write!(f, "negligible"),
            EffectMagnitude::Small => write!(f, "small"),
            EffectMagnitude::Medium => write!(f, "medium"),
            EffectMagnitude::Large => write!(f, "large"),
            EffectMagnitude::VeryLarge => write!(f, "very_large"),
        }
    }
}

/// Detector-specific fields, one closed variant per pattern type so the
/// confidence stage and the stores consume every detector's output with
/// compile-time guarantees rather than an open metadata map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternDetails {
    GeographicCluster {
        radius_km_param: f64,
        min_points_param: usize,
    },
    TemporalAnomaly {
        window_start: DateTime<Utc>,
        window_days: u32,
        observed: u32,
        baseline_mean: f64,
        baseline_stddev: f64,
        z_score: f64,
    },
    SeasonalPattern {
        month: u32,
        monthly_avg: f64,
        yearly_mean: f64,
        deviation_ratio: f64,
        years_observed: u32,
    },
    RegionalConcentration {
        region: String,
        observed_density: f64,
        expected_density: f64,
        population_weight: f64,
        historical_weight: f64,
    },
    FlapWave {
        slice_days: u32,
        max_km_per_day: f64,
        path: Vec<WavePoint>,
        total_distance_km: f64,
        speed_km_per_day: f64,
    },
}

/// One centroid in a wave's migration path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WavePoint {
    pub lat: f64,
    pub lng: f64,
    pub slice_start: DateTime<Utc>,
    pub report_count: u32,
}

/// A persisted pattern. Identity across runs is `stable_key` (type plus
/// defining parameters); re-detection updates counts and scores in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub id: Uuid,
    pub pattern_type: PatternType,
    pub status: PatternStatus,
    pub stable_key: String,

    pub report_count: u32,
    pub report_ids: Vec<Uuid>,

    pub confidence_score: f64,
    pub confidence_low: f64,
    pub confidence_high: f64,
    pub significance_score: f64,
    pub effect_size: f64,
    pub effect_magnitude: EffectMagnitude,

    pub center_lat: Option<f64>,
    pub center_lng: Option<f64>,
    pub radius_km: Option<f64>,

    pub category_mix: BTreeMap<String, u32>,
    pub quality_flags: Vec<QualityFlag>,
    pub details: PatternDetails,

    pub detector_version: String,
    pub first_detected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Runs in a row this pattern has met its detector's thresholds.
    pub consecutive_runs: u32,
}
