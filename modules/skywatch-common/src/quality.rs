use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{Credibility, Report, SourceType};

/// Current rubric version. Stored on every scored report; a stored version
/// that differs makes the report eligible for rescoring.
pub const SCORER_VERSION: &str = "v2";

/// Letter grade mapped from the 0-100 total via fixed cut points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum Grade {
    F,
    D,
    C,
    B,
    A,
}

impl Grade {
    /// >=90 A, >=75 B, >=55 C, >=35 D, else F. Monotonic in score.
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => Grade::A,
            75..=89 => Grade::B,
            55..=74 => Grade::C,
            35..=54 => Grade::D,
            _ => Grade::F,
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grade::A => write!(f, "A"),
            Grade::B => write!(f, "B"),
            Grade::C => write!(f, "C"),
            Grade::D => write!(f, "D"),
            Grade::F => write!(f, "F"),
        }
    }
}

impl Grade {
    pub fn from_letter(s: &str) -> Option<Self> {
        match s {
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            "F" => Some(Grade::F),
            _ => None,
        }
    }
}

/// Named sub-scores, each bounded to a fixed range. A closed set rather
/// than an open map so consumers see every dimension the rubric produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QualityDimensions {
    /// 0-20: coordinate precision down to bare place names.
    pub location: u8,
    /// 0-15: precise event time > approximate > none.
    pub timing: u8,
    /// 0-10: corroborating witnesses.
    pub witnesses: u8,
    /// 0-25: physical evidence, photo/video, official report.
    pub evidence: u8,
    /// 0-20: narrative length and detail.
    pub narrative: u8,
    /// 0-10: source reliability weighting with a credibility bump.
    pub source: u8,
}

impl QualityDimensions {
    pub fn total(&self) -> u8 {
        self.location + self.timing + self.witnesses + self.evidence + self.narrative + self.source
    }
}

/// The scorer's full output for one report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub score: u8,
    pub grade: Grade,
    pub dimensions: QualityDimensions,
    pub scorer_version: String,
    pub scored_at: DateTime<Utc>,
}

/// Score a single report. Pure: no I/O, no randomness, stable under
/// re-invocation with identical input. Persistence is the engine's job.
pub fn assess(report: &Report, now: DateTime<Utc>) -> QualityAssessment {
    let dimensions = QualityDimensions {
        location: location_score(report),
        timing: timing_score(report),
        witnesses: witness_score(report.witness_count),
        evidence: evidence_score(report),
        narrative: narrative_score(&report.description),
        source: source_score(report.source_type, report.credibility),
    };
    let score = dimensions.total();

    QualityAssessment {
        score,
        grade: Grade::from_score(score),
        dimensions,
        scorer_version: SCORER_VERSION.to_string(),
        scored_at: now,
    }
}

fn location_score(report: &Report) -> u8 {
    if report.coords().is_some() {
        20
    } else if report.city.is_some() || report.state.is_some() {
        14
    } else if report.location_text().is_some() {
        8
    } else {
        0
    }
}

fn timing_score(report: &Report) -> u8 {
    match report.event_at {
        Some(_) if !report.event_date_approximate => 15,
        Some(_) => 10,
        None => 0,
    }
}

fn witness_score(witness_count: u32) -> u8 {
    match witness_count {
        0 => 0,
        1 => 4,
        2..=4 => 7,
        _ => 10,
    }
}

fn evidence_score(report: &Report) -> u8 {
    let mut score = 0;
    if report.has_physical_evidence {
        score += 10;
    }
    if report.has_photo_video {
        score += 9;
    }
    if report.has_official_report {
        score += 6;
    }
    score
}

fn narrative_score(description: &str) -> u8 {
    let len = description.trim().len();
    match len {
        0 => 0,
        1..=79 => 3,
        80..=249 => 7,
        250..=599 => 12,
        600..=1199 => 16,
        _ => 20,
    }
}

fn source_score(source_type: SourceType, credibility: Credibility) -> u8 {
    let base = match source_type {
        SourceType::ModeratorEntry => 8,
        SourceType::NewsScrape => 7,
        SourceType::WitnessSubmission => 6,
        SourceType::ArchiveImport => 5,
        SourceType::SocialMedia => 3,
    };
    let bump = match credibility {
        Credibility::Corroborated => 2,
        Credibility::Plausible => 1,
        _ => 0,
    };
    (base + bump).min(10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::blank_report;
    use chrono::TimeZone;

    fn full_report() -> Report {
        let mut r = blank_report();
        r.title = "Strange lights over the reservoir".to_string();
        r.description = "x".repeat(1300);
        r.latitude = Some(44.97);
        r.longitude = Some(-93.26);
        r.event_at = Some(Utc.with_ymd_and_hms(2025, 3, 14, 21, 30, 0).unwrap());
        r.witness_count = 6;
        r.has_physical_evidence = true;
        r.has_photo_video = true;
        r.has_official_report = true;
        r.source_type = SourceType::ModeratorEntry;
        r.credibility = Credibility::Corroborated;
        r
    }

    #[test]
    fn score_is_bounded_and_grade_matches() {
        let a = assess(&full_report(), Utc::now());
        assert!(a.score <= 100);
        assert_eq!(a.score, 100);
        assert_eq!(a.grade, Grade::A);

        let b = assess(&blank_report(), Utc::now());
        assert_eq!(b.score, 6); // source dimension only
        assert_eq!(b.grade, Grade::F);
    }

    #[test]
    fn assessment_is_deterministic() {
        let r = full_report();
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let a = assess(&r, now);
        let b = assess(&r, now);
        assert_eq!(a.score, b.score);
        assert_eq!(a.dimensions, b.dimensions);
        assert_eq!(a.grade, b.grade);
    }

    #[test]
    fn grade_is_monotonic_in_score() {
        let mut prev = Grade::from_score(0);
        for s in 0..=100u8 {
            let g = Grade::from_score(s);
            assert!(g >= prev, "grade dropped from {prev} to {g} at score {s}");
            prev = g;
        }
    }

    #[test]
    fn grade_cut_points() {
        assert_eq!(Grade::from_score(90), Grade::A);
        assert_eq!(Grade::from_score(89), Grade::B);
        assert_eq!(Grade::from_score(75), Grade::B);
        assert_eq!(Grade::from_score(74), Grade::C);
        assert_eq!(Grade::from_score(55), Grade::C);
        assert_eq!(Grade::from_score(54), Grade::D);
        assert_eq!(Grade::from_score(35), Grade::D);
        assert_eq!(Grade::from_score(34), Grade::F);
    }

    #[test]
    fn approximate_date_scores_below_precise() {
        let mut precise = blank_report();
        precise.event_at = Some(Utc::now());

        let mut approx = precise.clone();
        approx.event_date_approximate = true;

        let p = assess(&precise, Utc::now());
        let a = assess(&approx, Utc::now());
        assert!(p.dimensions.timing > a.dimensions.timing);
        assert!(a.dimensions.timing > 0);
    }

    #[test]
    fn coordinates_outscore_city_outscore_name() {
        let mut coords = blank_report();
        coords.latitude = Some(1.0);
        coords.longitude = Some(2.0);

        let mut city = blank_report();
        city.city = Some("Springfield".to_string());

        let mut name = blank_report();
        name.location_name = Some("the old mill".to_string());

        let c = assess(&coords, Utc::now()).dimensions.location;
        let t = assess(&city, Utc::now()).dimensions.location;
        let n = assess(&name, Utc::now()).dimensions.location;
        assert!(c > t && t > n && n > 0);
    }

    #[test]
    fn dimensions_stay_in_their_sub_ranges() {
        let a = assess(&full_report(), Utc::now());
        let d = a.dimensions;
        assert!(d.location <= 20);
        assert!(d.timing <= 15);
        assert!(d.witnesses <= 10);
        assert!(d.evidence <= 25);
        assert!(d.narrative <= 20);
        assert!(d.source <= 10);
    }

    #[test]
    fn version_is_stamped() {
        let a = assess(&blank_report(), Utc::now());
        assert_eq!(a.scorer_version, SCORER_VERSION);
    }
}
