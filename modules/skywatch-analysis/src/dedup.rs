//! Two-pass duplicate detection.
//!
//! Pass 1 groups reports by content fingerprint — O(n), catches clean
//! re-submissions of the same event. Pass 2 runs a bounded fuzzy scan with
//! weighted per-field similarities. Only pairs above a minimum overall
//! score are emitted so the O(n²) pass cannot flood the match table.

use std::collections::HashMap;

use tracing::debug;

use skywatch_common::fingerprint::report_fingerprint;
use skywatch_common::{
    DuplicateMatch, MatchConfidence, MatchKind, MatchResolution, Report,
};

use crate::similarity::{
    ContentSimilarity, DateSimilarity, FieldSimilarity, LocationSimilarity, SimilarityWeights,
    TitleSimilarity,
};

#[derive(Debug, Clone)]
pub struct MatcherParams {
    pub weights: SimilarityWeights,
    /// Pairs below this overall score are not emitted.
    pub min_overall: f64,
    /// Description truncation for the content comparison.
    pub content_max_chars: usize,
    /// Upper bound on reports considered by the fuzzy pass per run.
    pub candidate_cap: usize,
}

impl Default for MatcherParams {
    fn default() -> Self {
        Self {
            weights: SimilarityWeights::default(),
            min_overall: 0.55,
            content_max_chars: 300,
            candidate_cap: 500,
        }
    }
}

pub struct DuplicateMatcher {
    params: MatcherParams,
    content: ContentSimilarity,
}

impl DuplicateMatcher {
    pub fn new(params: MatcherParams) -> Self {
        let content = ContentSimilarity {
            max_chars: params.content_max_chars,
        };
        Self { params, content }
    }

    /// Pass 1: exact fingerprint collisions. Every pair inside a collision
    /// group is a match. A group whose fingerprint was built without an
    /// event date is capped at High — the key has lower discriminating
    /// power there.
    pub fn exact_pass(&self, reports: &[Report]) -> Vec<DuplicateMatch> {
        // Always recompute: the fingerprint is a pure function of the
        // report's current title/date/location, and a stored value can lag
        // behind an edit until the next scoring pass.
        let mut groups: HashMap<String, Vec<&Report>> = HashMap::new();
        for report in reports {
            groups.entry(report_fingerprint(report)).or_default().push(report);
        }

        let mut matches = Vec::new();
        for group in groups.values().filter(|g| g.len() > 1) {
            for i in 0..group.len() {
                for j in (i + 1)..group.len() {
                    let (a, b) = (group[i], group[j]);
                    let confidence = if a.event_at.is_some() && b.event_at.is_some() {
                        MatchConfidence::Certain
                    } else {
                        MatchConfidence::High
                    };
                    matches.push(
                        DuplicateMatch {
                            report_a_id: a.id,
                            report_b_id: b.id,
                            title_similarity: 1.0,
                            location_similarity: 1.0,
                            date_similarity: 1.0,
                            content_similarity: self.content.score(a, b),
                            overall_score: 1.0,
                            confidence,
                            match_kind: MatchKind::ExactFingerprint,
                            resolution: MatchResolution::Pending,
                        }
                        .canonicalize(),
                    );
                }
            }
        }

        debug!(
            reports = reports.len(),
            matches = matches.len(),
            "Exact fingerprint pass complete"
        );
        matches
    }

    /// Pass 2: weighted fuzzy similarity over a bounded candidate set.
    /// Pairs that already collide on fingerprint are skipped — pass 1
    /// owns those.
    pub fn fuzzy_pass(&self, reports: &[Report]) -> Vec<DuplicateMatch> {
        let candidates: Vec<&Report> = reports.iter().take(self.params.candidate_cap).collect();
        let fingerprints: Vec<String> = candidates.iter().map(|r| report_fingerprint(r)).collect();

        let mut matches = Vec::new();
        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                if fingerprints[i] == fingerprints[j] {
                    continue;
                }
                if let Some(m) = self.score_pair(candidates[i], candidates[j]) {
                    matches.push(m);
                }
            }
        }

        debug!(
            candidates = candidates.len(),
            matches = matches.len(),
            floor = self.params.min_overall,
            "Fuzzy pass complete"
        );
        matches
    }

    /// Score one pair. Returns None below the overall-score floor.
    pub fn score_pair(&self, a: &Report, b: &Report) -> Option<DuplicateMatch> {
        let title = TitleSimilarity.score(a, b);

        // A report missing both date and location offers nothing but its
        // title to match on. False positives are costlier than misses here:
        // fall back to title-only and cap at Low.
        let bare = |r: &Report| r.event_at.is_none() && r.coords().is_none() && r.location_text().is_none();
        if bare(a) || bare(b) {
            if title < self.params.min_overall {
                return None;
            }
            return Some(
                DuplicateMatch {
                    report_a_id: a.id,
                    report_b_id: b.id,
                    title_similarity: title,
                    location_similarity: 0.0,
                    date_similarity: 0.0,
                    content_similarity: self.content.score(a, b),
                    overall_score: title,
                    confidence: MatchConfidence::Low,
                    match_kind: MatchKind::Fuzzy,
                    resolution: MatchResolution::Pending,
                }
                .canonicalize(),
            );
        }

        let location = LocationSimilarity.score(a, b);
        let date = DateSimilarity.score(a, b);
        let content = self.content.score(a, b);
        let overall = self.params.weights.combine(title, location, date, content);

        if overall < self.params.min_overall {
            return None;
        }

        Some(
            DuplicateMatch {
                report_a_id: a.id,
                report_b_id: b.id,
                title_similarity: title,
                location_similarity: location,
                date_similarity: date,
                content_similarity: content,
                overall_score: overall,
                confidence: confidence_bucket(overall),
                match_kind: MatchKind::Fuzzy,
                resolution: MatchResolution::Pending,
            }
            .canonicalize(),
        )
    }
}

/// Fixed thresholds mapping an overall score to a confidence bucket.
pub fn confidence_bucket(overall: f64) -> MatchConfidence {
    if overall >= 0.92 {
        MatchConfidence::Certain
    } else if overall >= 0.80 {
        MatchConfidence::High
    } else if overall >= 0.68 {
        MatchConfidence::Medium
    } else {
        MatchConfidence::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use skywatch_common::fixtures::blank_report;

    fn lake_report(location: &str) -> Report {
        let mut r = blank_report();
        r.title = "Strange Lights Over Lake X".to_string();
        r.event_at = Some(Utc.with_ymd_and_hms(2024, 8, 9, 21, 0, 0).unwrap());
        r.location_name = Some(location.to_string());
        r.description = "Three amber lights moved silently across the water.".to_string();
        r
    }

    #[test]
    fn punctuation_only_location_difference_groups_in_exact_pass() {
        let a = lake_report("Lake X, State Y");
        let b = lake_report("Lake X State Y");

        let matcher = DuplicateMatcher::new(MatcherParams::default());
        let matches = matcher.exact_pass(&[a.clone(), b.clone()]);

        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert!(m.is_canonical());
        assert_eq!(m.match_kind, MatchKind::ExactFingerprint);
        assert_eq!(m.confidence, MatchConfidence::Certain);
        assert_eq!(m.resolution, MatchResolution::Pending);
    }

    #[test]
    fn exact_collision_without_date_caps_at_high() {
        let mut a = lake_report("Lake X");
        let mut b = lake_report("Lake X");
        a.event_at = None;
        b.event_at = None;

        let matcher = DuplicateMatcher::new(MatcherParams::default());
        let matches = matcher.exact_pass(&[a, b]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].confidence, MatchConfidence::High);
    }

    #[test]
    fn missing_date_and_location_never_exceeds_low() {
        let mut a = blank_report();
        a.title = "Strange Lights Over Lake X".to_string();
        let mut b = blank_report();
        b.title = "Strange Lights Over Lake X".to_string();
        b.event_at = Some(Utc.with_ymd_and_hms(2024, 8, 9, 21, 0, 0).unwrap());
        b.location_name = Some("Lake X".to_string());

        let matcher = DuplicateMatcher::new(MatcherParams::default());
        let m = matcher
            .score_pair(&a, &b)
            .expect("identical titles should clear the floor");
        assert_eq!(m.confidence, MatchConfidence::Low);
        assert!((m.title_similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fuzzy_pass_emits_canonical_pairs_above_floor() {
        let mut a = lake_report("Lake X, State Y");
        let mut b = lake_report("Lake X State Y");
        // Different titles so fingerprints differ, but everything else close.
        a.title = "Strange Lights Over Lake X".to_string();
        b.title = "Odd lights seen above Lake X".to_string();
        b.event_at = Some(Utc.with_ymd_and_hms(2024, 8, 10, 21, 0, 0).unwrap());

        let matcher = DuplicateMatcher::new(MatcherParams::default());
        let matches = matcher.fuzzy_pass(&[a, b]);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].is_canonical());
        assert!(matches[0].overall_score >= 0.55);
        assert_eq!(matches[0].match_kind, MatchKind::Fuzzy);
    }

    #[test]
    fn unrelated_reports_fall_below_floor() {
        let mut a = blank_report();
        a.title = "Shadow figure in the orchard".to_string();
        a.location_name = Some("Orchard Lane".to_string());
        a.event_at = Some(Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).unwrap());
        a.description = "A tall figure stood between the apple trees.".to_string();

        let mut b = blank_report();
        b.title = "Humming noise under the bridge".to_string();
        b.location_name = Some("River Road".to_string());
        b.event_at = Some(Utc.with_ymd_and_hms(2024, 9, 15, 0, 0, 0).unwrap());
        b.description = "A low mechanical hum with no visible source.".to_string();

        let matcher = DuplicateMatcher::new(MatcherParams::default());
        assert!(matcher.score_pair(&a, &b).is_none());
    }

    #[test]
    fn candidate_cap_bounds_fuzzy_pass() {
        let reports: Vec<Report> = (0..10)
            .map(|i| {
                let mut r = lake_report("Lake X");
                r.title = format!("Sighting number {i}");
                r
            })
            .collect();

        let matcher = DuplicateMatcher::new(MatcherParams {
            candidate_cap: 3,
            min_overall: 0.0,
            ..MatcherParams::default()
        });
        let matches = matcher.fuzzy_pass(&reports);
        // 3 candidates → at most C(3,2) pairs.
        assert!(matches.len() <= 3);
    }

    #[test]
    fn confidence_buckets_are_monotonic() {
        assert_eq!(confidence_bucket(0.95), MatchConfidence::Certain);
        assert_eq!(confidence_bucket(0.85), MatchConfidence::High);
        assert_eq!(confidence_bucket(0.70), MatchConfidence::Medium);
        assert_eq!(confidence_bucket(0.60), MatchConfidence::Low);
    }
}
