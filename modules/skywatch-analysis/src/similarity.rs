//! Per-field similarity primitives for the duplicate matcher.
//!
//! Each field type scores behind the same narrow interface so the
//! weighting/combination logic in `dedup` is independent of the specific
//! string or geo algorithm chosen.

use skywatch_common::fingerprint::normalize;
use skywatch_common::{haversine_km, Report};

/// Two coordinates within this distance score a full 1.0.
const LOCATION_EXACT_KM: f64 = 1.0;

/// Coordinate similarity decays linearly to 0 at this distance.
const LOCATION_FAR_KM: f64 = 50.0;

/// Date similarity decays linearly to 0 at this day distance.
const DATE_FAR_DAYS: f64 = 30.0;

/// A field-level similarity score in [0, 1] over a report pair.
pub trait FieldSimilarity {
    fn score(&self, a: &Report, b: &Report) -> f64;
}

/// Jaro-Winkler over normalized titles.
pub struct TitleSimilarity;

impl FieldSimilarity for TitleSimilarity {
    fn score(&self, a: &Report, b: &Report) -> f64 {
        let na = normalize(&a.title);
        let nb = normalize(&b.title);
        if na.is_empty() || nb.is_empty() {
            return 0.0;
        }
        strsim::jaro_winkler(&na, &nb)
    }
}

/// Coordinate proximity when both reports are geocoded, string closeness on
/// the location text otherwise.
pub struct LocationSimilarity;

impl FieldSimilarity for LocationSimilarity {
    fn score(&self, a: &Report, b: &Report) -> f64 {
        if let (Some((lat_a, lng_a)), Some((lat_b, lng_b))) = (a.coords(), b.coords()) {
            let km = haversine_km(lat_a, lng_a, lat_b, lng_b);
            if km <= LOCATION_EXACT_KM {
                return 1.0;
            }
            return (1.0 - (km - LOCATION_EXACT_KM) / (LOCATION_FAR_KM - LOCATION_EXACT_KM))
                .clamp(0.0, 1.0);
        }

        match (a.location_text(), b.location_text()) {
            (Some(la), Some(lb)) => {
                let na = normalize(&la);
                let nb = normalize(&lb);
                if na.is_empty() || nb.is_empty() {
                    0.0
                } else {
                    strsim::jaro_winkler(&na, &nb)
                }
            }
            _ => 0.0,
        }
    }
}

/// Exact event day scores 1.0, decaying with day distance, 0 beyond the cap.
pub struct DateSimilarity;

impl FieldSimilarity for DateSimilarity {
    fn score(&self, a: &Report, b: &Report) -> f64 {
        match (a.event_at, b.event_at) {
            (Some(da), Some(db)) => {
                let days = (da.date_naive() - db.date_naive()).num_days().unsigned_abs() as f64;
                (1.0 - days / DATE_FAR_DAYS).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }
}

/// Normalized Levenshtein over descriptions truncated to `max_chars`.
/// The cap bounds the O(len²) edit-distance cost per pair.
pub struct ContentSimilarity {
    pub max_chars: usize,
}

impl Default for ContentSimilarity {
    fn default() -> Self {
        Self { max_chars: 300 }
    }
}

impl FieldSimilarity for ContentSimilarity {
    fn score(&self, a: &Report, b: &Report) -> f64 {
        let ca = truncated(&a.description, self.max_chars);
        let cb = truncated(&b.description, self.max_chars);
        if ca.is_empty() || cb.is_empty() {
            return 0.0;
        }
        strsim::normalized_levenshtein(&ca, &cb)
    }
}

fn truncated(text: &str, max_chars: usize) -> String {
    normalize(text).chars().take(max_chars).collect()
}

/// Fixed weights combining the four field scores into an overall score.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityWeights {
    pub title: f64,
    pub location: f64,
    pub date: f64,
    pub content: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            title: 0.35,
            location: 0.25,
            date: 0.20,
            content: 0.20,
        }
    }
}

impl SimilarityWeights {
    pub fn combine(&self, title: f64, location: f64, date: f64, content: f64) -> f64 {
        (self.title * title + self.location * location + self.date * date + self.content * content)
            .clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use skywatch_common::fixtures::blank_report;

    #[test]
    fn identical_titles_score_one() {
        let mut a = blank_report();
        a.title = "Strange Lights Over Lake X".to_string();
        let mut b = blank_report();
        b.title = "strange lights over lake x!".to_string();
        let s = TitleSimilarity.score(&a, &b);
        assert!((s - 1.0).abs() < 1e-9, "normalized identical titles, got {s}");
    }

    #[test]
    fn nearby_coordinates_score_high_distant_low() {
        let mut a = blank_report();
        a.latitude = Some(44.97);
        a.longitude = Some(-93.26);
        let mut b = a.clone();
        b.latitude = Some(44.975); // a few hundred meters

        let near = LocationSimilarity.score(&a, &b);
        assert!((near - 1.0).abs() < 1e-9);

        b.latitude = Some(46.0); // >100km
        let far = LocationSimilarity.score(&a, &b);
        assert_eq!(far, 0.0);
    }

    #[test]
    fn location_falls_back_to_text_without_coords() {
        let mut a = blank_report();
        a.location_name = Some("Lake X, State Y".to_string());
        let mut b = blank_report();
        b.location_name = Some("Lake X State Y".to_string());
        let s = LocationSimilarity.score(&a, &b);
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn date_similarity_decays_with_day_distance() {
        let mut a = blank_report();
        a.event_at = Some(Utc.with_ymd_and_hms(2024, 8, 9, 20, 0, 0).unwrap());
        let mut b = blank_report();
        b.event_at = Some(Utc.with_ymd_and_hms(2024, 8, 9, 2, 0, 0).unwrap());
        assert!((DateSimilarity.score(&a, &b) - 1.0).abs() < 1e-9);

        b.event_at = Some(Utc.with_ymd_and_hms(2024, 8, 24, 2, 0, 0).unwrap());
        let mid = DateSimilarity.score(&a, &b);
        assert!(mid > 0.4 && mid < 0.6, "15 days out should be ~0.5, got {mid}");

        b.event_at = Some(Utc.with_ymd_and_hms(2024, 10, 9, 2, 0, 0).unwrap());
        assert_eq!(DateSimilarity.score(&a, &b), 0.0);

        b.event_at = None;
        assert_eq!(DateSimilarity.score(&a, &b), 0.0);
    }

    #[test]
    fn content_cap_bounds_comparison() {
        let mut a = blank_report();
        a.description = "a shimmering object hovered over the treeline ".repeat(50);
        let mut b = blank_report();
        // Same prefix, wildly different tail — capped comparison still matches.
        b.description = format!(
            "{}{}",
            "a shimmering object hovered over the treeline ".repeat(20),
            "entirely different ending text ".repeat(100)
        );
        let s = ContentSimilarity::default().score(&a, &b);
        assert!(s > 0.95, "capped prefixes should match, got {s}");
    }

    #[test]
    fn weights_combine_to_bounded_score() {
        let w = SimilarityWeights::default();
        assert!((w.combine(1.0, 1.0, 1.0, 1.0) - 1.0).abs() < 1e-9);
        assert_eq!(w.combine(0.0, 0.0, 0.0, 0.0), 0.0);
        let s = w.combine(1.0, 0.0, 1.0, 0.0);
        assert!((s - 0.55).abs() < 1e-9);
    }
}
