//! The pattern detection pipeline.
//!
//! One run: snapshot → five detectors → confidence/significance stage →
//! identity resolution against stored patterns → status transitions →
//! idempotent upserts. Safe to re-run: a crashed run leaves previously
//! committed pattern rows intact, and re-detection updates rows in place
//! rather than duplicating them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use geohash::Coord;
use tracing::{info, warn};
use uuid::Uuid;

use skywatch_analysis::regional::detect_regional;
use skywatch_analysis::seasonal::detect_seasonal;
use skywatch_analysis::spatial::detect_clusters;
use skywatch_analysis::stats;
use skywatch_analysis::temporal::detect_anomalies;
use skywatch_analysis::wave::detect_waves;
use skywatch_analysis::{
    ClusterParams, RegionalParams, ReportSnapshot, SeasonalParams, TemporalParams, WaveParams,
};
use skywatch_common::{
    DetectedPattern, PatternDetails, PatternStatus, PatternType, Report,
};

use crate::traits::{PatternStore, ReportStore};

/// Current detector pipeline version, stamped onto every pattern so the
/// narrative cache downstream can detect staleness.
pub const DETECTOR_VERSION: &str = "v2";

/// Geohash precision for spatial pattern identity keys.
const KEY_GEOHASH_PRECISION: usize = 4;

/// Pattern types this pipeline produces. Stored rows of other types (from
/// future detectors) are never decayed by this orchestrator.
const PRODUCED_TYPES: [PatternType; 5] = [
    PatternType::GeographicCluster,
    PatternType::TemporalAnomaly,
    PatternType::SeasonalPattern,
    PatternType::RegionalConcentration,
    PatternType::FlapWave,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Entire history.
    Full,
    /// Only patterns touched by reports added/changed since the last
    /// successful run are refreshed. Detectors still see the full
    /// snapshot — baselines need history.
    Incremental,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Full => write!(f, "full"),
            RunMode::Incremental => write!(f, "incremental"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectorParams {
    pub spatial: ClusterParams,
    pub temporal: TemporalParams,
    pub seasonal: SeasonalParams,
    pub regional: RegionalParams,
    pub wave: WaveParams,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub snapshot_size: usize,
    pub detected: u32,
    pub updated: u32,
    pub decayed: u32,
    pub errored: u32,
    pub succeeded: bool,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Pattern Run Complete ===")?;
        writeln!(f, "Mode:      {}", self.mode)?;
        writeln!(f, "Snapshot:  {} reports", self.snapshot_size)?;
        writeln!(f, "Detected:  {}", self.detected)?;
        writeln!(f, "Updated:   {}", self.updated)?;
        writeln!(f, "Decayed:   {}", self.decayed)?;
        writeln!(f, "Errored:   {}", self.errored)?;
        writeln!(f, "Duration:  {}ms", self.duration_ms)?;
        Ok(())
    }
}

pub struct PatternOrchestrator<'a> {
    reports: &'a dyn ReportStore,
    patterns: &'a dyn PatternStore,
    params: DetectorParams,
}

impl<'a> PatternOrchestrator<'a> {
    pub fn new(
        reports: &'a dyn ReportStore,
        patterns: &'a dyn PatternStore,
        params: DetectorParams,
    ) -> Self {
        Self {
            reports,
            patterns,
            params,
        }
    }

    pub async fn run(&self, mode: RunMode) -> Result<RunSummary> {
        let started_at = Utc::now();
        let t0 = Instant::now();

        let since = match mode {
            RunMode::Incremental => self.patterns.last_successful_run().await?,
            RunMode::Full => None,
        };

        let all = self.reports.snapshot(None).await?;
        let snapshot_size = all.len();

        // Incremental runs gate on the changed set; a first-ever
        // incremental run has no watermark and behaves like a full one.
        let changed_ids: Option<HashSet<Uuid>> = match (mode, since) {
            (RunMode::Incremental, Some(ts)) => Some(
                self.reports
                    .snapshot(Some(ts))
                    .await?
                    .iter()
                    .map(|r| r.id)
                    .collect(),
            ),
            _ => None,
        };

        let snapshot = ReportSnapshot::new(all, started_at);
        let lookup: HashMap<Uuid, &Report> =
            snapshot.all().iter().map(|r| (r.id, r)).collect();

        let mut drafts: Vec<PatternDraft> = Vec::new();
        drafts.extend(spatial_drafts(&snapshot, &self.params.spatial));
        drafts.extend(temporal_drafts(&snapshot, &self.params.temporal));
        drafts.extend(seasonal_drafts(&snapshot, &self.params.seasonal));
        drafts.extend(regional_drafts(&snapshot, &self.params.regional));
        drafts.extend(wave_drafts(&snapshot, &self.params.wave));

        if let Some(changed) = &changed_ids {
            drafts.retain(|d| d.report_ids.iter().any(|id| changed.contains(id)));
        }

        let candidates: Vec<DetectedPattern> = drafts
            .into_iter()
            .map(|d| finalize(d, &lookup, started_at))
            .collect();

        let existing = self.patterns.all_patterns().await?;
        let mut matched_ids: HashSet<Uuid> = HashSet::new();
        let mut detected = 0u32;
        let mut updated = 0u32;
        let mut errored = 0u32;

        for candidate in candidates {
            let merged = resolve_identity(candidate, &existing);
            let is_update = existing.iter().any(|p| p.id == merged.id);
            if is_update {
                matched_ids.insert(merged.id);
            }
            match self.patterns.upsert_pattern(&merged).await {
                Ok(()) => {
                    if is_update {
                        updated += 1;
                    } else {
                        detected += 1;
                    }
                }
                Err(e) => {
                    errored += 1;
                    warn!(stable_key = %merged.stable_key, error = %e, "Failed to upsert pattern");
                }
            }
        }

        // Decay pass: stored patterns this pipeline owns that no longer
        // meet their detector's thresholds. Only a full run can tell —
        // an incremental run simply didn't look everywhere.
        let mut decayed = 0u32;
        if mode == RunMode::Full {
            for pattern in &existing {
                if !PRODUCED_TYPES.contains(&pattern.pattern_type)
                    || pattern.status == PatternStatus::Decayed
                    || matched_ids.contains(&pattern.id)
                {
                    continue;
                }
                let mut gone = pattern.clone();
                gone.status = PatternStatus::Decayed;
                gone.consecutive_runs = 0;
                match self.patterns.upsert_pattern(&gone).await {
                    Ok(()) => decayed += 1,
                    Err(e) => {
                        errored += 1;
                        warn!(stable_key = %gone.stable_key, error = %e, "Failed to decay pattern");
                    }
                }
            }
        }

        let summary = RunSummary {
            mode,
            started_at,
            duration_ms: t0.elapsed().as_millis() as u64,
            snapshot_size,
            detected,
            updated,
            decayed,
            errored,
            succeeded: true,
        };
        self.patterns.record_run(&summary).await?;

        info!(
            mode = %summary.mode,
            snapshot = summary.snapshot_size,
            detected = summary.detected,
            updated = summary.updated,
            decayed = summary.decayed,
            errored = summary.errored,
            "Pattern run complete"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Identity resolution and status lifecycle
// ---------------------------------------------------------------------------

/// Merge a freshly detected candidate with its stored counterpart, if one
/// exists. Spatial patterns whose membership overlaps an existing cluster
/// by a supermajority keep the earlier pattern's id and key.
fn resolve_identity(mut candidate: DetectedPattern, existing: &[DetectedPattern]) -> DetectedPattern {
    let matched = existing
        .iter()
        .find(|p| {
            p.pattern_type == candidate.pattern_type && p.stable_key == candidate.stable_key
        })
        .or_else(|| {
            if candidate.pattern_type != PatternType::GeographicCluster {
                return None;
            }
            existing
                .iter()
                .filter(|p| p.pattern_type == PatternType::GeographicCluster)
                .find(|p| supermajority_overlap(&p.report_ids, &candidate.report_ids))
        });

    if let Some(old) = matched {
        candidate.id = old.id;
        candidate.stable_key = old.stable_key.clone();
        candidate.first_detected_at = old.first_detected_at;
        candidate.consecutive_runs = if old.status == PatternStatus::Decayed {
            1
        } else {
            old.consecutive_runs + 1
        };
        candidate.status = next_status(old.status, candidate.consecutive_runs);
    }
    candidate
}

/// |old ∩ new| / |old| >= 2/3.
fn supermajority_overlap(old: &[Uuid], new: &[Uuid]) -> bool {
    if old.is_empty() {
        return false;
    }
    let new_set: HashSet<&Uuid> = new.iter().collect();
    let intersection = old.iter().filter(|id| new_set.contains(id)).count();
    intersection * 3 >= old.len() * 2
}

/// emerging → active once thresholds hold across two consecutive runs;
/// a decayed pattern that re-meets thresholds starts over as emerging.
fn next_status(previous: PatternStatus, consecutive_runs: u32) -> PatternStatus {
    match previous {
        PatternStatus::Decayed => PatternStatus::Emerging,
        PatternStatus::Active => PatternStatus::Active,
        PatternStatus::Emerging if consecutive_runs >= 2 => PatternStatus::Active,
        PatternStatus::Emerging => PatternStatus::Emerging,
    }
}

// ---------------------------------------------------------------------------
// Draft construction — detector output plus the numbers the confidence
// stage needs, before the shared finalize step
// ---------------------------------------------------------------------------

struct PatternDraft {
    pattern_type: PatternType,
    stable_key: String,
    report_ids: Vec<Uuid>,
    raw_confidence: f64,
    deviation: f64,
    observed: f64,
    baseline_mean: f64,
    baseline_stddev: f64,
    center: Option<(f64, f64)>,
    radius_km: Option<f64>,
    category_mix: Option<BTreeMap<String, u32>>,
    details: PatternDetails,
}

fn spatial_drafts(snapshot: &ReportSnapshot, params: &ClusterParams) -> Vec<PatternDraft> {
    detect_clusters(snapshot, params)
        .into_iter()
        .map(|c| {
            let cell = geohash::encode(
                Coord {
                    x: c.centroid_lng,
                    y: c.centroid_lat,
                },
                KEY_GEOHASH_PRECISION,
            )
            .unwrap_or_default();
            let size = c.member_ids.len() as f64;
            PatternDraft {
                pattern_type: PatternType::GeographicCluster,
                stable_key: format!("geographic_cluster:{cell}"),
                raw_confidence: size / (params.min_points as f64 * 4.0),
                deviation: deviation_from(size, c.baseline_mean, c.baseline_stddev),
                observed: size,
                baseline_mean: c.baseline_mean,
                baseline_stddev: c.baseline_stddev,
                center: Some((c.centroid_lat, c.centroid_lng)),
                radius_km: Some(c.radius_km),
                category_mix: Some(c.category_mix),
                details: PatternDetails::GeographicCluster {
                    radius_km_param: params.radius_km,
                    min_points_param: params.min_points,
                },
                report_ids: c.member_ids,
            }
        })
        .collect()
}

fn temporal_drafts(snapshot: &ReportSnapshot, params: &TemporalParams) -> Vec<PatternDraft> {
    detect_anomalies(snapshot, params)
        .into_iter()
        .map(|hit| PatternDraft {
            pattern_type: PatternType::TemporalAnomaly,
            stable_key: format!("temporal_anomaly:{}", hit.window_start.date_naive()),
            raw_confidence: hit.z_score.abs() / 4.0,
            deviation: hit.z_score,
            observed: hit.count as f64,
            baseline_mean: hit.baseline_mean,
            baseline_stddev: hit.baseline_stddev,
            center: None,
            radius_km: None,
            category_mix: None,
            details: PatternDetails::TemporalAnomaly {
                window_start: hit.window_start,
                window_days: hit.window_days,
                observed: hit.count,
                baseline_mean: hit.baseline_mean,
                baseline_stddev: hit.baseline_stddev,
                z_score: hit.z_score,
            },
            report_ids: hit.report_ids,
        })
        .collect()
}

fn seasonal_drafts(snapshot: &ReportSnapshot, params: &SeasonalParams) -> Vec<PatternDraft> {
    detect_seasonal(snapshot, params)
        .into_iter()
        .map(|hit| PatternDraft {
            pattern_type: PatternType::SeasonalPattern,
            stable_key: format!("seasonal_pattern:{:02}", hit.month),
            raw_confidence: (hit.deviation_ratio - 1.0) / 2.0,
            deviation: hit.deviation_ratio,
            observed: hit.monthly_avg,
            baseline_mean: hit.yearly_mean,
            baseline_stddev: hit.baseline_stddev,
            center: None,
            radius_km: None,
            category_mix: None,
            details: PatternDetails::SeasonalPattern {
                month: hit.month,
                monthly_avg: hit.monthly_avg,
                yearly_mean: hit.yearly_mean,
                deviation_ratio: hit.deviation_ratio,
                years_observed: hit.years_observed,
            },
            report_ids: hit.report_ids,
        })
        .collect()
}

fn regional_drafts(snapshot: &ReportSnapshot, params: &RegionalParams) -> Vec<PatternDraft> {
    detect_regional(snapshot, params)
        .into_iter()
        .map(|hit| PatternDraft {
            pattern_type: PatternType::RegionalConcentration,
            stable_key: format!("regional_concentration:{}", hit.region),
            raw_confidence: hit.observed_density / (hit.expected_density * 3.0),
            deviation: hit.observed_density / hit.expected_density,
            observed: hit.report_count as f64,
            baseline_mean: hit.baseline_mean,
            baseline_stddev: hit.baseline_stddev,
            center: None,
            radius_km: None,
            category_mix: None,
            details: PatternDetails::RegionalConcentration {
                region: hit.region,
                observed_density: hit.observed_density,
                expected_density: hit.expected_density,
                population_weight: hit.population_weight,
                historical_weight: hit.historical_weight,
            },
            report_ids: hit.report_ids,
        })
        .collect()
}

fn wave_drafts(snapshot: &ReportSnapshot, params: &WaveParams) -> Vec<PatternDraft> {
    detect_waves(snapshot, params)
        .into_iter()
        .map(|hit| {
            let first = &hit.path[0];
            let last = &hit.path[hit.path.len() - 1];
            let cell = geohash::encode(
                Coord {
                    x: first.lng,
                    y: first.lat,
                },
                KEY_GEOHASH_PRECISION,
            )
            .unwrap_or_default();
            let avg_slice_count = hit.path.iter().map(|p| p.report_count as f64).sum::<f64>()
                / hit.path.len() as f64;
            PatternDraft {
                pattern_type: PatternType::FlapWave,
                stable_key: format!(
                    "flap_wave:{}:{cell}",
                    first.slice_start.date_naive()
                ),
                raw_confidence: hit.path.len() as f64 / 6.0,
                deviation: deviation_from(avg_slice_count, hit.baseline_mean, hit.baseline_stddev),
                observed: avg_slice_count,
                baseline_mean: hit.baseline_mean,
                baseline_stddev: hit.baseline_stddev,
                center: Some((last.lat, last.lng)),
                radius_km: None,
                category_mix: None,
                details: PatternDetails::FlapWave {
                    slice_days: hit.slice_days,
                    max_km_per_day: hit.max_km_per_day,
                    path: hit.path,
                    total_distance_km: hit.total_distance_km,
                    speed_km_per_day: hit.speed_km_per_day,
                },
                report_ids: hit.report_ids,
            }
        })
        .collect()
}

fn deviation_from(observed: f64, mean: f64, stddev: f64) -> f64 {
    if stddev == 0.0 {
        0.0
    } else {
        (observed - mean) / stddev
    }
}

// ---------------------------------------------------------------------------
// The shared confidence/significance stage
// ---------------------------------------------------------------------------

fn finalize(
    draft: PatternDraft,
    lookup: &HashMap<Uuid, &Report>,
    now: DateTime<Utc>,
) -> DetectedPattern {
    let members: Vec<&Report> = draft
        .report_ids
        .iter()
        .filter_map(|id| lookup.get(id).copied())
        .collect();
    let report_count = draft.report_ids.len() as u32;

    let category_mix = draft.category_mix.unwrap_or_else(|| {
        let mut mix: BTreeMap<String, u32> = BTreeMap::new();
        for r in &members {
            *mix.entry(r.category.to_string()).or_insert(0) += 1;
        }
        mix
    });

    let phenomenon_diversity = members
        .iter()
        .flat_map(|r| r.tags.iter())
        .collect::<HashSet<_>>()
        .len() as u32;

    let dates: Vec<DateTime<Utc>> = members.iter().filter_map(|r| r.event_at).collect();
    let span_days = match (dates.iter().min(), dates.iter().max()) {
        (Some(first), Some(last)) => Some((*last - *first).num_days()),
        _ => None,
    };

    let has_precise_location =
        draft.center.is_some() || members.iter().any(|r| r.coords().is_some());

    let confidence = draft.raw_confidence.clamp(0.05, 0.99);
    let interval = stats::wilson_interval(confidence, report_count, stats::CONFIDENCE_Z);
    let (low, high) = interval
        .map(|w| (w.low, w.high))
        .unwrap_or((confidence, confidence));

    let significance = stats::significance_score(
        report_count,
        category_mix.len() as u32,
        phenomenon_diversity,
        draft.deviation,
    );
    let effect_size = stats::cohens_d(draft.observed, draft.baseline_mean, draft.baseline_stddev);
    let quality_flags = stats::quality_flags(
        report_count,
        span_days,
        category_mix.len() as u32,
        has_precise_location,
    );

    DetectedPattern {
        id: Uuid::new_v4(),
        pattern_type: draft.pattern_type,
        status: PatternStatus::Emerging,
        stable_key: draft.stable_key,
        report_count,
        report_ids: draft.report_ids,
        confidence_score: confidence,
        confidence_low: low,
        confidence_high: high,
        significance_score: significance,
        effect_size,
        effect_magnitude: stats::effect_magnitude(effect_size),
        center_lat: draft.center.map(|(lat, _)| lat),
        center_lng: draft.center.map(|(_, lng)| lng),
        radius_km: draft.radius_km,
        category_mix,
        quality_flags,
        details: draft.details,
        detector_version: DETECTOR_VERSION.to_string(),
        first_detected_at: now,
        last_seen_at: now,
        consecutive_runs: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_requires_two_consecutive_runs_for_active() {
        assert_eq!(next_status(PatternStatus::Emerging, 1), PatternStatus::Emerging);
        assert_eq!(next_status(PatternStatus::Emerging, 2), PatternStatus::Active);
        assert_eq!(next_status(PatternStatus::Active, 7), PatternStatus::Active);
        assert_eq!(next_status(PatternStatus::Decayed, 1), PatternStatus::Emerging);
    }

    #[test]
    fn supermajority_needs_two_thirds_of_old_members() {
        let ids: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        // 4 of 6 = 2/3 exactly.
        assert!(supermajority_overlap(&ids, &ids[0..4].to_vec()));
        // 3 of 6 < 2/3.
        assert!(!supermajority_overlap(&ids, &ids[0..3].to_vec()));
        assert!(!supermajority_overlap(&[], &ids));
    }
}
