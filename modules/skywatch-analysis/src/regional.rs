//! Regional density analysis.
//!
//! Each administrative region's share of the corpus is compared against an
//! expectation blending a population weight table and the region's own
//! historical baseline. Both weights change the ranking, so they are
//! echoed into every emitted hit and persisted with the pattern.

use std::collections::BTreeMap;

use tracing::debug;
use uuid::Uuid;

use skywatch_common::Report;

use crate::snapshot::ReportSnapshot;

#[derive(Debug, Clone)]
pub struct RegionalParams {
    /// Weight of the population share in the expected density.
    pub population_weight: f64,
    /// Weight of the region's historical share in the expected density.
    pub historical_weight: f64,
    /// Observed share must exceed expected share by this factor.
    pub concentration_ratio: f64,
    /// Regions with fewer reports than this are ignored.
    pub min_reports: u32,
    /// Population share per region key, summing to ~1. Regions absent
    /// here fall back to a uniform share.
    pub population_share: BTreeMap<String, f64>,
    /// Historical report share per region key (from prior corpus
    /// snapshots). Regions absent here fall back to a uniform share.
    pub historical_share: BTreeMap<String, f64>,
}

impl Default for RegionalParams {
    fn default() -> Self {
        Self {
            population_weight: 0.6,
            historical_weight: 0.4,
            concentration_ratio: 1.5,
            min_reports: 5,
            population_share: BTreeMap::new(),
            historical_share: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegionalHit {
    /// "country/state", falling back to country alone.
    pub region: String,
    pub report_count: u32,
    /// Observed share of the corpus.
    pub observed_density: f64,
    /// Expected share under the weighted population/historical blend.
    pub expected_density: f64,
    pub population_weight: f64,
    pub historical_weight: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub report_ids: Vec<Uuid>,
}

/// Region key for a report. Reports with no administrative region at all
/// are excluded from the analysis.
pub fn region_key(report: &Report) -> Option<String> {
    match (report.country.as_deref(), report.state.as_deref()) {
        (Some(country), Some(state)) => Some(format!("{country}/{state}")),
        (Some(country), None) => Some(country.to_string()),
        (None, Some(state)) => Some(state.to_string()),
        (None, None) => None,
    }
}

pub fn detect_regional(snapshot: &ReportSnapshot, params: &RegionalParams) -> Vec<RegionalHit> {
    let mut by_region: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
    for report in snapshot.all() {
        if let Some(key) = region_key(report) {
            by_region.entry(key).or_default().push(report.id);
        }
    }
    let total: usize = by_region.values().map(|v| v.len()).sum();
    if total == 0 {
        return Vec::new();
    }
    let region_count = by_region.len() as f64;
    let uniform = 1.0 / region_count;

    // Per-region count baseline for the effect-size stage.
    let counts: Vec<f64> = by_region.values().map(|v| v.len() as f64).collect();
    let baseline_mean = counts.iter().sum::<f64>() / region_count;
    let baseline_variance =
        counts.iter().map(|c| (c - baseline_mean).powi(2)).sum::<f64>() / region_count;
    let baseline_stddev = baseline_variance.sqrt();

    let mut hits = Vec::new();
    for (region, ids) in &by_region {
        let count = ids.len() as u32;
        if count < params.min_reports {
            continue;
        }
        let observed = ids.len() as f64 / total as f64;
        let population = params
            .population_share
            .get(region)
            .copied()
            .unwrap_or(uniform);
        let historical = params
            .historical_share
            .get(region)
            .copied()
            .unwrap_or(uniform);
        let expected =
            params.population_weight * population + params.historical_weight * historical;
        if expected <= 0.0 {
            continue;
        }

        if observed > expected * params.concentration_ratio {
            hits.push(RegionalHit {
                region: region.clone(),
                report_count: count,
                observed_density: observed,
                expected_density: expected,
                population_weight: params.population_weight,
                historical_weight: params.historical_weight,
                baseline_mean,
                baseline_stddev,
                report_ids: ids.clone(),
            });
        }
    }

    debug!(
        regions = by_region.len(),
        concentrated = hits.len(),
        "Regional density analysis complete"
    );
    hits
}
