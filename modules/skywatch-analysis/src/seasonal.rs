//! Seasonal (calendar-month) pattern detection.
//!
//! Each month's average report count is compared against the all-month
//! mean; months exceeding a variance-based threshold are flagged. Fewer
//! than `min_years` of history yields no pattern at all — not a
//! low-confidence one.

use std::collections::BTreeSet;

use chrono::Datelike;
use tracing::debug;
use uuid::Uuid;

use crate::snapshot::ReportSnapshot;

#[derive(Debug, Clone)]
pub struct SeasonalParams {
    /// Minimum distinct calendar years of data required.
    pub min_years: u32,
    /// A month flags when its average exceeds the all-month mean by this
    /// many standard deviations of the monthly averages.
    pub deviation_stddevs: f64,
}

impl Default for SeasonalParams {
    fn default() -> Self {
        Self {
            min_years: 3,
            deviation_stddevs: 1.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeasonalHit {
    /// 1-12.
    pub month: u32,
    pub monthly_avg: f64,
    pub yearly_mean: f64,
    /// monthly_avg / yearly_mean.
    pub deviation_ratio: f64,
    pub years_observed: u32,
    pub baseline_stddev: f64,
    pub report_ids: Vec<Uuid>,
}

pub fn detect_seasonal(snapshot: &ReportSnapshot, params: &SeasonalParams) -> Vec<SeasonalHit> {
    let years: BTreeSet<i32> = snapshot
        .dated()
        .filter_map(|r| r.event_at.map(|d| d.year()))
        .collect();
    let years_observed = years.len() as u32;
    if years_observed < params.min_years {
        debug!(
            years = years_observed,
            min_years = params.min_years,
            "Insufficient history for seasonal detection"
        );
        return Vec::new();
    }

    let mut month_ids: Vec<Vec<Uuid>> = vec![Vec::new(); 12];
    for r in snapshot.dated() {
        if let Some(d) = r.event_at {
            month_ids[(d.month() - 1) as usize].push(r.id);
        }
    }

    let monthly_avgs: Vec<f64> = month_ids
        .iter()
        .map(|ids| ids.len() as f64 / years_observed as f64)
        .collect();
    let yearly_mean = monthly_avgs.iter().sum::<f64>() / 12.0;
    if yearly_mean == 0.0 {
        return Vec::new();
    }
    let variance = monthly_avgs
        .iter()
        .map(|a| (a - yearly_mean).powi(2))
        .sum::<f64>()
        / 12.0;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        return Vec::new(); // perfectly flat year: nothing seasonal
    }

    let hits: Vec<SeasonalHit> = monthly_avgs
        .iter()
        .enumerate()
        .filter(|(_, avg)| **avg > yearly_mean + params.deviation_stddevs * stddev)
        .map(|(idx, avg)| SeasonalHit {
            month: idx as u32 + 1,
            monthly_avg: *avg,
            yearly_mean,
            deviation_ratio: *avg / yearly_mean,
            years_observed,
            baseline_stddev: stddev,
            report_ids: month_ids[idx].clone(),
        })
        .collect();

    debug!(
        years = years_observed,
        flagged_months = hits.len(),
        "Seasonal detection complete"
    );
    hits
}
