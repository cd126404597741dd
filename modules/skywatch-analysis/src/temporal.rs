//! Rolling-baseline temporal anomaly detection.
//!
//! Reports are bucketed into fixed windows; each window in the trailing
//! baseline span is z-scored against the other windows in the span. A
//! zero-variance baseline (all-equal counts) yields no anomaly rather
//! than dividing by zero.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::snapshot::ReportSnapshot;

/// Fewer baseline windows than this and a z-score is meaningless.
const MIN_BASELINE_WINDOWS: usize = 4;

#[derive(Debug, Clone)]
pub struct TemporalParams {
    /// Bucket width in days.
    pub window_days: u32,
    /// Trailing span: how many windows form the rolling baseline.
    pub baseline_windows: usize,
    /// |z| at or above this flags an anomaly.
    pub z_threshold: f64,
}

impl Default for TemporalParams {
    fn default() -> Self {
        Self {
            window_days: 7,
            baseline_windows: 12,
            z_threshold: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemporalAnomalyHit {
    pub window_start: DateTime<Utc>,
    pub window_days: u32,
    pub count: u32,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub z_score: f64,
    pub report_ids: Vec<Uuid>,
}

/// Detect anomalous windows in the trailing baseline span.
pub fn detect_anomalies(snapshot: &ReportSnapshot, params: &TemporalParams) -> Vec<TemporalAnomalyHit> {
    let dated: Vec<(DateTime<Utc>, Uuid)> = snapshot
        .dated()
        .filter_map(|r| r.event_at.map(|d| (d, r.id)))
        .collect();
    let earliest = match dated.iter().map(|(d, _)| *d).min() {
        Some(d) => d,
        None => return Vec::new(),
    };
    let latest = dated.iter().map(|(d, _)| *d).max().expect("non-empty");

    // Windows are anchored at the earliest event so bucket edges never
    // shift as new reports arrive mid-window; the baseline span is the
    // trailing `baseline_windows` of them.
    let window = Duration::days(params.window_days as i64);
    let total_windows = ((latest - earliest).num_seconds() / window.num_seconds()) as usize + 1;
    let span_windows = params
        .baseline_windows
        .max(MIN_BASELINE_WINDOWS)
        .min(total_windows);
    let first_window = total_windows - span_windows;

    let mut buckets: Vec<Vec<Uuid>> = vec![Vec::new(); span_windows];
    for (date, id) in &dated {
        let idx = ((*date - earliest).num_seconds() / window.num_seconds()) as usize;
        if idx >= first_window {
            buckets[idx - first_window].push(*id);
        }
    }

    let counts: Vec<f64> = buckets.iter().map(|b| b.len() as f64).collect();
    let populated = counts.iter().filter(|c| **c > 0.0).count();
    if populated < MIN_BASELINE_WINDOWS {
        debug!(populated, "Too few populated windows for temporal baseline");
        return Vec::new();
    }

    let mut hits = Vec::new();
    for (idx, bucket) in buckets.iter().enumerate() {
        let others: Vec<f64> = counts
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != idx)
            .map(|(_, c)| *c)
            .collect();
        let n = others.len() as f64;
        let mean = others.iter().sum::<f64>() / n;
        let variance = others.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
        let stddev = variance.sqrt();
        if stddev == 0.0 {
            continue; // all-equal baseline: no anomaly, never a crash
        }

        let z = (counts[idx] - mean) / stddev;
        if z.abs() >= params.z_threshold {
            let window_start = earliest + window * (first_window + idx) as i32;
            hits.push(TemporalAnomalyHit {
                window_start,
                window_days: params.window_days,
                count: counts[idx] as u32,
                baseline_mean: mean,
                baseline_stddev: stddev,
                z_score: z,
                report_ids: bucket.clone(),
            });
        }
    }

    debug!(
        windows = span_windows,
        anomalies = hits.len(),
        threshold = params.z_threshold,
        "Temporal anomaly detection complete"
    );
    hits
}
