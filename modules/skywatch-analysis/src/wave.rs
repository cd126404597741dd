//! Flap-wave detection: spatial clusters whose centroids migrate across
//! consecutive time slices within a bounded propagation distance.
//!
//! Wave candidacy requires precise, non-null event dates — a report that
//! can only say "sometime last summer" cannot anchor a moving front.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use skywatch_common::{haversine_km, Report, WavePoint};

use crate::snapshot::ReportSnapshot;
use crate::spatial::{cluster_points, ClusterParams, SpatialCluster};

#[derive(Debug, Clone)]
pub struct WaveParams {
    /// Width of one time slice in days.
    pub slice_days: u32,
    /// Trailing window searched for waves, in days.
    pub window_days: u32,
    /// Maximum centroid propagation speed. The original system names this
    /// parameter in km/day without a value; 80 km/day is the documented
    /// default here and every emitted wave records the value used.
    pub max_km_per_day: f64,
    /// Minimum chained slices for a wave.
    pub min_slices: usize,
    /// Per-slice clustering parameters (smaller min_points than the
    /// standalone spatial detector — slices are thin).
    pub cluster: ClusterParams,
}

impl Default for WaveParams {
    fn default() -> Self {
        Self {
            slice_days: 7,
            window_days: 90,
            max_km_per_day: 80.0,
            min_slices: 3,
            cluster: ClusterParams {
                radius_km: 50.0,
                min_points: 3,
                window: None,
                categories: None,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct WaveHit {
    pub path: Vec<WavePoint>,
    pub report_ids: Vec<Uuid>,
    pub total_distance_km: f64,
    pub speed_km_per_day: f64,
    pub slice_days: u32,
    pub max_km_per_day: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
}

pub fn detect_waves(snapshot: &ReportSnapshot, params: &WaveParams) -> Vec<WaveHit> {
    let eligible: Vec<&Report> = snapshot
        .precisely_dated()
        .filter(|r| r.coords().is_some())
        .collect();
    let latest = match eligible.iter().filter_map(|r| r.precise_event_at()).max() {
        Some(d) => d,
        None => return Vec::new(),
    };

    let slice = Duration::days(params.slice_days as i64);
    let slice_count = (params.window_days / params.slice_days).max(1) as usize;
    let window_start = latest - slice * slice_count as i32 + Duration::seconds(1);

    // Cluster each slice independently.
    let mut slices: Vec<(DateTime<Utc>, Vec<SpatialCluster>)> = Vec::with_capacity(slice_count);
    for idx in 0..slice_count {
        let start = window_start + slice * idx as i32;
        let end = start + slice;
        let members: Vec<&Report> = eligible
            .iter()
            .filter(|r| {
                r.precise_event_at()
                    .map(|d| d >= start && d < end)
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        let clusters = cluster_points(&members, &params.cluster);
        slices.push((start, clusters));
    }

    // Per-slice eligible counts form the baseline for the effect stage.
    let slice_counts: Vec<f64> = slices
        .iter()
        .map(|(start, _)| {
            let end = *start + slice;
            eligible
                .iter()
                .filter(|r| {
                    r.precise_event_at()
                        .map(|d| d >= *start && d < end)
                        .unwrap_or(false)
                })
                .count() as f64
        })
        .collect();
    let n = slice_counts.len() as f64;
    let baseline_mean = slice_counts.iter().sum::<f64>() / n;
    let baseline_variance =
        slice_counts.iter().map(|c| (c - baseline_mean).powi(2)).sum::<f64>() / n;
    let baseline_stddev = baseline_variance.sqrt();

    // Greedy chaining: a chain ending in slice i-1 extends into slice i when
    // a cluster's centroid lies within the propagation bound. Each cluster
    // joins at most one chain.
    let max_leg_km = params.max_km_per_day * params.slice_days as f64;
    let mut chains: Vec<Chain> = Vec::new();

    for (slice_idx, (start, clusters)) in slices.iter().enumerate() {
        for cluster in clusters {
            let point = WavePoint {
                lat: cluster.centroid_lat,
                lng: cluster.centroid_lng,
                slice_start: *start,
                report_count: cluster.member_ids.len() as u32,
            };

            let extended = chains.iter_mut().find(|chain| {
                chain.last_slice + 1 == slice_idx
                    && haversine_km(
                        chain.path.last().expect("chains are never empty").lat,
                        chain.path.last().expect("chains are never empty").lng,
                        point.lat,
                        point.lng,
                    ) <= max_leg_km
            });

            match extended {
                Some(chain) => {
                    chain.last_slice = slice_idx;
                    chain.path.push(point);
                    chain.report_ids.extend(cluster.member_ids.iter().copied());
                }
                None => chains.push(Chain {
                    last_slice: slice_idx,
                    path: vec![point],
                    report_ids: cluster.member_ids.clone(),
                }),
            }
        }
    }

    let hits: Vec<WaveHit> = chains
        .into_iter()
        .filter(|chain| chain.path.len() >= params.min_slices)
        .map(|chain| {
            let total_distance_km: f64 = chain
                .path
                .windows(2)
                .map(|w| haversine_km(w[0].lat, w[0].lng, w[1].lat, w[1].lng))
                .sum();
            let duration_days = ((chain.path.len() - 1) as f64) * params.slice_days as f64;
            let speed_km_per_day = if duration_days > 0.0 {
                total_distance_km / duration_days
            } else {
                0.0
            };
            WaveHit {
                path: chain.path,
                report_ids: chain.report_ids,
                total_distance_km,
                speed_km_per_day,
                slice_days: params.slice_days,
                max_km_per_day: params.max_km_per_day,
                baseline_mean,
                baseline_stddev,
            }
        })
        .collect();

    debug!(
        slices = slice_count,
        waves = hits.len(),
        max_km_per_day = params.max_km_per_day,
        "Wave detection complete"
    );
    hits
}

struct Chain {
    last_slice: usize,
    path: Vec<WavePoint>,
    report_ids: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use skywatch_common::fixtures::report_at;

    /// A burst of `count` reports around (lat, lng) in the week starting at `start`.
    fn burst(lat: f64, lng: f64, start: DateTime<Utc>, count: usize) -> Vec<Report> {
        (0..count)
            .map(|i| {
                report_at(
                    lat + i as f64 * 0.002,
                    lng,
                    start + Duration::days((i % 6) as i64),
                )
            })
            .collect()
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn migrating_bursts_form_a_wave() {
        // Three weekly bursts, each ~80 km north of the last (~0.72° lat).
        let mut reports = Vec::new();
        reports.extend(burst(40.0, -100.0, day(1), 4));
        reports.extend(burst(40.72, -100.0, day(8), 4));
        reports.extend(burst(41.44, -100.0, day(15), 4));
        // Pad the window end so slices align cleanly.
        reports.extend(burst(42.16, -100.0, day(22), 4));

        let snapshot = ReportSnapshot::new(reports, Utc::now());
        let params = WaveParams {
            window_days: 28,
            ..WaveParams::default()
        };
        let hits = detect_waves(&snapshot, &params);

        assert_eq!(hits.len(), 1, "one contiguous migrating wave expected");
        let wave = &hits[0];
        assert!(wave.path.len() >= 3);
        assert!(wave.total_distance_km > 150.0);
        assert!(wave.speed_km_per_day > 0.0);
        assert!(wave.speed_km_per_day <= params.max_km_per_day);
        assert_eq!(wave.max_km_per_day, 80.0);
    }

    #[test]
    fn distant_jumps_do_not_chain() {
        // Second burst is ~1100 km away: beyond 80 km/day * 7 days.
        let mut reports = Vec::new();
        reports.extend(burst(40.0, -100.0, day(1), 4));
        reports.extend(burst(50.0, -100.0, day(8), 4));
        reports.extend(burst(40.0, -100.0, day(15), 4));

        let snapshot = ReportSnapshot::new(reports, Utc::now());
        let params = WaveParams {
            window_days: 21,
            ..WaveParams::default()
        };
        assert!(detect_waves(&snapshot, &params).is_empty());
    }

    #[test]
    fn approximate_dates_are_excluded() {
        let mut reports = Vec::new();
        reports.extend(burst(40.0, -100.0, day(1), 4));
        reports.extend(burst(40.72, -100.0, day(8), 4));
        reports.extend(burst(41.44, -100.0, day(15), 4));
        reports.extend(burst(42.16, -100.0, day(22), 4));
        for r in &mut reports {
            r.event_date_approximate = true;
        }

        let snapshot = ReportSnapshot::new(reports, Utc::now());
        let params = WaveParams {
            window_days: 28,
            ..WaveParams::default()
        };
        assert!(detect_waves(&snapshot, &params).is_empty());
    }

    #[test]
    fn stationary_cluster_is_not_a_wave_requirement() {
        // A cluster that never moves still chains (distance ~0); it is the
        // orchestrator's job to rank it, not the detector's to drop it.
        let mut reports = Vec::new();
        reports.extend(burst(40.0, -100.0, day(1), 4));
        reports.extend(burst(40.0, -100.0, day(8), 4));
        reports.extend(burst(40.0, -100.0, day(15), 4));
        reports.extend(burst(40.0, -100.0, day(22), 4));

        let snapshot = ReportSnapshot::new(reports, Utc::now());
        let params = WaveParams {
            window_days: 28,
            ..WaveParams::default()
        };
        let hits = detect_waves(&snapshot, &params);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].total_distance_km < 5.0);
    }
}
