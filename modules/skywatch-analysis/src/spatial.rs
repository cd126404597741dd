//! Density-based spatial clustering over geocoded reports.
//!
//! DBSCAN over haversine distance: reports within `radius_km` of a core
//! point, transitively, form one cluster; isolated reports are noise and
//! never become patterns. A geohash cell index bounds the neighbor search
//! so the region query stays near-linear on spread-out corpora.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use geohash::Coord;
use tracing::debug;
use uuid::Uuid;

use skywatch_common::{haversine_km, PhenomenonCategory, Report};

use crate::snapshot::ReportSnapshot;

/// Radius reported for a cluster is capped here; a handful of stragglers
/// must not turn a tight cluster into a continent-sized circle.
const MAX_RADIUS_KM: f64 = 250.0;

#[derive(Debug, Clone)]
pub struct ClusterParams {
    /// Neighbor radius in kilometers.
    pub radius_km: f64,
    /// Minimum points (including the point itself) to form a core point.
    pub min_points: usize,
    /// Optional event-date window filter.
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Optional category filter.
    pub categories: Option<Vec<PhenomenonCategory>>,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            radius_km: 50.0,
            min_points: 5,
            window: None,
            categories: None,
        }
    }
}

/// A detected cluster, without confidence/significance — those are added
/// uniformly by the confidence stage.
#[derive(Debug, Clone)]
pub struct SpatialCluster {
    pub centroid_lat: f64,
    pub centroid_lng: f64,
    /// Distance from centroid to the farthest member, capped.
    pub radius_km: f64,
    pub member_ids: Vec<Uuid>,
    pub category_mix: BTreeMap<String, u32>,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    /// Per-geohash-cell count statistics over the whole filtered corpus,
    /// the baseline the confidence stage compares this cluster against.
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
}

/// Cluster the geocoded reports in the snapshot.
pub fn detect_clusters(snapshot: &ReportSnapshot, params: &ClusterParams) -> Vec<SpatialCluster> {
    let points: Vec<&Report> = snapshot
        .geocoded()
        .filter(|r| match &params.window {
            Some((start, end)) => r
                .event_at
                .map(|d| d >= *start && d <= *end)
                .unwrap_or(false),
            None => true,
        })
        .filter(|r| match &params.categories {
            Some(cats) => cats.contains(&r.category),
            None => true,
        })
        .collect();

    cluster_points(&points, params)
}

/// Cluster an already-filtered point set. The wave detector reuses this
/// per time slice.
pub fn cluster_points(points: &[&Report], params: &ClusterParams) -> Vec<SpatialCluster> {
    if points.len() < params.min_points {
        return Vec::new();
    }

    let precision = precision_for_radius(params.radius_km);
    let index = CellIndex::build(points, precision);

    let mut cluster_of: Vec<Option<usize>> = vec![None; points.len()];
    let mut visited = vec![false; points.len()];
    let mut cluster_count = 0usize;

    for i in 0..points.len() {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let neighbors = index.region_query(points, i, params.radius_km);
        if neighbors.len() < params.min_points {
            continue; // noise unless a later core point claims it
        }

        let cid = cluster_count;
        cluster_count += 1;
        cluster_of[i] = Some(cid);

        let mut queue: VecDeque<usize> = neighbors.into_iter().collect();
        while let Some(j) = queue.pop_front() {
            if cluster_of[j].is_none() {
                cluster_of[j] = Some(cid);
            } else if cluster_of[j] != Some(cid) {
                continue; // border point already claimed by an earlier cluster
            }
            if !visited[j] {
                visited[j] = true;
                let expansion = index.region_query(points, j, params.radius_km);
                if expansion.len() >= params.min_points {
                    for k in expansion {
                        if cluster_of[k].is_none() || !visited[k] {
                            queue.push_back(k);
                        }
                    }
                }
            }
        }
    }

    let (baseline_mean, baseline_stddev) = index.cell_count_stats();

    let mut members_by_cluster: Vec<Vec<&Report>> = vec![Vec::new(); cluster_count];
    for (idx, assignment) in cluster_of.iter().enumerate() {
        if let Some(cid) = assignment {
            members_by_cluster[*cid].push(points[idx]);
        }
    }

    let clusters: Vec<SpatialCluster> = members_by_cluster
        .into_iter()
        .filter(|members| members.len() >= params.min_points)
        .map(|members| summarize(&members, baseline_mean, baseline_stddev))
        .collect();

    debug!(
        points = points.len(),
        clusters = clusters.len(),
        radius_km = params.radius_km,
        min_points = params.min_points,
        "Spatial clustering complete"
    );
    clusters
}

fn summarize(members: &[&Report], baseline_mean: f64, baseline_stddev: f64) -> SpatialCluster {
    let n = members.len() as f64;
    let centroid_lat = members.iter().filter_map(|r| r.latitude).sum::<f64>() / n;
    let centroid_lng = members.iter().filter_map(|r| r.longitude).sum::<f64>() / n;

    let radius_km = members
        .iter()
        .filter_map(|r| r.coords())
        .map(|(lat, lng)| haversine_km(centroid_lat, centroid_lng, lat, lng))
        .fold(0.0_f64, f64::max)
        .min(MAX_RADIUS_KM);

    let mut category_mix: BTreeMap<String, u32> = BTreeMap::new();
    for r in members {
        *category_mix.entry(r.category.to_string()).or_insert(0) += 1;
    }

    let dates: Vec<DateTime<Utc>> = members.iter().filter_map(|r| r.event_at).collect();

    SpatialCluster {
        centroid_lat,
        centroid_lng,
        radius_km,
        member_ids: members.iter().map(|r| r.id).collect(),
        category_mix,
        first_event_at: dates.iter().min().copied(),
        last_event_at: dates.iter().max().copied(),
        baseline_mean,
        baseline_stddev,
    }
}

/// Geohash precision whose cell is at least as wide as the radius, so a
/// 3x3 neighbor block always covers the search circle.
fn precision_for_radius(radius_km: f64) -> usize {
    if radius_km <= 0.6 {
        6
    } else if radius_km <= 4.8 {
        5
    } else if radius_km <= 19.0 {
        4
    } else if radius_km <= 150.0 {
        3
    } else {
        2
    }
}

/// Geohash cell → point indices.
struct CellIndex {
    precision: usize,
    cells: HashMap<String, Vec<usize>>,
}

impl CellIndex {
    fn build(points: &[&Report], precision: usize) -> Self {
        let mut cells: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, report) in points.iter().enumerate() {
            if let Some((lat, lng)) = report.coords() {
                if let Ok(hash) = geohash::encode(Coord { x: lng, y: lat }, precision) {
                    cells.entry(hash).or_default().push(idx);
                }
            }
        }
        Self { precision, cells }
    }

    /// Indices within `radius_km` of point `i`, including `i` itself.
    fn region_query(&self, points: &[&Report], i: usize, radius_km: f64) -> Vec<usize> {
        let (lat, lng) = match points[i].coords() {
            Some(c) => c,
            None => return Vec::new(),
        };
        let center = match geohash::encode(Coord { x: lng, y: lat }, self.precision) {
            Ok(h) => h,
            Err(_) => return Vec::new(),
        };

        let mut candidate_cells = vec![center.clone()];
        if let Ok(n) = geohash::neighbors(&center) {
            candidate_cells.extend([n.n, n.ne, n.e, n.se, n.s, n.sw, n.w, n.nw]);
        }

        let mut result = Vec::new();
        for cell in candidate_cells {
            if let Some(indices) = self.cells.get(&cell) {
                for &j in indices {
                    if let Some((lat_j, lng_j)) = points[j].coords() {
                        if haversine_km(lat, lng, lat_j, lng_j) <= radius_km {
                            result.push(j);
                        }
                    }
                }
            }
        }
        result
    }

    /// Mean/stddev of per-cell counts — the density baseline.
    fn cell_count_stats(&self) -> (f64, f64) {
        if self.cells.is_empty() {
            return (0.0, 0.0);
        }
        let counts: Vec<f64> = self.cells.values().map(|v| v.len() as f64).collect();
        let n = counts.len() as f64;
        let mean = counts.iter().sum::<f64>() / n;
        let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
        (mean, variance.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use skywatch_common::fixtures::report_at;
    use skywatch_common::Report;

    fn snapshot_of(reports: Vec<Report>) -> ReportSnapshot {
        ReportSnapshot::new(reports, Utc::now())
    }

    fn event_day(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 21, 0, 0).unwrap()
    }

    #[test]
    fn twelve_tight_reports_form_one_cluster_with_no_noise() {
        // 12 geocoded reports within 2 km of each other, nothing else nearby,
        // min_points 5 → exactly one cluster of size 12.
        let mut reports = Vec::new();
        for i in 0..12 {
            let jitter = i as f64 * 0.001; // ~110 m steps
            reports.push(report_at(44.97 + jitter, -93.26, event_day(1 + i)));
        }

        let params = ClusterParams {
            radius_km: 2.0,
            min_points: 5,
            ..ClusterParams::default()
        };
        let clusters = detect_clusters(&snapshot_of(reports), &params);

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids.len(), 12);
    }

    #[test]
    fn isolated_reports_are_noise() {
        let mut reports = Vec::new();
        for i in 0..6 {
            reports.push(report_at(44.97 + i as f64 * 0.001, -93.26, event_day(1)));
        }
        // One report hundreds of km away.
        reports.push(report_at(48.5, -101.0, event_day(2)));

        let params = ClusterParams {
            radius_km: 2.0,
            min_points: 5,
            ..ClusterParams::default()
        };
        let clusters = detect_clusters(&snapshot_of(reports), &params);

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids.len(), 6);
    }

    #[test]
    fn below_min_points_yields_no_cluster() {
        let reports = vec![
            report_at(44.97, -93.26, event_day(1)),
            report_at(44.971, -93.26, event_day(2)),
            report_at(44.972, -93.26, event_day(3)),
        ];
        let params = ClusterParams {
            radius_km: 2.0,
            min_points: 5,
            ..ClusterParams::default()
        };
        assert!(detect_clusters(&snapshot_of(reports), &params).is_empty());
    }

    #[test]
    fn two_separated_groups_form_two_clusters() {
        let mut reports = Vec::new();
        for i in 0..5 {
            reports.push(report_at(44.97 + i as f64 * 0.001, -93.26, event_day(1)));
        }
        for i in 0..5 {
            reports.push(report_at(46.50 + i as f64 * 0.001, -94.00, event_day(2)));
        }

        let params = ClusterParams {
            radius_km: 2.0,
            min_points: 5,
            ..ClusterParams::default()
        };
        let clusters = detect_clusters(&snapshot_of(reports), &params);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn window_filter_excludes_out_of_range_reports() {
        let mut reports = Vec::new();
        for i in 0..5 {
            reports.push(report_at(44.97 + i as f64 * 0.001, -93.26, event_day(1)));
        }
        // Same spot, much later — excluded by the window.
        reports.push(report_at(44.97, -93.26, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));

        let params = ClusterParams {
            radius_km: 2.0,
            min_points: 5,
            window: Some((event_day(1), event_day(30))),
            ..ClusterParams::default()
        };
        let clusters = detect_clusters(&snapshot_of(reports), &params);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids.len(), 5);
    }

    #[test]
    fn centroid_and_radius_are_sane() {
        let reports = vec![
            report_at(44.0, -93.0, event_day(1)),
            report_at(44.0, -93.0, event_day(2)),
            report_at(44.0, -93.0, event_day(3)),
            report_at(44.01, -93.0, event_day(4)),
            report_at(43.99, -93.0, event_day(5)),
        ];
        let params = ClusterParams {
            radius_km: 5.0,
            min_points: 5,
            ..ClusterParams::default()
        };
        let clusters = detect_clusters(&snapshot_of(reports), &params);
        assert_eq!(clusters.len(), 1);
        let c = &clusters[0];
        assert!((c.centroid_lat - 44.0).abs() < 0.01);
        assert!(c.radius_km > 0.0 && c.radius_km < 3.0);
        assert_eq!(c.first_event_at, Some(event_day(1)));
        assert_eq!(c.last_event_at, Some(event_day(5)));
    }
}
