//! Interval estimation, significance scoring, and effect sizes — the
//! shared post-processing stage applied to every detector's raw output.

use skywatch_common::{EffectMagnitude, QualityFlag};

/// z for a ~95% interval.
pub const CONFIDENCE_Z: f64 = 1.96;

/// Significance term weights. Report count dominates; every term is
/// log-scaled first so large counts cannot saturate the score instantly.
const WEIGHT_COUNT: f64 = 45.0;
const WEIGHT_CATEGORY: f64 = 20.0;
const WEIGHT_PHENOMENON: f64 = 15.0;
const WEIGHT_DEVIATION: f64 = 20.0;

/// Counts at which each log-scaled term tops out.
const COUNT_SATURATION: f64 = 200.0;
const CATEGORY_SATURATION: f64 = 8.0;
const PHENOMENON_SATURATION: f64 = 12.0;
const DEVIATION_SATURATION: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WilsonInterval {
    pub center: f64,
    pub low: f64,
    pub high: f64,
}

impl WilsonInterval {
    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

/// Wilson score interval for a proportion `p` observed over `n` samples.
/// Well-behaved at small n — which is exactly why an n=3 pattern and an
/// n=300 pattern with the same raw confidence present differently.
/// Returns None when n = 0.
pub fn wilson_interval(p: f64, n: u32, z: f64) -> Option<WilsonInterval> {
    if n == 0 {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let n = n as f64;
    let z2 = z * z;

    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let margin = (z / denom) * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();

    Some(WilsonInterval {
        center,
        low: (center - margin).max(0.0),
        high: (center + margin).min(1.0),
    })
}

/// Weighted significance score in [0, 100].
///
/// `deviation` is the detector's own unitless deviation-from-baseline
/// measure (a z-score, a density ratio — whatever the detector emits).
pub fn significance_score(
    report_count: u32,
    category_diversity: u32,
    phenomenon_diversity: u32,
    deviation: f64,
) -> f64 {
    let count_term = log_scaled(report_count as f64, COUNT_SATURATION);
    let category_term = log_scaled(category_diversity as f64, CATEGORY_SATURATION);
    let phenomenon_term = log_scaled(phenomenon_diversity as f64, PHENOMENON_SATURATION);
    let deviation_term = log_scaled(deviation.abs(), DEVIATION_SATURATION);

    (WEIGHT_COUNT * count_term
        + WEIGHT_CATEGORY * category_term
        + WEIGHT_PHENOMENON * phenomenon_term
        + WEIGHT_DEVIATION * deviation_term)
        .clamp(0.0, 100.0)
}

fn log_scaled(value: f64, saturation: f64) -> f64 {
    ((1.0 + value.max(0.0)).ln() / (1.0 + saturation).ln()).min(1.0)
}

/// Cohen's d: standardized mean difference in pooled-standard-deviation
/// units. A zero pooled deviation resolves to no effect, never a crash.
pub fn cohens_d(observed_mean: f64, baseline_mean: f64, pooled_stddev: f64) -> f64 {
    if pooled_stddev == 0.0 {
        return 0.0;
    }
    (observed_mean - baseline_mean) / pooled_stddev
}

/// Fixed cut points at 0.2 / 0.5 / 0.8 / 1.2, on |d|.
pub fn effect_magnitude(d: f64) -> EffectMagnitude {
    let d = d.abs();
    if d < 0.2 {
        EffectMagnitude::Negligible
    } else if d < 0.5 {
        EffectMagnitude::Small
    } else if d < 0.8 {
        EffectMagnitude::Medium
    } else if d < 1.2 {
        EffectMagnitude::Large
    } else {
        EffectMagnitude::VeryLarge
    }
}

/// Flag thresholds. Informational, never gating.
const LOW_SAMPLE_COUNT: u32 = 5;
const SHORT_WINDOW_DAYS: i64 = 14;
const ESTABLISHED_COUNT: u32 = 50;
const ESTABLISHED_DAYS: i64 = 180;
const MULTI_PHENOMENON_CATEGORIES: u32 = 3;

/// Plain-language quality annotations attached to a pattern.
pub fn quality_flags(
    report_count: u32,
    span_days: Option<i64>,
    category_count: u32,
    has_precise_location: bool,
) -> Vec<QualityFlag> {
    let mut flags = Vec::new();
    if report_count < LOW_SAMPLE_COUNT {
        flags.push(QualityFlag::LowSampleSize);
    }
    if let Some(days) = span_days {
        if days < SHORT_WINDOW_DAYS {
            flags.push(QualityFlag::ShortTimeWindow);
        }
        if report_count >= ESTABLISHED_COUNT && days >= ESTABLISHED_DAYS {
            flags.push(QualityFlag::WellEstablished);
        }
    }
    if category_count == 1 {
        flags.push(QualityFlag::SingleCategory);
    }
    if !has_precise_location {
        flags.push(QualityFlag::NoPreciseLocation);
    }
    if category_count >= MULTI_PHENOMENON_CATEGORIES {
        flags.push(QualityFlag::MultiPhenomenon);
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wilson_center_sits_between_raw_p_and_half() {
        for &(p, n) in &[(0.9, 10u32), (0.9, 100), (0.2, 7), (0.2, 300), (0.5, 3)] {
            let w = wilson_interval(p, n, CONFIDENCE_Z).unwrap();
            let (lo, hi) = if p <= 0.5 { (p, 0.5) } else { (0.5, p) };
            assert!(
                w.center >= lo - 1e-12 && w.center <= hi + 1e-12,
                "center {} outside [{lo}, {hi}] for p={p} n={n}",
                w.center
            );
        }
    }

    #[test]
    fn wilson_width_strictly_decreases_with_n() {
        let p = 0.7;
        let mut prev = wilson_interval(p, 3, CONFIDENCE_Z).unwrap().width();
        for n in [10, 30, 100, 300, 1000] {
            let width = wilson_interval(p, n, CONFIDENCE_Z).unwrap().width();
            assert!(
                width < prev,
                "width should shrink as n grows: n={n} width={width} prev={prev}"
            );
            prev = width;
        }
    }

    #[test]
    fn wilson_zero_samples_is_no_interval() {
        assert!(wilson_interval(0.8, 0, CONFIDENCE_Z).is_none());
    }

    #[test]
    fn wilson_bounds_stay_in_unit_interval() {
        let w = wilson_interval(0.99, 3, CONFIDENCE_Z).unwrap();
        assert!(w.low >= 0.0 && w.high <= 1.0);
        let w = wilson_interval(0.01, 3, CONFIDENCE_Z).unwrap();
        assert!(w.low >= 0.0 && w.high <= 1.0);
    }

    #[test]
    fn effect_buckets_are_monotonic_in_abs_d() {
        let ds = [0.0, 0.1, 0.19, 0.2, 0.49, 0.5, 0.79, 0.8, 1.19, 1.2, 5.0];
        let mut prev = effect_magnitude(0.0);
        for d in ds {
            let m = effect_magnitude(d);
            assert!(m >= prev, "bucket regressed at d={d}");
            prev = m;
        }
        // Sign is irrelevant.
        assert_eq!(effect_magnitude(-0.9), effect_magnitude(0.9));
    }

    #[test]
    fn effect_bucket_cut_points() {
        assert_eq!(effect_magnitude(0.19), EffectMagnitude::Negligible);
        assert_eq!(effect_magnitude(0.2), EffectMagnitude::Small);
        assert_eq!(effect_magnitude(0.5), EffectMagnitude::Medium);
        assert_eq!(effect_magnitude(0.8), EffectMagnitude::Large);
        assert_eq!(effect_magnitude(1.2), EffectMagnitude::VeryLarge);
    }

    #[test]
    fn cohens_d_zero_deviation_is_no_effect() {
        assert_eq!(cohens_d(12.0, 10.0, 0.0), 0.0);
        assert!(cohens_d(12.0, 10.0, 1.0) > 1.0);
    }

    #[test]
    fn significance_grows_with_count_but_does_not_saturate_instantly() {
        let small = significance_score(3, 1, 1, 1.0);
        let medium = significance_score(30, 1, 1, 1.0);
        let large = significance_score(300, 1, 1, 1.0);
        assert!(small < medium && medium < large);
        // A modest pattern should not already sit at the ceiling.
        assert!(medium < 80.0);
        assert!(large <= 100.0);
    }

    #[test]
    fn significance_rewards_diversity_and_deviation() {
        let narrow = significance_score(50, 1, 1, 1.0);
        let diverse = significance_score(50, 4, 6, 1.0);
        let deviant = significance_score(50, 1, 1, 8.0);
        assert!(diverse > narrow);
        assert!(deviant > narrow);
    }

    #[test]
    fn flags_annotate_without_gating() {
        let flags = quality_flags(3, Some(7), 1, false);
        assert!(flags.contains(&QualityFlag::LowSampleSize));
        assert!(flags.contains(&QualityFlag::ShortTimeWindow));
        assert!(flags.contains(&QualityFlag::SingleCategory));
        assert!(flags.contains(&QualityFlag::NoPreciseLocation));
        assert!(!flags.contains(&QualityFlag::WellEstablished));

        let flags = quality_flags(80, Some(400), 4, true);
        assert!(flags.contains(&QualityFlag::WellEstablished));
        assert!(flags.contains(&QualityFlag::MultiPhenomenon));
        assert!(!flags.contains(&QualityFlag::SingleCategory));
        assert!(!flags.contains(&QualityFlag::LowSampleSize));
    }
}
