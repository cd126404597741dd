//! Aggregate statistics over the stores, for dashboards and admin tooling.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::traits::{DuplicateStore, ReportStore, ScoreStats};

#[derive(Debug, Clone)]
pub struct AggregateStats {
    pub grade_distribution: BTreeMap<String, u64>,
    pub unscored_count: u64,
    pub pending_duplicate_count: u64,
    pub scores: Option<ScoreStats>,
}

impl std::fmt::Display for AggregateStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Aggregate Statistics ===")?;
        writeln!(f, "Unscored reports:   {}", self.unscored_count)?;
        writeln!(f, "Pending duplicates: {}", self.pending_duplicate_count)?;
        match &self.scores {
            Some(s) => writeln!(
                f,
                "Scores:             min={} avg={:.1} max={}",
                s.min, s.avg, s.max
            )?,
            None => writeln!(f, "Scores:             (no scored reports)")?,
        }
        for (grade, count) in &self.grade_distribution {
            writeln!(f, "  grade {grade}: {count}")?;
        }
        Ok(())
    }
}

pub async fn aggregate_stats(
    reports: &dyn ReportStore,
    duplicates: &dyn DuplicateStore,
) -> Result<AggregateStats> {
    Ok(AggregateStats {
        grade_distribution: reports.grade_distribution().await?,
        unscored_count: reports.count_unscored().await?,
        pending_duplicate_count: duplicates.count_pending().await?,
        scores: reports.score_stats().await?,
    })
}
