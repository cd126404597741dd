//! Store abstractions for the engine's three persistence surfaces.
//!
//! ReportStore — the externally-owned report corpus plus the derived
//!   quality/fingerprint fields this core is allowed to write back.
//! DuplicateStore — proposed duplicate pairs, resolution owned by
//!   moderation tooling.
//! PatternStore — detected patterns and run bookkeeping.
//!
//! These enable deterministic testing with in-memory implementations:
//! no network, no database, no Docker.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use skywatch_common::{DetectedPattern, DuplicateMatch, QualityAssessment, Report};

use crate::orchestrator::RunSummary;

/// Score aggregate over all scored reports.
#[derive(Debug, Clone, Copy)]
pub struct ScoreStats {
    pub min: i16,
    pub avg: f64,
    pub max: i16,
}

/// What an idempotent match upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchWriteOutcome {
    Inserted,
    /// Scores refreshed on an existing row. The resolution column is never
    /// touched on this path, so a confirmed pair stays confirmed.
    Refreshed,
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Unscored reports in stable (created_at, id) order.
    async fn fetch_unscored(&self, offset: u64, limit: u32) -> Result<Vec<Report>>;

    /// Reports whose stored scorer version differs from `current_version`
    /// (including never-scored ones), in stable order.
    async fn fetch_stale(&self, current_version: &str, offset: u64, limit: u32)
        -> Result<Vec<Report>>;

    /// A stable page over the whole corpus, for bounded dedup scans.
    async fn fetch_page(&self, offset: u64, limit: u32) -> Result<Vec<Report>>;

    /// The detection snapshot. `since` = None reads the entire corpus;
    /// Some(ts) reads reports added or changed after that instant.
    async fn snapshot(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Report>>;

    /// Write the derived quality fields and fingerprint for one report.
    async fn write_assessment(
        &self,
        report_id: Uuid,
        assessment: &QualityAssessment,
        fingerprint: &str,
    ) -> Result<()>;

    async fn count_unscored(&self) -> Result<u64>;
    async fn grade_distribution(&self) -> Result<BTreeMap<String, u64>>;
    async fn score_stats(&self) -> Result<Option<ScoreStats>>;
}

#[async_trait]
pub trait DuplicateStore: Send + Sync {
    /// Idempotent upsert keyed on the canonical pair. Inserts as pending;
    /// refreshes similarity scores on an existing row without touching the
    /// resolution.
    async fn upsert_match(&self, m: &DuplicateMatch) -> Result<MatchWriteOutcome>;

    async fn count_pending(&self) -> Result<u64>;
}

#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn all_patterns(&self) -> Result<Vec<DetectedPattern>>;

    /// Idempotent upsert keyed on pattern identity (stable_key).
    async fn upsert_pattern(&self, pattern: &DetectedPattern) -> Result<()>;

    /// Start time of the most recent successful detection run, if any.
    async fn last_successful_run(&self) -> Result<Option<DateTime<Utc>>>;

    async fn record_run(&self, summary: &RunSummary) -> Result<()>;
}
