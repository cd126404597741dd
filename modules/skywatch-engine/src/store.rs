//! Postgres-backed stores.
//!
//! All writes are idempotent upserts on natural keys (report id, canonical
//! duplicate pair, pattern stable_key), so interrupted runs and retries
//! never corrupt persisted rows.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use skywatch_common::quality::QualityAssessment;
use skywatch_common::{
    Credibility, DetectedPattern, DuplicateMatch, Grade, MatchResolution, PhenomenonCategory,
    QualityDimensions, Report, SkywatchError, SourceType,
};

use crate::orchestrator::RunSummary;
use crate::traits::{
    DuplicateStore, MatchWriteOutcome, PatternStore, ReportStore, ScoreStats,
};

/// Serialize a snake_case enum to its wire string.
fn enum_to_str<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Parse a snake_case enum from its wire string.
fn enum_from_str<T: DeserializeOwned>(s: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Create tables if missing. The reports table is owned by the ingestion
/// layer in production; creating it here keeps dev and test databases
/// self-contained.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id                      UUID         PRIMARY KEY,
            title                   TEXT         NOT NULL,
            summary                 TEXT,
            description             TEXT         NOT NULL DEFAULT '',
            category                TEXT         NOT NULL DEFAULT 'other',
            location_name           TEXT,
            country                 TEXT,
            state                   TEXT,
            city                    TEXT,
            latitude                DOUBLE PRECISION,
            longitude               DOUBLE PRECISION,
            event_at                TIMESTAMPTZ,
            event_date_approximate  BOOLEAN      NOT NULL DEFAULT FALSE,
            witness_count           INTEGER      NOT NULL DEFAULT 0,
            has_physical_evidence   BOOLEAN      NOT NULL DEFAULT FALSE,
            has_photo_video         BOOLEAN      NOT NULL DEFAULT FALSE,
            has_official_report     BOOLEAN      NOT NULL DEFAULT FALSE,
            evidence_summary        TEXT,
            source_type             TEXT         NOT NULL DEFAULT 'witness_submission',
            credibility             TEXT         NOT NULL DEFAULT 'unverified',
            tags                    TEXT[]       NOT NULL DEFAULT '{}',
            quality_score           SMALLINT,
            quality_grade           TEXT,
            quality_dimensions      JSONB,
            quality_scored_at       TIMESTAMPTZ,
            quality_scorer_version  TEXT,
            content_fingerprint     TEXT,
            created_at              TIMESTAMPTZ  NOT NULL DEFAULT now(),
            updated_at              TIMESTAMPTZ  NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS reports_scorer_version_idx ON reports (quality_scorer_version)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS reports_fingerprint_idx ON reports (content_fingerprint)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS reports_page_idx ON reports (created_at, id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duplicate_matches (
            report_a_id          UUID         NOT NULL,
            report_b_id          UUID         NOT NULL,
            title_similarity     DOUBLE PRECISION NOT NULL,
            location_similarity  DOUBLE PRECISION NOT NULL,
            date_similarity      DOUBLE PRECISION NOT NULL,
            content_similarity   DOUBLE PRECISION NOT NULL,
            overall_score        DOUBLE PRECISION NOT NULL,
            confidence           TEXT         NOT NULL,
            match_kind           TEXT         NOT NULL,
            resolution           TEXT         NOT NULL DEFAULT 'pending',
            created_at           TIMESTAMPTZ  NOT NULL DEFAULT now(),
            updated_at           TIMESTAMPTZ  NOT NULL DEFAULT now(),
            PRIMARY KEY (report_a_id, report_b_id),
            CHECK (report_a_id < report_b_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS duplicate_matches_resolution_idx ON duplicate_matches (resolution)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS detected_patterns (
            id                  UUID         PRIMARY KEY,
            stable_key          TEXT         NOT NULL UNIQUE,
            pattern_type        TEXT         NOT NULL,
            status              TEXT         NOT NULL,
            report_count        INTEGER      NOT NULL,
            report_ids          UUID[]       NOT NULL,
            confidence_score    DOUBLE PRECISION NOT NULL,
            confidence_low      DOUBLE PRECISION NOT NULL,
            confidence_high     DOUBLE PRECISION NOT NULL,
            significance_score  DOUBLE PRECISION NOT NULL,
            effect_size         DOUBLE PRECISION NOT NULL,
            effect_magnitude    TEXT         NOT NULL,
            center_lat          DOUBLE PRECISION,
            center_lng          DOUBLE PRECISION,
            radius_km           DOUBLE PRECISION,
            category_mix        JSONB        NOT NULL DEFAULT '{}',
            quality_flags       JSONB        NOT NULL DEFAULT '[]',
            details             JSONB        NOT NULL,
            detector_version    TEXT         NOT NULL,
            first_detected_at   TIMESTAMPTZ  NOT NULL,
            last_seen_at        TIMESTAMPTZ  NOT NULL,
            consecutive_runs    INTEGER      NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pattern_runs (
            id             BIGSERIAL    PRIMARY KEY,
            mode           TEXT         NOT NULL,
            started_at     TIMESTAMPTZ  NOT NULL,
            duration_ms    BIGINT       NOT NULL,
            snapshot_size  INTEGER      NOT NULL,
            detected       INTEGER      NOT NULL,
            updated        INTEGER      NOT NULL,
            decayed        INTEGER      NOT NULL,
            errored        INTEGER      NOT NULL,
            succeeded      BOOLEAN      NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

const REPORT_COLUMNS: &str = "id, title, summary, description, category, location_name, country, \
     state, city, latitude, longitude, event_at, event_date_approximate, witness_count, \
     has_physical_evidence, has_photo_video, has_official_report, evidence_summary, source_type, \
     credibility, tags, quality_score, quality_grade, quality_dimensions, quality_scored_at, \
     quality_scorer_version, content_fingerprint, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: Uuid,
    title: String,
    summary: Option<String>,
    description: String,
    category: String,
    location_name: Option<String>,
    country: Option<String>,
    state: Option<String>,
    city: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    event_at: Option<DateTime<Utc>>,
    event_date_approximate: bool,
    witness_count: i32,
    has_physical_evidence: bool,
    has_photo_video: bool,
    has_official_report: bool,
    evidence_summary: Option<String>,
    source_type: String,
    credibility: String,
    tags: Vec<String>,
    quality_score: Option<i16>,
    quality_grade: Option<String>,
    quality_dimensions: Option<serde_json::Value>,
    quality_scored_at: Option<DateTime<Utc>>,
    quality_scorer_version: Option<String>,
    content_fingerprint: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ReportRow> for Report {
    fn from(row: ReportRow) -> Self {
        Report {
            id: row.id,
            title: row.title,
            summary: row.summary,
            description: row.description,
            category: PhenomenonCategory::from_str_loose(&row.category),
            location_name: row.location_name,
            country: row.country,
            state: row.state,
            city: row.city,
            latitude: row.latitude,
            longitude: row.longitude,
            event_at: row.event_at,
            event_date_approximate: row.event_date_approximate,
            witness_count: row.witness_count.max(0) as u32,
            has_physical_evidence: row.has_physical_evidence,
            has_photo_video: row.has_photo_video,
            has_official_report: row.has_official_report,
            evidence_summary: row.evidence_summary,
            source_type: SourceType::from_str_loose(&row.source_type),
            credibility: Credibility::from_str_loose(&row.credibility),
            tags: row.tags,
            quality_score: row.quality_score,
            quality_grade: row.quality_grade.as_deref().and_then(Grade::from_letter),
            quality_dimensions: row
                .quality_dimensions
                .and_then(|v| serde_json::from_value::<QualityDimensions>(v).ok()),
            quality_scored_at: row.quality_scored_at,
            quality_scorer_version: row.quality_scorer_version,
            content_fingerprint: row.content_fingerprint,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, predicate: &str, offset: u64, limit: u32) -> Result<Vec<Report>> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE {predicate} \
             ORDER BY created_at, id OFFSET $1 LIMIT $2"
        ))
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Report::from).collect())
    }
}

#[async_trait]
impl ReportStore for PgReportStore {
    async fn fetch_unscored(&self, offset: u64, limit: u32) -> Result<Vec<Report>> {
        self.fetch_where("quality_score IS NULL", offset, limit).await
    }

    async fn fetch_stale(
        &self,
        current_version: &str,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<Report>> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports \
             WHERE quality_scorer_version IS DISTINCT FROM $1 \
             ORDER BY created_at, id OFFSET $2 LIMIT $3"
        ))
        .bind(current_version)
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Report::from).collect())
    }

    async fn fetch_page(&self, offset: u64, limit: u32) -> Result<Vec<Report>> {
        self.fetch_where("TRUE", offset, limit).await
    }

    async fn snapshot(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Report>> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports \
             WHERE $1::timestamptz IS NULL OR updated_at >= $1 \
             ORDER BY created_at, id"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Report::from).collect())
    }

    async fn write_assessment(
        &self,
        report_id: Uuid,
        assessment: &QualityAssessment,
        fingerprint: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE reports SET \
                 quality_score = $2, \
                 quality_grade = $3, \
                 quality_dimensions = $4, \
                 quality_scored_at = $5, \
                 quality_scorer_version = $6, \
                 content_fingerprint = $7, \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(report_id)
        .bind(assessment.score as i16)
        .bind(assessment.grade.to_string())
        .bind(serde_json::to_value(assessment.dimensions)?)
        .bind(assessment.scored_at)
        .bind(&assessment.scorer_version)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_unscored(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM reports WHERE quality_score IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn grade_distribution(&self) -> Result<BTreeMap<String, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT quality_grade, COUNT(*) FROM reports \
             WHERE quality_grade IS NOT NULL GROUP BY quality_grade",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(g, c)| (g, c as u64)).collect())
    }

    async fn score_stats(&self) -> Result<Option<ScoreStats>> {
        let row: (Option<i16>, Option<f64>, Option<i16>) = sqlx::query_as(
            "SELECT MIN(quality_score), AVG(quality_score::float8), MAX(quality_score) \
             FROM reports WHERE quality_score IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(match row {
            (Some(min), Some(avg), Some(max)) => Some(ScoreStats { min, avg, max }),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Duplicate matches
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgDuplicateStore {
    pool: PgPool,
}

impl PgDuplicateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DuplicateStore for PgDuplicateStore {
    async fn upsert_match(&self, m: &DuplicateMatch) -> Result<MatchWriteOutcome> {
        if !m.is_canonical() {
            return Err(SkywatchError::Validation(
                "duplicate pair must be canonically ordered".to_string(),
            )
            .into());
        }

        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT report_a_id FROM duplicate_matches \
             WHERE report_a_id = $1 AND report_b_id = $2",
        )
        .bind(m.report_a_id)
        .bind(m.report_b_id)
        .fetch_optional(&self.pool)
        .await?;

        // Resolution is deliberately absent from the update set: moderation
        // owns that column, and a confirmed pair must stay confirmed while
        // its scores refresh.
        sqlx::query(
            "INSERT INTO duplicate_matches \
                 (report_a_id, report_b_id, title_similarity, location_similarity, \
                  date_similarity, content_similarity, overall_score, confidence, \
                  match_kind, resolution) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (report_a_id, report_b_id) DO UPDATE SET \
                 title_similarity = EXCLUDED.title_similarity, \
                 location_similarity = EXCLUDED.location_similarity, \
                 date_similarity = EXCLUDED.date_similarity, \
                 content_similarity = EXCLUDED.content_similarity, \
                 overall_score = EXCLUDED.overall_score, \
                 confidence = EXCLUDED.confidence, \
                 match_kind = EXCLUDED.match_kind, \
                 updated_at = now()",
        )
        .bind(m.report_a_id)
        .bind(m.report_b_id)
        .bind(m.title_similarity)
        .bind(m.location_similarity)
        .bind(m.date_similarity)
        .bind(m.content_similarity)
        .bind(m.overall_score)
        .bind(enum_to_str(&m.confidence))
        .bind(enum_to_str(&m.match_kind))
        .bind(enum_to_str(&MatchResolution::Pending))
        .execute(&self.pool)
        .await?;

        Ok(match existing {
            Some(_) => MatchWriteOutcome::Refreshed,
            None => MatchWriteOutcome::Inserted,
        })
    }

    async fn count_pending(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM duplicate_matches WHERE resolution = 'pending'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct PatternRow {
    id: Uuid,
    stable_key: String,
    pattern_type: String,
    status: String,
    report_count: i32,
    report_ids: Vec<Uuid>,
    confidence_score: f64,
    confidence_low: f64,
    confidence_high: f64,
    significance_score: f64,
    effect_size: f64,
    effect_magnitude: String,
    center_lat: Option<f64>,
    center_lng: Option<f64>,
    radius_km: Option<f64>,
    category_mix: serde_json::Value,
    quality_flags: serde_json::Value,
    details: serde_json::Value,
    detector_version: String,
    first_detected_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    consecutive_runs: i32,
}

impl PatternRow {
    /// Rows written by a different pipeline version may no longer parse;
    /// they are candidates for re-detection, not errors.
    fn into_pattern(self) -> Option<DetectedPattern> {
        let pattern_type = enum_from_str(&self.pattern_type)?;
        let status = enum_from_str(&self.status)?;
        let effect_magnitude = enum_from_str(&self.effect_magnitude)?;
        let details = serde_json::from_value(self.details).ok()?;
        let category_mix = serde_json::from_value(self.category_mix).unwrap_or_default();
        let quality_flags = serde_json::from_value(self.quality_flags).unwrap_or_default();

        Some(DetectedPattern {
            id: self.id,
            pattern_type,
            status,
            stable_key: self.stable_key,
            report_count: self.report_count.max(0) as u32,
            report_ids: self.report_ids,
            confidence_score: self.confidence_score,
            confidence_low: self.confidence_low,
            confidence_high: self.confidence_high,
            significance_score: self.significance_score,
            effect_size: self.effect_size,
            effect_magnitude,
            center_lat: self.center_lat,
            center_lng: self.center_lng,
            radius_km: self.radius_km,
            category_mix,
            quality_flags,
            details,
            detector_version: self.detector_version,
            first_detected_at: self.first_detected_at,
            last_seen_at: self.last_seen_at,
            consecutive_runs: self.consecutive_runs.max(0) as u32,
        })
    }
}

#[derive(Clone)]
pub struct PgPatternStore {
    pool: PgPool,
}

impl PgPatternStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PatternStore for PgPatternStore {
    async fn all_patterns(&self) -> Result<Vec<DetectedPattern>> {
        let rows = sqlx::query_as::<_, PatternRow>(
            "SELECT id, stable_key, pattern_type, status, report_count, report_ids, \
                    confidence_score, confidence_low, confidence_high, significance_score, \
                    effect_size, effect_magnitude, center_lat, center_lng, radius_km, \
                    category_mix, quality_flags, details, detector_version, \
                    first_detected_at, last_seen_at, consecutive_runs \
             FROM detected_patterns",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut patterns = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.stable_key.clone();
            match row.into_pattern() {
                Some(p) => patterns.push(p),
                None => warn!(stable_key = %key, "Skipping unparseable pattern row"),
            }
        }
        Ok(patterns)
    }

    async fn upsert_pattern(&self, pattern: &DetectedPattern) -> Result<()> {
        sqlx::query(
            "INSERT INTO detected_patterns \
                 (id, stable_key, pattern_type, status, report_count, report_ids, \
                  confidence_score, confidence_low, confidence_high, significance_score, \
                  effect_size, effect_magnitude, center_lat, center_lng, radius_km, \
                  category_mix, quality_flags, details, detector_version, \
                  first_detected_at, last_seen_at, consecutive_runs) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                     $16, $17, $18, $19, $20, $21, $22) \
             ON CONFLICT (stable_key) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 report_count = EXCLUDED.report_count, \
                 report_ids = EXCLUDED.report_ids, \
                 confidence_score = EXCLUDED.confidence_score, \
                 confidence_low = EXCLUDED.confidence_low, \
                 confidence_high = EXCLUDED.confidence_high, \
                 significance_score = EXCLUDED.significance_score, \
                 effect_size = EXCLUDED.effect_size, \
                 effect_magnitude = EXCLUDED.effect_magnitude, \
                 center_lat = EXCLUDED.center_lat, \
                 center_lng = EXCLUDED.center_lng, \
                 radius_km = EXCLUDED.radius_km, \
                 category_mix = EXCLUDED.category_mix, \
                 quality_flags = EXCLUDED.quality_flags, \
                 details = EXCLUDED.details, \
                 detector_version = EXCLUDED.detector_version, \
                 last_seen_at = EXCLUDED.last_seen_at, \
                 consecutive_runs = EXCLUDED.consecutive_runs",
        )
        .bind(pattern.id)
        .bind(&pattern.stable_key)
        .bind(enum_to_str(&pattern.pattern_type))
        .bind(enum_to_str(&pattern.status))
        .bind(pattern.report_count as i32)
        .bind(&pattern.report_ids)
        .bind(pattern.confidence_score)
        .bind(pattern.confidence_low)
        .bind(pattern.confidence_high)
        .bind(pattern.significance_score)
        .bind(pattern.effect_size)
        .bind(enum_to_str(&pattern.effect_magnitude))
        .bind(pattern.center_lat)
        .bind(pattern.center_lng)
        .bind(pattern.radius_km)
        .bind(serde_json::to_value(&pattern.category_mix)?)
        .bind(serde_json::to_value(&pattern.quality_flags)?)
        .bind(serde_json::to_value(&pattern.details)?)
        .bind(&pattern.detector_version)
        .bind(pattern.first_detected_at)
        .bind(pattern.last_seen_at)
        .bind(pattern.consecutive_runs as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_successful_run(&self) -> Result<Option<DateTime<Utc>>> {
        let started: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT started_at FROM pattern_runs WHERE succeeded \
             ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(started)
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        sqlx::query(
            "INSERT INTO pattern_runs \
                 (mode, started_at, duration_ms, snapshot_size, detected, updated, \
                  decayed, errored, succeeded) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(summary.mode.to_string())
        .bind(summary.started_at)
        .bind(summary.duration_ms as i64)
        .bind(summary.snapshot_size as i32)
        .bind(summary.detected as i32)
        .bind(summary.updated as i32)
        .bind(summary.decayed as i32)
        .bind(summary.errored as i32)
        .bind(summary.succeeded)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
