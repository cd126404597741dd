//! Batch operations with first-class cursors.
//!
//! Every operation commits idempotent writes per item and returns a
//! resumable cursor, so an interrupted run never throws away progress.
//! Per-item failures are counted (`errored`), never propagated; business
//! rule exclusions are counted separately (`skipped`). Cancellation is
//! cooperative: the wall-clock budget is checked at chunk boundaries and
//! the operation returns `done = false` with a cursor instead of
//! overrunning an external timeout.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use skywatch_analysis::dedup::{DuplicateMatcher, MatcherParams};
use skywatch_common::fingerprint::report_fingerprint;
use skywatch_common::quality::{assess, SCORER_VERSION};

use crate::traits::{DuplicateStore, MatchWriteOutcome, ReportStore};

/// Budget check cadence for per-report scoring.
const SCORE_CHUNK: usize = 50;

/// Where to resume. `next_offset` only advances past items that stay in
/// the operation's input set (errored items for scoring ops, the scanned
/// window for dedup) — successfully processed items drop out of the set
/// on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub processed: u32,
    pub next_offset: u64,
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub operation: &'static str,
    pub processed: u32,
    pub inserted: u32,
    pub updated: u32,
    pub skipped: u32,
    pub errored: u32,
    pub cursor: Cursor,
    pub elapsed_ms: u64,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== {} ===", self.operation)?;
        writeln!(f, "Processed: {}", self.processed)?;
        writeln!(f, "Inserted:  {}", self.inserted)?;
        writeln!(f, "Updated:   {}", self.updated)?;
        writeln!(f, "Skipped:   {}", self.skipped)?;
        writeln!(f, "Errored:   {}", self.errored)?;
        writeln!(
            f,
            "Cursor:    offset={} done={}",
            self.cursor.next_offset, self.cursor.done
        )?;
        writeln!(f, "Elapsed:   {}ms", self.elapsed_ms)?;
        Ok(())
    }
}

/// Score up to `limit` unscored reports.
pub async fn score_batch(
    store: &dyn ReportStore,
    offset: u64,
    limit: u32,
    budget: Duration,
) -> Result<BatchSummary> {
    let reports = store.fetch_unscored(offset, limit).await?;
    score_reports("score_batch", store, reports, offset, limit, budget).await
}

/// Rescore up to `limit` reports whose scorer version is stale. The
/// rescoring itself is a pure migration: read, recompute under the
/// current rubric, write.
pub async fn rescore_stale(
    store: &dyn ReportStore,
    offset: u64,
    limit: u32,
    budget: Duration,
) -> Result<BatchSummary> {
    let reports = store.fetch_stale(SCORER_VERSION, offset, limit).await?;
    score_reports("rescore_stale", store, reports, offset, limit, budget).await
}

async fn score_reports(
    operation: &'static str,
    store: &dyn ReportStore,
    reports: Vec<skywatch_common::Report>,
    offset: u64,
    limit: u32,
    budget: Duration,
) -> Result<BatchSummary> {
    let start = Instant::now();
    let fetched = reports.len();

    let mut processed = 0u32;
    let mut updated = 0u32;
    let mut skipped = 0u32;
    let mut errored = 0u32;
    let mut budget_hit = false;

    for chunk in reports.chunks(SCORE_CHUNK) {
        if start.elapsed() >= budget {
            budget_hit = true;
            break;
        }
        for report in chunk {
            processed += 1;
            if !report.score_is_stale(SCORER_VERSION) {
                skipped += 1; // already current: business rule, not an error
                continue;
            }
            let assessment = assess(report, Utc::now());
            let fingerprint = report_fingerprint(report);
            match store
                .write_assessment(report.id, &assessment, &fingerprint)
                .await
            {
                Ok(()) => updated += 1,
                Err(e) => {
                    errored += 1;
                    warn!(report_id = %report.id, error = %e, "Failed to persist assessment");
                }
            }
        }
    }

    // Scored reports leave the stale/unscored set by themselves; only
    // errored items remain at this offset, so skip past them on resume.
    let cursor = Cursor {
        processed,
        next_offset: offset + errored as u64,
        done: !budget_hit && (fetched as u32) < limit,
    };

    let summary = BatchSummary {
        operation,
        processed,
        inserted: 0,
        updated,
        skipped,
        errored,
        cursor,
        elapsed_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        processed = summary.processed,
        updated = summary.updated,
        skipped = summary.skipped,
        errored = summary.errored,
        done = cursor.done,
        "{operation} complete"
    );
    Ok(summary)
}

/// Duplicate scan over one bounded window of the corpus: exact fingerprint
/// pass, then the weighted fuzzy pass, every emitted pair upserted
/// idempotently in canonical order.
pub async fn scan_duplicates(
    reports: &dyn ReportStore,
    duplicates: &dyn DuplicateStore,
    params: MatcherParams,
    offset: u64,
    limit: u32,
    budget: Duration,
) -> Result<BatchSummary> {
    let start = Instant::now();
    let window = reports.fetch_page(offset, limit).await?;
    let fetched = window.len();

    let matcher = DuplicateMatcher::new(params);
    let mut matches = matcher.exact_pass(&window);

    // The fuzzy pass is the expensive half; give it up cooperatively when
    // the budget is already gone and let the caller retry this window.
    if start.elapsed() < budget {
        matches.extend(matcher.fuzzy_pass(&window));
    } else {
        warn!(offset, "Budget exhausted before fuzzy pass; window will be rescanned");
        return Ok(BatchSummary {
            operation: "scan_duplicates",
            processed: fetched as u32,
            inserted: 0,
            updated: 0,
            skipped: 0,
            errored: 0,
            cursor: Cursor {
                processed: fetched as u32,
                next_offset: offset,
                done: false,
            },
            elapsed_ms: start.elapsed().as_millis() as u64,
        });
    }

    let mut inserted = 0u32;
    let mut updated = 0u32;
    let mut errored = 0u32;
    for m in &matches {
        debug_assert!(m.is_canonical());
        match duplicates.upsert_match(m).await {
            Ok(MatchWriteOutcome::Inserted) => inserted += 1,
            Ok(MatchWriteOutcome::Refreshed) => updated += 1,
            Err(e) => {
                errored += 1;
                warn!(
                    report_a = %m.report_a_id,
                    report_b = %m.report_b_id,
                    error = %e,
                    "Failed to persist duplicate match"
                );
            }
        }
    }

    let cursor = Cursor {
        processed: fetched as u32,
        next_offset: offset + fetched as u64,
        done: (fetched as u32) < limit,
    };
    let summary = BatchSummary {
        operation: "scan_duplicates",
        processed: fetched as u32,
        inserted,
        updated,
        skipped: 0,
        errored,
        cursor,
        elapsed_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        window = fetched,
        pairs = matches.len(),
        inserted,
        updated,
        errored,
        "Duplicate scan complete"
    );
    Ok(summary)
}
