pub mod batch;
pub mod orchestrator;
pub mod stats_op;
pub mod store;
pub mod traits;

pub use batch::{rescore_stale, scan_duplicates, score_batch, BatchSummary, Cursor};
pub use orchestrator::{
    DetectorParams, PatternOrchestrator, RunMode, RunSummary, DETECTOR_VERSION,
};
pub use stats_op::{aggregate_stats, AggregateStats};
pub use store::{migrate, PgDuplicateStore, PgPatternStore, PgReportStore};
pub use traits::{DuplicateStore, MatchWriteOutcome, PatternStore, ReportStore, ScoreStats};
