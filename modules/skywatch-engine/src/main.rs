use anyhow::Result;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use skywatch_analysis::MatcherParams;
use skywatch_common::Config;
use skywatch_engine::{
    aggregate_stats, migrate, rescore_stale, scan_duplicates, score_batch, DetectorParams,
    PatternOrchestrator, PgDuplicateStore, PgPatternStore, PgReportStore, RunMode,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("skywatch=info".parse()?))
        .init();

    info!("Skywatch pipeline starting...");

    let config = Config::from_env();
    config.log_redacted();

    let pool = PgPool::connect(&config.database_url).await?;
    migrate(&pool).await?;

    let reports = PgReportStore::new(pool.clone());
    let duplicates = PgDuplicateStore::new(pool.clone());
    let patterns = PgPatternStore::new(pool.clone());

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("stats");

    match command {
        "score" => {
            let limit = flag_value(&args, "--limit").unwrap_or(config.score_batch_size as u64) as u32;
            let offset = flag_value(&args, "--offset").unwrap_or(0);
            let summary = score_batch(&reports, offset, limit, config.time_budget).await?;
            println!("{summary}");
        }
        "rescore" => {
            let limit = flag_value(&args, "--limit").unwrap_or(config.score_batch_size as u64) as u32;
            let offset = flag_value(&args, "--offset").unwrap_or(0);
            let summary = rescore_stale(&reports, offset, limit, config.time_budget).await?;
            println!("{summary}");
        }
        "dedup" => {
            let limit = flag_value(&args, "--limit").unwrap_or(config.dedup_scan_limit as u64) as u32;
            let offset = flag_value(&args, "--offset").unwrap_or(0);
            let summary = scan_duplicates(
                &reports,
                &duplicates,
                MatcherParams::default(),
                offset,
                limit,
                config.time_budget,
            )
            .await?;
            println!("{summary}");
        }
        "patterns" => {
            let mode = if args.iter().any(|a| a == "--incremental") {
                RunMode::Incremental
            } else {
                RunMode::Full
            };
            let orchestrator =
                PatternOrchestrator::new(&reports, &patterns, DetectorParams::default());
            let summary = orchestrator.run(mode).await?;
            println!("{summary}");
        }
        "stats" => {
            let stats = aggregate_stats(&reports, &duplicates).await?;
            println!("{stats}");
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!("Usage: skywatch <score|rescore|dedup|patterns|stats> [--limit N] [--offset N] [--incremental]");
            std::process::exit(2);
        }
    }

    Ok(())
}

/// Parse `--flag N` from the argument list.
fn flag_value(args: &[String], flag: &str) -> Option<u64> {
    let idx = args.iter().position(|a| a == flag)?;
    args.get(idx + 1)?.parse().ok()
}
