use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Batch sizing
    pub score_batch_size: u32,
    pub dedup_scan_limit: u32,

    // Wall-clock budget per invocation. The pipeline self-terminates at a
    // batch boundary before an external scheduler timeout would kill it.
    pub time_budget: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            score_batch_size: parsed_env("SCORE_BATCH_SIZE", 200),
            dedup_scan_limit: parsed_env("DEDUP_SCAN_LIMIT", 500),
            time_budget: Duration::from_secs(parsed_env("TIME_BUDGET_SECS", 300)),
        }
    }

    /// Log the non-secret parts of the config.
    pub fn log_redacted(&self) {
        tracing::info!(
            score_batch_size = self.score_batch_size,
            dedup_scan_limit = self.dedup_scan_limit,
            time_budget_secs = self.time_budget.as_secs(),
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
