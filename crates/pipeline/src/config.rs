// crates/pipeline/src/config.rs
//! Pipeline tuning knobs.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default interval at which each stream subscriber polls the job store.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default idle time before a subscriber emits a keepalive.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for the orchestrator and progress publisher.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Jobs allowed to execute stages at the same time.
    pub max_concurrent_jobs: usize,
    /// Jobs allowed to wait in `Queued` for an execution slot.
    pub max_queued_jobs: usize,
    /// Root directory under which each job gets its own work directory.
    pub output_root: PathBuf,
    /// Simulated work time per stage for the placeholder executors.
    pub stage_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_concurrent_jobs: 2,
            max_queued_jobs: 16,
            output_root: std::env::temp_dir().join("reelforge"),
            stage_delay: Duration::from_millis(750),
        }
    }
}

impl PipelineConfig {
    /// Read overrides from `REELFORGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, falling back to defaults
    /// for missing or unparseable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse_ms = |key: &str, fallback: Duration| {
            parse::<u64>(&lookup, key)
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        Self {
            poll_interval: parse_ms("REELFORGE_POLL_INTERVAL_MS", defaults.poll_interval),
            heartbeat_interval: parse::<u64>(&lookup, "REELFORGE_HEARTBEAT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            max_concurrent_jobs: parse(&lookup, "REELFORGE_MAX_CONCURRENT_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs),
            max_queued_jobs: parse(&lookup, "REELFORGE_MAX_QUEUED_JOBS")
                .unwrap_or(defaults.max_queued_jobs),
            output_root: lookup("REELFORGE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_root),
            stage_delay: parse_ms("REELFORGE_STAGE_DELAY_MS", defaults.stage_delay),
        }
    }

    /// Execution slots actually granted; zero would deadlock every job.
    pub fn execution_slots(&self) -> usize {
        self.max_concurrent_jobs.max(1)
    }

    /// Upper bound on jobs that are `Queued` or `Running` at once.
    pub fn admission_limit(&self) -> usize {
        self.execution_slots() + self.max_queued_jobs
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable config value");
            None
        }
    }
}
