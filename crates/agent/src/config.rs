// Agent configuration
//
// Read from NODEWATCH_* environment variables (a .env file is loaded first by main).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use nodewatch_control::ControlConfig;
use nodewatch_executor::{RetryConfig, WorkerPoolConfig};

/// Process-level configuration of the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Directory holding one YAML module per file
    pub modules_dir: PathBuf,
    /// Listen address of the admin/scrape server
    pub http_addr: String,
    /// How often the modules directory is rescanned
    pub watch_interval: Duration,
    /// Control plane settings
    pub control: ControlConfig,
}

impl AgentConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `NODEWATCH_MODULES_DIR`: module directory (default: "./modules")
    /// - `NODEWATCH_HTTP_ADDR`: listen address (default: "0.0.0.0:9100")
    /// - `NODEWATCH_WORKERS`: worker pool size (default: 4)
    /// - `NODEWATCH_QUEUE_CAPACITY`: worker pool queue capacity (default: 64)
    /// - `NODEWATCH_TASK_TIMEOUT_SECS`: per-task timeout of pipeline work (default: 60)
    /// - `NODEWATCH_RETRY_BASE_MS`: first retry delay (default: 1000)
    /// - `NODEWATCH_RETRY_MAX_MS`: retry delay cap (default: 30000)
    /// - `NODEWATCH_RETRY_MAX_ATTEMPTS`: attempts per reload, 0 = unlimited (default: 0)
    /// - `NODEWATCH_RETRY_ATTEMPT_TIMEOUT_SECS`: upper bound of one attempt (default: 90)
    /// - `NODEWATCH_WATCH_INTERVAL_SECS`: directory rescan interval (default: 10)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse = |key: &str, default: u64| parse_var(&lookup, key, default);

        let pool = WorkerPoolConfig::default()
            .with_name("pipelines")
            .with_workers(parse_var(&lookup, "NODEWATCH_WORKERS", 4usize)?)
            .with_queue_capacity(parse_var(&lookup, "NODEWATCH_QUEUE_CAPACITY", 64usize)?);
        pool.validate().context("Invalid worker pool configuration")?;

        let retry = RetryConfig::default()
            .with_initial_interval(Duration::from_millis(parse("NODEWATCH_RETRY_BASE_MS", 1000)?))
            .with_max_interval(Duration::from_millis(parse("NODEWATCH_RETRY_MAX_MS", 30_000)?))
            .with_max_attempts(parse_var(&lookup, "NODEWATCH_RETRY_MAX_ATTEMPTS", 0u32)?)
            .with_attempt_timeout(Duration::from_secs(parse(
                "NODEWATCH_RETRY_ATTEMPT_TIMEOUT_SECS",
                90,
            )?));

        let control = ControlConfig::default()
            .with_pool(pool)
            .with_task_timeout(Duration::from_secs(parse("NODEWATCH_TASK_TIMEOUT_SECS", 60)?))
            .with_retry(retry);

        let watch_interval = Duration::from_secs(parse("NODEWATCH_WATCH_INTERVAL_SECS", 10)?);
        if watch_interval.is_zero() {
            anyhow::bail!("NODEWATCH_WATCH_INTERVAL_SECS must be greater than 0");
        }

        Ok(Self {
            modules_dir: lookup("NODEWATCH_MODULES_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./modules")),
            http_addr: lookup("NODEWATCH_HTTP_ADDR")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "0.0.0.0:9100".to_string()),
            watch_interval,
            control,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        _ => Ok(default),
    }
}
