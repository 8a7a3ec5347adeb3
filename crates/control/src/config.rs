//! Control plane configuration

use std::time::Duration;

use nodewatch_executor::duration_millis;
use nodewatch_executor::{RetryConfig, WorkerPoolConfig};
use serde::{Deserialize, Serialize};

/// Tunables of the control plane
///
/// # Example
///
/// ```
/// use nodewatch_control::ControlConfig;
/// use std::time::Duration;
///
/// let config = ControlConfig::default()
///     .with_task_timeout(Duration::from_secs(30))
///     .with_event_queue_capacity(128);
///
/// assert_eq!(config.task_timeout, Duration::from_secs(30));
/// assert_eq!(config.pool.workers, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Worker pool running pipeline lifecycle work
    pub pool: WorkerPoolConfig,

    /// Upper bound on one add/update/delete job
    #[serde(with = "duration_millis")]
    pub task_timeout: Duration,

    /// Capacity of the pipeline manager's event queue
    pub event_queue_capacity: usize,

    /// Capacity of the route registration channel
    pub route_channel_capacity: usize,

    /// Retry policy of hot-reload operations
    pub retry: RetryConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            pool: WorkerPoolConfig::default().with_name("pipelines"),
            task_timeout: Duration::from_secs(60),
            event_queue_capacity: 64,
            route_channel_capacity: 16,
            retry: RetryConfig::default(),
        }
    }
}

impl ControlConfig {
    pub fn with_pool(mut self, pool: WorkerPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    pub fn with_route_channel_capacity(mut self, capacity: usize) -> Self {
        self.route_channel_capacity = capacity;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ControlConfig =
            serde_json::from_str(r#"{ "task_timeout": 5000, "retry": { "max_attempts": 3, "initial_interval": 10, "max_interval": 100, "attempt_timeout": 1000 } }"#)
                .unwrap();
        assert_eq!(config.task_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.event_queue_capacity, 64);
        assert_eq!(config.pool.name, "pipelines");
    }
}
