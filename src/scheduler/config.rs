//! Scheduler configuration.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the task scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between backlog polls.
    pub poll_interval: Duration,
    /// Maximum number of tasks running at once.
    pub max_concurrent_tasks: usize,
    /// Maximum number of transient-retry requeues per task.
    pub max_retries: u32,
    /// Base of the exponential retry backoff.
    pub backoff_base: Duration,
    /// Upper bound on the retry backoff.
    pub backoff_cap: Duration,
    /// How long `stop` waits for in-flight runs before returning.
    pub shutdown_grace: Duration,
    /// Age of the last write after which a `RUNNING` task is considered
    /// abandoned by a dead worker.
    pub stale_after: Duration,
    /// Expected upper bound on one pipeline run; the health check flags
    /// tasks running longer than twice this.
    pub task_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_concurrent_tasks: 2,
            max_retries: 3,
            backoff_base: Duration::from_secs(10),
            backoff_cap: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(30),
            stale_after: Duration::from_secs(600),
            task_timeout: Duration::from_secs(600),
        }
    }
}

impl SchedulerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SCHEDULER_POLL_INTERVAL_SECS`: backlog poll interval (default: 5)
    /// - `SCHEDULER_MAX_CONCURRENT_TASKS`: concurrent task cap (default: 2)
    /// - `SCHEDULER_MAX_RETRIES`: transient retry cap (default: 3)
    /// - `SCHEDULER_BACKOFF_BASE_SECS`: retry backoff base (default: 10)
    /// - `SCHEDULER_BACKOFF_CAP_SECS`: retry backoff cap (default: 300)
    /// - `SCHEDULER_SHUTDOWN_GRACE_SECS`: shutdown grace period (default: 30)
    /// - `SCHEDULER_STALE_AFTER_SECS`: stale-task threshold (default: 600)
    /// - `SCHEDULER_TASK_TIMEOUT_SECS`: expected run-time bound (default: 600)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SCHEDULER_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "SCHEDULER_POLL_INTERVAL_SECS")?;
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SCHEDULER_MAX_CONCURRENT_TASKS") {
            config.max_concurrent_tasks = parse_env_value(&val, "SCHEDULER_MAX_CONCURRENT_TASKS")?;
        }

        if let Ok(val) = std::env::var("SCHEDULER_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "SCHEDULER_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("SCHEDULER_BACKOFF_BASE_SECS") {
            let secs: u64 = parse_env_value(&val, "SCHEDULER_BACKOFF_BASE_SECS")?;
            config.backoff_base = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SCHEDULER_BACKOFF_CAP_SECS") {
            let secs: u64 = parse_env_value(&val, "SCHEDULER_BACKOFF_CAP_SECS")?;
            config.backoff_cap = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SCHEDULER_SHUTDOWN_GRACE_SECS") {
            let secs: u64 = parse_env_value(&val, "SCHEDULER_SHUTDOWN_GRACE_SECS")?;
            config.shutdown_grace = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SCHEDULER_STALE_AFTER_SECS") {
            let secs: u64 = parse_env_value(&val, "SCHEDULER_STALE_AFTER_SECS")?;
            config.stale_after = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SCHEDULER_TASK_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "SCHEDULER_TASK_TIMEOUT_SECS")?;
            config.task_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the backlog poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the concurrent task cap.
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Sets the transient retry cap.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Sets the retry backoff base and cap.
    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the stale-task threshold.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Sets the expected run-time bound.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Computes the backoff delay before retry number `retry_count + 1`.
    ///
    /// Exponential in the retry count, capped at `backoff_cap`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if the poll interval is zero
    /// or the concurrency cap is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be positive".to_string(),
            ));
        }

        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{}", e),
    })
}
