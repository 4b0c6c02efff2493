//! # Engine Configuration
//!
//! Typed configuration for the command executor, SLA calculator, event dispatch and
//! coordinator materialization. Values are layered by [`ConfigManager`]: compiled
//! defaults, then an optional TOML file, then `JOBFLOW__SECTION__KEY` environment
//! variables.
//!
//! ```rust,no_run
//! use jobflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let capacity = manager.config().sla.capacity;
//! let workers = manager.config().executor.workers;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::defaults;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Command queue and worker pool settings
    pub executor: ExecutorConfig,

    /// SLA calculator settings
    pub sla: SlaConfig,

    /// Event dispatch settings
    pub events: EventsConfig,

    /// Coordinator materialization settings
    pub coordinator: CoordinatorConfig,
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.executor.workers == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.workers",
                self.executor.workers,
                "at least one worker is required",
            ));
        }
        if self.executor.queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.queue_capacity",
                self.executor.queue_capacity,
                "queue capacity must be positive",
            ));
        }
        if self.executor.retry_backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "executor.retry_backoff_multiplier",
                self.executor.retry_backoff_multiplier,
                "multiplier must be >= 1.0",
            ));
        }
        if self.sla.capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "sla.capacity",
                self.sla.capacity,
                "SLA capacity must be positive",
            ));
        }
        if self.sla.sweep_interval_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "sla.sweep_interval_secs",
                self.sla.sweep_interval_secs,
                "sweep interval must be positive",
            ));
        }
        Ok(())
    }
}

/// Command executor configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of worker tasks draining the queue
    pub workers: usize,
    /// Maximum number of queued commands
    pub queue_capacity: usize,
    /// Retries for retryable command failures
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub retry_max_delay_ms: u64,
    /// Poll interval while a synchronous `call` waits for a locked entity key
    pub lock_retry_delay_ms: u64,
    /// Upper bound for synchronous `call` lock acquisition
    pub lock_timeout_ms: u64,
    /// Idle wait when the queue is empty
    pub idle_poll_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 10_000,
            max_retries: 3,
            retry_initial_delay_ms: 500,
            retry_backoff_multiplier: 2.0,
            retry_max_delay_ms: 30_000,
            lock_retry_delay_ms: 25,
            lock_timeout_ms: 5_000,
            idle_poll_ms: 200,
        }
    }
}

impl ExecutorConfig {
    /// Backoff delay before retry number `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.retry_initial_delay_ms as f64 * self.retry_backoff_multiplier.powi(exponent);
        Duration::from_millis((delay as u64).min(self.retry_max_delay_ms))
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

/// SLA calculator configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SlaConfig {
    pub enabled: bool,
    /// Maximum number of live entries in the calculator map
    pub capacity: usize,
    /// Grace period added to every sweep deadline comparison
    pub job_event_latency_ms: i64,
    /// Restart recovery only reads summaries modified within this many days
    pub events_modified_after_days: i64,
    pub sweep_interval_secs: u64,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: defaults::SLA_CAPACITY,
            job_event_latency_ms: defaults::SLA_JOB_EVENT_LATENCY_MS,
            events_modified_after_days: defaults::SLA_EVENTS_MODIFIED_AFTER_DAYS,
            sweep_interval_secs: 30,
        }
    }
}

impl SlaConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Event dispatch configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub enabled: bool,
    /// Buffer of the SLA event broadcast channel
    pub sla_channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sla_channel_capacity: 1000,
        }
    }
}

/// Coordinator materialization configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How far past "now" actions are materialized
    pub materialization_window_secs: i64,
    /// Period of the background materialization trigger
    pub materialization_interval_secs: u64,
    /// Re-check delay for actions with missing input dependencies
    pub input_check_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            materialization_window_secs: 3600,
            materialization_interval_secs: 300,
            input_check_interval_ms: 60_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn materialization_interval(&self) -> Duration {
        Duration::from_secs(self.materialization_interval_secs)
    }

    pub fn input_check_interval(&self) -> Duration {
        Duration::from_millis(self.input_check_interval_ms)
    }
}
