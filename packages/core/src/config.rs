//! Static configuration for the submitting and processing sides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::job::Priority;

/// One value per priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerPriority<T> {
    pub realtime: T,
    pub normal: T,
    pub slow: T,
}

impl<T: Copy> PerPriority<T> {
    pub fn get(&self, priority: Priority) -> T {
        match priority {
            Priority::Realtime => self.realtime,
            Priority::Normal => self.normal,
            Priority::Slow => self.slow,
        }
    }
}

/// Bounded exponential backoff for bus calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms.max(base_ms)),
        }
    }

    /// Delay to wait after `failed_attempts` consecutive failures.
    ///
    /// Doubles from `base`, capped at `max`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Whether another attempt is allowed after `attempts` tries.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 100, 5_000)
    }
}

/// Configuration for the submitting side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Buffered count that triggers an immediate flush. Ignored for realtime.
    pub max_batch_size: PerPriority<usize>,
    /// Longest a job may wait before a forced flush. Ignored for realtime.
    pub max_linger_ms: PerPriority<u64>,
    /// Total publish attempts per batch.
    pub publish_retry_limit: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// How long an empty key stays in the arena before it is torn down.
    pub idle_eviction_ms: u64,
    /// Upper bound on simultaneously active keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_active_keys: Option<usize>,
    /// How many terminal job records are kept for status polling.
    pub status_retention: usize,
    /// Capacity of the batch event broadcast channel.
    pub event_capacity: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: PerPriority {
                realtime: 1,
                normal: 100,
                slow: 1_000,
            },
            max_linger_ms: PerPriority {
                realtime: 0,
                normal: 50,
                slow: 1_000,
            },
            publish_retry_limit: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 5_000,
            idle_eviction_ms: 30_000,
            max_active_keys: None,
            status_retention: 10_000,
            event_capacity: 1_024,
        }
    }
}

impl BatchingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for priority in [Priority::Normal, Priority::Slow] {
            if self.max_batch_size.get(priority) == 0 {
                return Err(ConfigError::ZeroBatchSize(priority.as_str()));
            }
            if self.max_linger_ms.get(priority) == 0 {
                return Err(ConfigError::ZeroLinger(priority.as_str()));
            }
        }
        if self.publish_retry_limit == 0 {
            return Err(ConfigError::ZeroRetryLimit);
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::BackoffRange {
                base: self.backoff_base_ms,
                max: self.backoff_max_ms,
            });
        }
        if self.max_active_keys == Some(0) {
            return Err(ConfigError::Zero("max_active_keys"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Zero("event_capacity"));
        }
        Ok(())
    }

    /// Size threshold for `priority`; realtime is always a singleton.
    pub fn batch_size(&self, priority: Priority) -> usize {
        if priority.is_realtime() {
            1
        } else {
            self.max_batch_size.get(priority).max(1)
        }
    }

    /// Linger for `priority`; `None` for realtime, which never waits.
    pub fn linger(&self, priority: Priority) -> Option<Duration> {
        if priority.is_realtime() {
            None
        } else {
            Some(Duration::from_millis(self.max_linger_ms.get(priority)))
        }
    }

    pub fn idle_eviction(&self) -> Duration {
        Duration::from_millis(self.idle_eviction_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.publish_retry_limit,
            self.backoff_base_ms,
            self.backoff_max_ms,
        )
    }
}

/// Configuration for the processing side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Callbacks allowed to run at once within a batch.
    pub processing_concurrency: usize,
    /// Per-job callback timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_timeout_ms: Option<u64>,
    /// Pause before polling again when the bus had nothing to deliver.
    pub consume_idle_ms: u64,
    /// Total attempts for result publish.
    pub publish_retry_limit: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub event_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            processing_concurrency: 1,
            processing_timeout_ms: None,
            consume_idle_ms: 100,
            publish_retry_limit: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 5_000,
            event_capacity: 1_024,
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing_concurrency == 0 {
            return Err(ConfigError::Zero("processing_concurrency"));
        }
        if self.processing_timeout_ms == Some(0) {
            return Err(ConfigError::Zero("processing_timeout_ms"));
        }
        if self.publish_retry_limit == 0 {
            return Err(ConfigError::ZeroRetryLimit);
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::BackoffRange {
                base: self.backoff_base_ms,
                max: self.backoff_max_ms,
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Zero("event_capacity"));
        }
        Ok(())
    }

    pub fn processing_timeout(&self) -> Option<Duration> {
        self.processing_timeout_ms.map(Duration::from_millis)
    }

    pub fn consume_idle(&self) -> Duration {
        Duration::from_millis(self.consume_idle_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.publish_retry_limit,
            self.backoff_base_ms,
            self.backoff_max_ms,
        )
    }
}
