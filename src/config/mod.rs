//! # AsyncSQL Configuration
//!
//! Tuning knobs for the scheduler, connection establishment, bounded retry and
//! cache defaults. Endpoint and credentials live in
//! [`ConnectionInfo`](crate::database::ConnectionInfo), not here.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use asyncsql_core::config::AsyncSqlConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // File first, then ASYNCSQL__SECTION__KEY environment overrides
//! let config = AsyncSqlConfig::load(Some("asyncsql.toml"))?;
//! assert!(config.connection.max_attempts >= 1);
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AsyncSqlError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AsyncSqlConfig {
    pub scheduler: SchedulerConfig,
    pub connection: ConnectionConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
}

/// Scheduler thread settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name given to the background thread
    pub thread_name: String,
    /// Pause between loop ticks in microseconds. `0` keeps the hot loop.
    pub idle_sleep_us: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: "asyncsql-scheduler".to_string(),
            idle_sleep_us: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn idle_sleep(&self) -> Option<Duration> {
        (self.idle_sleep_us > 0).then(|| Duration::from_micros(self.idle_sleep_us))
    }
}

/// Connection establishment settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Attempts made by the constructor before giving up
    pub max_attempts: u32,
    /// How long the constructor waits on each attempt
    pub attempt_timeout_ms: u64,
    /// Reconnect and resubmit failed tasks
    pub reconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout_ms: 10_000,
            reconnect: false,
        }
    }
}

impl ConnectionConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Bounded reconnect-and-resubmit policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// How many times one logical operation may be resubmitted
    pub max_resubmits: u32,
    /// Reconnect attempts made before a resubmission is abandoned
    pub reconnect_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_resubmits: 1,
            reconnect_attempts: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff for the given zero-based attempt, capped at `backoff_max_ms`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// Defaults applied to cached tables built from configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Row time-to-live in milliseconds. `None` means rows never expire.
    pub default_ttl_ms: Option<u64>,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_ms.map(Duration::from_millis)
    }
}

impl AsyncSqlConfig {
    /// Reject values the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.thread_name.trim().is_empty() {
            return Err(AsyncSqlError::Configuration(
                "scheduler.thread_name must not be empty".to_string(),
            ));
        }

        if self.connection.max_attempts == 0 {
            return Err(AsyncSqlError::Configuration(
                "connection.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.connection.attempt_timeout_ms == 0 {
            return Err(AsyncSqlError::Configuration(
                "connection.attempt_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(AsyncSqlError::Configuration(format!(
                "retry.backoff_base_ms ({}) exceeds retry.backoff_max_ms ({})",
                self.retry.backoff_base_ms, self.retry.backoff_max_ms
            )));
        }

        if self.cache.default_ttl_ms == Some(0) {
            return Err(AsyncSqlError::Configuration(
                "cache.default_ttl_ms must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Short-timeout configuration for tests
    pub fn for_test() -> Self {
        Self {
            connection: ConnectionConfig {
                max_attempts: 3,
                attempt_timeout_ms: 500,
                reconnect: false,
            },
            retry: RetryConfig {
                max_resubmits: 1,
                reconnect_attempts: 2,
                backoff_base_ms: 5,
                backoff_max_ms: 20,
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_connection_contract() {
        let config = AsyncSqlConfig::default();
        assert_eq!(config.connection.max_attempts, 3);
        assert_eq!(config.connection.attempt_timeout(), Duration::from_secs(10));
        assert_eq!(config.cache.default_ttl(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let retry = RetryConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            ..RetryConfig::default()
        };
        assert_eq!(retry.backoff_for(0), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(800));
        assert_eq!(retry.backoff_for(4), Duration::from_millis(1_000));
        assert_eq!(retry.backoff_for(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AsyncSqlConfig::default();
        config.connection.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(AsyncSqlError::Configuration(_))
        ));

        let mut config = AsyncSqlConfig::default();
        config.retry.backoff_base_ms = 10_000;
        assert!(config.validate().is_err());

        let mut config = AsyncSqlConfig::default();
        config.cache.default_ttl_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_idle_sleep_zero_keeps_hot_loop() {
        assert_eq!(SchedulerConfig::default().idle_sleep(), None);
        let config = SchedulerConfig {
            idle_sleep_us: 250,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.idle_sleep(), Some(Duration::from_micros(250)));
    }
}
