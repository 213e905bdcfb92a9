//! Prefetch worker configuration
//!
//! Durations are written in humantime form (`500ms`, `30s`) in config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::prefetch;
use crate::errors::{ConfigError, ConfigResult};

/// Configuration for the prefetch worker loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Sleep after an empty or busy poll, doubled on each consecutive one
    #[serde(with = "humantime_serde")]
    pub idle_sleep: Duration,
    /// Maximum idle sleep
    #[serde(with = "humantime_serde")]
    pub max_idle_sleep: Duration,
    /// Sleep after an unexpected error
    #[serde(with = "humantime_serde")]
    pub error_sleep: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            idle_sleep: prefetch::DEFAULT_IDLE_SLEEP,
            max_idle_sleep: prefetch::DEFAULT_MAX_IDLE_SLEEP,
            error_sleep: prefetch::DEFAULT_ERROR_SLEEP,
        }
    }
}

impl PrefetchConfig {
    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.idle_sleep.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "prefetch.idle_sleep".to_string(),
                value: format!("{:?}", self.idle_sleep),
                reason: "Idle sleep must be greater than zero".to_string(),
            });
        }
        if self.max_idle_sleep < self.idle_sleep {
            return Err(ConfigError::InvalidValue {
                field: "prefetch.max_idle_sleep".to_string(),
                value: format!("{:?}", self.max_idle_sleep),
                reason: "Maximum idle sleep must not be shorter than idle sleep".to_string(),
            });
        }
        Ok(())
    }

    /// Sleep after `empty_polls` consecutive polls without work
    pub fn idle_backoff(&self, empty_polls: u32) -> Duration {
        let shift = empty_polls.saturating_sub(1).min(prefetch::MAX_BACKOFF_SHIFT);
        self.idle_sleep
            .saturating_mul(1u32 << shift)
            .min(self.max_idle_sleep)
    }

    /// Short sleeps for tests
    pub fn testing() -> Self {
        Self {
            idle_sleep: Duration::from_millis(5),
            max_idle_sleep: Duration::from_millis(20),
            error_sleep: Duration::from_millis(5),
        }
    }
}
