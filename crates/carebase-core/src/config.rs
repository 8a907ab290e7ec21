//! Worker configuration.
//!
//! Every knob is required. There are no implicit defaults: an absent or zero
//! value is a [`ConfigError`] at construction time.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ConfigError;

/// Settings for the delivery worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Maximum rows claimed per poll.
    pub batch_size: u32,
    /// Time between polls.
    pub poll_interval: Duration,
    /// Limit for both the in-process attempts and the persisted retry count.
    pub retry_attempts: u32,
    /// Base delay for both retry tiers.
    pub retry_delay: Duration,
}

impl WorkerConfig {
    /// Checks that every knob is usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first zero-valued knob.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(must_be_positive("OUTBOX_BATCH_SIZE"));
        }
        if self.poll_interval.is_zero() {
            return Err(must_be_positive("OUTBOX_POLL_INTERVAL_MS"));
        }
        if self.retry_attempts == 0 {
            return Err(must_be_positive("OUTBOX_RETRY_ATTEMPTS"));
        }
        if self.retry_delay.is_zero() {
            return Err(must_be_positive("OUTBOX_RETRY_DELAY_MS"));
        }
        Ok(())
    }
}

/// Settings for one periodic retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Rows older than this many days are deleted.
    pub retention_days: u32,
}

impl RetentionConfig {
    /// Checks that both knobs are usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if either knob is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(must_be_positive("cleanup interval"));
        }
        if self.retention_days == 0 {
            return Err(must_be_positive("retention days"));
        }
        Ok(())
    }

    /// Oldest timestamp that survives a sweep run at `now`.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(i64::from(self.retention_days))
    }
}

fn must_be_positive(key: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: "must be greater than zero".into(),
    }
}
