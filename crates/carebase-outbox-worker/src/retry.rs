//! Two-tier retry policy.
//!
//! The immediate tier retries a publish inside the worker with linear backoff
//! (`attempt * retry_delay`). Its total backoff per event is capped at one
//! poll interval, because the claim transaction holds the row locks while it
//! sleeps. The deferred tier persists `retry_count` and `retry_at` so the row
//! is picked up again by a later poll.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};

use carebase_core::broker::{Broker, BrokerError};
use carebase_core::config::WorkerConfig;
use carebase_core::event::OutboxEvent;
use carebase_core::metrics::MetricsRecorder;

/// Retry limits and delays derived from the worker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
    immediate_budget: Duration,
}

impl RetryPolicy {
    /// Builds the policy for a validated configuration.
    #[must_use]
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            delay: config.retry_delay,
            immediate_budget: config.poll_interval,
        }
    }

    /// Sleep before in-process attempt `attempt + 1`.
    #[must_use]
    pub fn immediate_backoff(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt)
    }

    /// Earliest re-claim time for a row that has now failed `retry_count`
    /// poll cycles.
    #[must_use]
    pub fn next_retry_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.delay.saturating_mul(retry_count))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether a row with `retry_count` failed cycles must be dead-lettered.
    #[must_use]
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.attempts
    }

    /// Publishes `event`, retrying in-process until the attempt limit or the
    /// backoff budget runs out. Returns the last broker error on failure.
    pub async fn publish(
        &self,
        broker: &dyn Broker,
        event: &OutboxEvent,
        metrics: &dyn MetricsRecorder,
    ) -> Result<(), BrokerError> {
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            let err = match broker
                .publish(&event.event_type, &event.payload, &event.headers)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            metrics.publish_attempt_failed(&event.event_type);

            if attempt >= self.attempts {
                return Err(err);
            }

            let backoff = self.immediate_backoff(attempt);
            if started.elapsed() + backoff > self.immediate_budget {
                debug!(
                    event_id = %event.id,
                    attempt,
                    backoff_ms = backoff.as_millis(),
                    "in-process retry budget exhausted, deferring to next poll"
                );
                return Err(err);
            }

            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                attempt,
                backoff_ms = backoff.as_millis(),
                error = %err,
                "publish failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}
