//! Periodic retention sweeps.
//!
//! Every retention-governed table is cleaned the same way: on a timer,
//! compute a cutoff from the retention window and delete what is older.
//! [`PeriodicSweeper`] owns the timer; a [`RetentionSweep`] owns the delete.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use carebase_core::clock::Clock;
use carebase_core::config::RetentionConfig;
use carebase_core::error::{ConfigError, OutboxError};
use carebase_core::metrics::MetricsRecorder;
use carebase_core::store::{AuditLogStore, OutboxStore};

/// A delete-before-cutoff operation against one table.
#[async_trait]
pub trait RetentionSweep: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Deletes expired rows older than `cutoff`. Returns the number deleted.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError>;
}

/// Deletes delivered outbox rows.
pub struct ProcessedEventSweep {
    store: Arc<dyn OutboxStore>,
}

impl ProcessedEventSweep {
    /// Creates a sweep over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RetentionSweep for ProcessedEventSweep {
    fn name(&self) -> &'static str {
        "outbox_processed"
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError> {
        self.store.delete_processed_before(cutoff).await
    }
}

/// Deletes expired audit log entries.
pub struct AuditLogSweep {
    store: Arc<dyn AuditLogStore>,
}

impl AuditLogSweep {
    /// Creates a sweep over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn AuditLogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RetentionSweep for AuditLogSweep {
    fn name(&self) -> &'static str {
        "audit_logs"
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError> {
        self.store.delete_before(cutoff).await
    }
}

/// Runs a [`RetentionSweep`] on its own timer.
pub struct PeriodicSweeper {
    sweep: Arc<dyn RetentionSweep>,
    config: RetentionConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl PeriodicSweeper {
    /// Creates a sweeper.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the interval or retention window is zero.
    pub fn new(
        sweep: Arc<dyn RetentionSweep>,
        config: RetentionConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            sweep,
            config,
            clock,
            metrics,
        })
    }

    /// Runs one sweep.
    ///
    /// # Errors
    ///
    /// Propagates the storage error of the underlying delete.
    #[instrument(skip(self), fields(sweep = self.sweep.name()))]
    pub async fn run_once(&self) -> Result<u64, OutboxError> {
        let cutoff = self.config.cutoff(self.clock.now());
        let deleted = self.sweep.delete_before(cutoff).await?;
        self.metrics.rows_swept(self.sweep.name(), deleted);

        if deleted > 0 {
            info!(deleted, %cutoff, "retention sweep completed");
        } else {
            debug!(%cutoff, "retention sweep found nothing to delete");
        }
        Ok(deleted)
    }

    /// Sweeps on the configured interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            sweep = self.sweep.name(),
            interval_secs = self.config.interval.as_secs(),
            retention_days = self.config.retention_days,
            "retention sweeper started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(sweep = self.sweep.name(), "retention sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(sweep = self.sweep.name(), error = %e, "retention sweep failed");
                    }
                }
            }
        }
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
