//! Storage abstractions for the outbox and audit log.
//!
//! The claim protocol is expressed through [`ClaimedBatch`]: a batch holds the
//! row locks of an open storage transaction. Status changes are staged on the
//! batch and only take effect on [`ClaimedBatch::commit`]. Dropping a batch
//! without committing rolls everything back and releases the rows for the
//! next poller, which is what makes a crashed worker harmless.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::AuditLogEntry;
use crate::error::OutboxError;
use crate::event::{DeadLetterEvent, NewOutboxEvent, OutboxEvent, StatusCounts};

/// Durable event store with a concurrent-safe claim protocol.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persists a new `pending` row stamped at `now`.
    ///
    /// # Errors
    ///
    /// `OutboxError::Validation` for a malformed request, `OutboxError::Storage`
    /// if the write fails.
    async fn create(
        &self,
        event: NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, OutboxError>;

    /// Claims up to `batch_size` due rows, oldest first, skipping rows already
    /// claimed by another open batch.
    async fn claim_batch(
        &self,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Box<dyn ClaimedBatch>, OutboxError>;

    /// Loads one active row.
    async fn get(&self, id: Uuid) -> Result<OutboxEvent, OutboxError>;

    /// Lists the most recently escalated dead-letter records.
    async fn list_dead_letters(&self, limit: u32) -> Result<Vec<DeadLetterEvent>, OutboxError>;

    /// Counts active rows per status plus the dead-letter backlog.
    async fn status_counts(&self) -> Result<StatusCounts, OutboxError>;

    /// Deletes `processed` rows whose `processed_at` is before `cutoff`.
    /// Returns the number of rows deleted.
    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError>;
}

/// Rows locked by one worker for the lifetime of a storage transaction.
#[async_trait]
pub trait ClaimedBatch: Send {
    /// The claimed rows in claim order.
    fn events(&self) -> &[OutboxEvent];

    /// Marks a row `processed`, stamps `processed_at` and clears the error.
    async fn mark_processed(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<(), OutboxError>;

    /// Moves a row to `retry` with its new count, next eligibility time and
    /// failure reason.
    async fn schedule_retry(
        &mut self,
        id: Uuid,
        retry_count: u32,
        retry_at: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxError>;

    /// Copies a row to the dead-letter store and deletes it from the active
    /// store, in the same transaction as the rest of the batch.
    async fn move_to_dead_letter(&mut self, dead: &DeadLetterEvent) -> Result<(), OutboxError>;

    /// Commits every staged change and releases the claim.
    ///
    /// # Errors
    ///
    /// On failure none of the batch's changes take effect.
    async fn commit(self: Box<Self>) -> Result<(), OutboxError>;
}

/// Append-only audit trail with retention.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    /// Appends an entry.
    async fn record(&self, entry: &AuditLogEntry) -> Result<(), OutboxError>;

    /// Deletes entries created before `cutoff`. Returns the number deleted.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError>;
}
