//! `PostgreSQL` implementation of the `OutboxStore` trait.
//!
//! Claiming uses `SELECT ... FOR UPDATE SKIP LOCKED` inside a transaction
//! that stays open until the worker commits the batch. The row locks are the
//! claim: concurrent pollers skip them, and a rollback (explicit, on drop, or
//! because the process died) makes them claimable again with no cleanup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnection;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use carebase_core::error::OutboxError;
use carebase_core::event::{
    DeadLetterEvent, EventStatus, NewOutboxEvent, OutboxEvent, StatusCounts,
};
use carebase_core::store::{ClaimedBatch, OutboxStore};

use crate::rows::{
    DeadLetterRow, OUTBOX_COLUMNS, OutboxRow, count_to_db, storage_error,
};

/// PostgreSQL-backed outbox store.
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    /// Creates a new `PgOutboxStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Writes a `pending` row inside a producer's own transaction, so the
    /// event commits or rolls back together with the domain mutation.
    ///
    /// # Errors
    ///
    /// `OutboxError::Validation` for a malformed request, `OutboxError::Storage`
    /// if the insert fails.
    pub async fn create_in_transaction(
        tx: &mut Transaction<'_, Postgres>,
        event: NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, OutboxError> {
        let event = OutboxEvent::new_pending(event, now)?;
        insert_event(&mut **tx, &event).await?;
        Ok(event)
    }
}

async fn insert_event(conn: &mut PgConnection, event: &OutboxEvent) -> Result<(), OutboxError> {
    sqlx::query(
        r"
        INSERT INTO outbox_events
            (id, event_type, payload, headers, status, retry_count,
             error_message, retry_at, created_at, updated_at, processed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ",
    )
    .bind(event.id)
    .bind(&event.event_type)
    .bind(&event.payload)
    .bind(Json(&event.headers))
    .bind(event.status.as_str())
    .bind(count_to_db(event.retry_count)?)
    .bind(event.error_message.as_deref())
    .bind(event.retry_at)
    .bind(event.created_at)
    .bind(event.updated_at)
    .bind(event.processed_at)
    .execute(conn)
    .await
    .map_err(storage_error)?;

    Ok(())
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn create(
        &self,
        event: NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, OutboxError> {
        let event = OutboxEvent::new_pending(event, now)?;
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        insert_event(&mut conn, &event).await?;
        debug!(event_id = %event.id, event_type = %event.event_type, "outbox event created");
        Ok(event)
    }

    async fn claim_batch(
        &self,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Box<dyn ClaimedBatch>, OutboxError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let sql = format!(
            r"
            SELECT {OUTBOX_COLUMNS}
            FROM outbox_events
            WHERE status IN ('pending', 'retry')
              AND (retry_at IS NULL OR retry_at <= $1)
            ORDER BY created_at, id
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "
        );
        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(now)
            .bind(i64::from(batch_size))
            .fetch_all(&mut *tx)
            .await
            .map_err(storage_error)?;

        let events = rows
            .into_iter()
            .map(OutboxEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(claimed = events.len(), batch_size, "claimed outbox batch");

        Ok(Box::new(PgClaimedBatch { tx, events }))
    }

    async fn get(&self, id: Uuid) -> Result<OutboxEvent, OutboxError> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox_events WHERE id = $1");
        let row: Option<OutboxRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.ok_or(OutboxError::NotFound(id))?.try_into()
    }

    async fn list_dead_letters(&self, limit: u32) -> Result<Vec<DeadLetterEvent>, OutboxError> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            r"
            SELECT id, event_type, payload, headers, error_message, retry_count,
                   created_at, dead_lettered_at
            FROM outbox_dead_letters
            ORDER BY dead_lettered_at DESC, id
            LIMIT $1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(DeadLetterEvent::try_from).collect()
    }

    async fn status_counts(&self) -> Result<StatusCounts, OutboxError> {
        let by_status: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM outbox_events GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(storage_error)?;
        let (dead_lettered,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox_dead_letters")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        let mut counts = StatusCounts {
            dead_lettered: u64::try_from(dead_lettered).unwrap_or_default(),
            ..StatusCounts::default()
        };
        for (status, count) in by_status {
            let count = u64::try_from(count).unwrap_or_default();
            match status.parse::<EventStatus>()? {
                EventStatus::Pending => counts.pending = count,
                EventStatus::Retry => counts.retry = count,
                EventStatus::Processed => counts.processed = count,
                EventStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE status = 'processed' AND processed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected())
    }
}

/// A claimed batch backed by an open PostgreSQL transaction.
///
/// Dropping it without calling `commit` rolls the transaction back.
pub struct PgClaimedBatch {
    tx: Transaction<'static, Postgres>,
    events: Vec<OutboxEvent>,
}

impl PgClaimedBatch {
    fn ensure_claimed(&self, id: Uuid) -> Result<(), OutboxError> {
        if self.events.iter().any(|e| e.id == id) {
            Ok(())
        } else {
            Err(OutboxError::Validation(format!(
                "event {id} is not part of this claimed batch"
            )))
        }
    }
}

#[async_trait]
impl ClaimedBatch for PgClaimedBatch {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_processed(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<(), OutboxError> {
        self.ensure_claimed(id)?;
        let result = sqlx::query(
            r"
            UPDATE outbox_events
            SET status = 'processed',
                processed_at = $2,
                updated_at = $2,
                error_message = NULL,
                retry_at = NULL
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn schedule_retry(
        &mut self,
        id: Uuid,
        retry_count: u32,
        retry_at: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        self.ensure_claimed(id)?;
        let result = sqlx::query(
            r"
            UPDATE outbox_events
            SET status = 'retry',
                retry_count = $2,
                retry_at = $3,
                error_message = $4,
                updated_at = $5
            WHERE id = $1 AND retry_count < $2
            ",
        )
        .bind(id)
        .bind(count_to_db(retry_count)?)
        .bind(retry_at)
        .bind(error_message)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::Storage(format!(
                "retry_count for event {id} must increase to {retry_count}"
            )));
        }
        Ok(())
    }

    async fn move_to_dead_letter(&mut self, dead: &DeadLetterEvent) -> Result<(), OutboxError> {
        self.ensure_claimed(dead.id)?;
        sqlx::query(
            r"
            INSERT INTO outbox_dead_letters
                (id, event_type, payload, headers, error_message, retry_count,
                 created_at, dead_lettered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(dead.id)
        .bind(&dead.event_type)
        .bind(&dead.payload)
        .bind(Json(&dead.headers))
        .bind(&dead.error_message)
        .bind(count_to_db(dead.retry_count)?)
        .bind(dead.created_at)
        .bind(dead.dead_lettered_at)
        .execute(&mut *self.tx)
        .await
        .map_err(storage_error)?;

        let deleted = sqlx::query("DELETE FROM outbox_events WHERE id = $1")
            .bind(dead.id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_error)?;

        if deleted.rows_affected() == 0 {
            return Err(OutboxError::NotFound(dead.id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), OutboxError> {
        self.tx.commit().await.map_err(storage_error)
    }
}
