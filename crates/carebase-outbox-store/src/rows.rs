//! Row mappings between PostgreSQL and the core record types.

use carebase_core::error::OutboxError;
use carebase_core::event::{DeadLetterEvent, EventStatus, Headers, OutboxEvent};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

/// Column list shared by every query returning full outbox rows.
pub(crate) const OUTBOX_COLUMNS: &str = "id, event_type, payload, headers, status, retry_count, \
     error_message, retry_at, created_at, updated_at, processed_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OutboxRow {
    id: Uuid,
    event_type: String,
    payload: Vec<u8>,
    headers: Json<Headers>,
    status: String,
    retry_count: i32,
    error_message: Option<String>,
    retry_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxEvent {
    type Error = OutboxError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            event_type: row.event_type,
            payload: row.payload,
            headers: row.headers.0,
            status: row.status.parse::<EventStatus>()?,
            retry_count: count_from_db(row.retry_count)?,
            error_message: row.error_message,
            retry_at: row.retry_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DeadLetterRow {
    id: Uuid,
    event_type: String,
    payload: Vec<u8>,
    headers: Json<Headers>,
    error_message: String,
    retry_count: i32,
    created_at: DateTime<Utc>,
    dead_lettered_at: DateTime<Utc>,
}

impl TryFrom<DeadLetterRow> for DeadLetterEvent {
    type Error = OutboxError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            event_type: row.event_type,
            payload: row.payload,
            headers: row.headers.0,
            error_message: row.error_message,
            retry_count: count_from_db(row.retry_count)?,
            created_at: row.created_at,
            dead_lettered_at: row.dead_lettered_at,
        })
    }
}

pub(crate) fn count_from_db(value: i32) -> Result<u32, OutboxError> {
    u32::try_from(value)
        .map_err(|_| OutboxError::Storage(format!("negative retry_count in storage: {value}")))
}

pub(crate) fn count_to_db(value: u32) -> Result<i32, OutboxError> {
    i32::try_from(value)
        .map_err(|_| OutboxError::Storage(format!("retry_count out of range: {value}")))
}

pub(crate) fn storage_error(err: sqlx::Error) -> OutboxError {
    OutboxError::Storage(err.to_string())
}
