//! Outbox event records.
//!
//! An [`OutboxEvent`] is the unit of durable work: a producer writes one per
//! business-significant state change and the delivery worker drives it to
//! `processed` or escalates it to a [`DeadLetterEvent`]. The payload is opaque
//! bytes; schema knowledge lives with producers and consumers and is keyed by
//! the versioned `event_type` string.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OutboxError;

/// Maximum length of an `event_type`, matching the column width.
pub const MAX_EVENT_TYPE_LEN: usize = 255;

/// Header map carried alongside the payload and passed through to the broker.
pub type Headers = BTreeMap<String, String>;

/// Delivery status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Written by a producer, never attempted.
    Pending,
    /// Failed at least one poll cycle; eligible again once `retry_at` passes.
    Retry,
    /// Successfully published.
    Processed,
    /// Terminal failure marker. Exhausted rows are moved to the dead-letter
    /// store instead, so active rows only carry this status if an operator
    /// set it by hand.
    Failed,
}

impl EventStatus {
    /// Returns the persisted representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retry => "retry",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Whether a row in this status may be claimed by a worker.
    #[must_use]
    pub fn is_claimable(self) -> bool {
        matches!(self, Self::Pending | Self::Retry)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "retry" => Ok(Self::Retry),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(OutboxError::Storage(format!(
                "unknown outbox status: {other}"
            ))),
        }
    }
}

/// A producer's request to enqueue an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    /// Broker channel and metrics discriminator.
    pub event_type: String,
    /// Opaque serialized payload.
    pub payload: Vec<u8>,
    /// Pass-through headers (e.g. trace context).
    pub headers: Headers,
}

impl NewOutboxEvent {
    /// Creates a new event request with no headers.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Validation` if `event_type` is blank or too long,
    /// or `payload` is empty.
    pub fn new(event_type: impl Into<String>, payload: Vec<u8>) -> Result<Self, OutboxError> {
        let event = Self {
            event_type: event_type.into(),
            payload,
            headers: Headers::new(),
        };
        event.validate()?;
        Ok(event)
    }

    /// Attaches headers to the request.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Checks the producer contract.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Validation` describing the first violation.
    pub fn validate(&self) -> Result<(), OutboxError> {
        if self.event_type.trim().is_empty() {
            return Err(OutboxError::Validation("event_type must not be blank".into()));
        }
        if self.event_type.len() > MAX_EVENT_TYPE_LEN {
            return Err(OutboxError::Validation(format!(
                "event_type must be at most {MAX_EVENT_TYPE_LEN} bytes"
            )));
        }
        if self.payload.is_empty() {
            return Err(OutboxError::Validation("payload must not be empty".into()));
        }
        Ok(())
    }
}

/// A row in the active outbox table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    /// Time-orderable identifier (UUIDv7).
    pub id: Uuid,
    /// Broker channel and metrics discriminator.
    pub event_type: String,
    /// Opaque serialized payload.
    pub payload: Vec<u8>,
    /// Pass-through headers.
    pub headers: Headers,
    /// Current delivery status.
    pub status: EventStatus,
    /// Failed poll cycles so far. Never decreases.
    pub retry_count: u32,
    /// Last failure reason.
    pub error_message: Option<String>,
    /// Earliest re-claim time after a failure; `None` means immediately.
    pub retry_at: Option<DateTime<Utc>>,
    /// When the producer wrote the row.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
    /// Set if and only if `status` is `processed`.
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Builds the initial `pending` row for a producer request.
    ///
    /// This is the only constructor for new rows, so every row starts pending.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Validation` if the request is malformed.
    pub fn new_pending(new: NewOutboxEvent, now: DateTime<Utc>) -> Result<Self, OutboxError> {
        new.validate()?;
        Ok(Self {
            id: Uuid::now_v7(),
            event_type: new.event_type,
            payload: new.payload,
            headers: new.headers,
            status: EventStatus::Pending,
            retry_count: 0,
            error_message: None,
            retry_at: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        })
    }

    /// Whether a worker polling at `now` may claim this row.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.retry_at.is_none_or(|at| at <= now)
    }
}

/// Terminal copy of an event that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterEvent {
    /// Identifier of the original outbox row.
    pub id: Uuid,
    /// Original event type.
    pub event_type: String,
    /// Original payload, unchanged.
    pub payload: Vec<u8>,
    /// Original headers, unchanged.
    pub headers: Headers,
    /// Reason for the last failed attempt.
    pub error_message: String,
    /// Retry count at escalation time.
    pub retry_count: u32,
    /// When the producer wrote the original row.
    pub created_at: DateTime<Utc>,
    /// When the row was escalated.
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEvent {
    /// Builds the dead-letter copy of an exhausted event.
    #[must_use]
    pub fn from_exhausted(
        event: &OutboxEvent,
        error_message: impl Into<String>,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            headers: event.headers.clone(),
            error_message: error_message.into(),
            retry_count,
            created_at: event.created_at,
            dead_lettered_at: now,
        }
    }
}

/// Number of active rows per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Rows awaiting their first attempt.
    pub pending: u64,
    /// Rows waiting for a deferred retry.
    pub retry: u64,
    /// Delivered rows not yet swept.
    pub processed: u64,
    /// Rows an operator marked failed.
    pub failed: u64,
    /// Rows in the dead-letter store.
    pub dead_lettered: u64,
}
