//! Routes for producer capture and operator inspection of the outbox.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{
    Json, Router,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use carebase_core::error::OutboxError;
use carebase_core::event::{
    DeadLetterEvent, EventStatus, Headers, NewOutboxEvent, OutboxEvent, StatusCounts,
};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_DEAD_LETTER_LIMIT: u32 = 50;
const MAX_DEAD_LETTER_LIMIT: u32 = 500;

/// Request body for POST /events.
#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    /// Routing key, e.g. `PATIENT_CREATE`.
    pub event_type: String,
    /// Event body; stored as its serialized JSON bytes.
    pub payload: serde_json::Value,
    /// Metadata forwarded to the broker.
    #[serde(default)]
    pub headers: Headers,
}

/// Response body returned after an event is captured.
#[derive(Debug, Serialize)]
pub struct CreateEventResponse {
    /// Id of the new outbox row.
    pub id: Uuid,
    /// Always `pending` for a fresh row.
    pub status: EventStatus,
    /// Capture time.
    pub created_at: DateTime<Utc>,
}

/// Operator view of an active outbox row.
#[derive(Debug, Serialize)]
pub struct OutboxEventResponse {
    pub id: Uuid,
    pub event_type: String,
    pub status: EventStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub retry_at: Option<DateTime<Utc>>,
    pub headers: Headers,
    pub payload_size: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<OutboxEvent> for OutboxEventResponse {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type,
            status: event.status,
            retry_count: event.retry_count,
            error_message: event.error_message,
            retry_at: event.retry_at,
            headers: event.headers,
            payload_size: event.payload.len(),
            created_at: event.created_at,
            updated_at: event.updated_at,
            processed_at: event.processed_at,
        }
    }
}

/// Operator view of a dead-lettered event.
#[derive(Debug, Serialize)]
pub struct DeadLetterResponse {
    pub id: Uuid,
    pub event_type: String,
    pub error_message: String,
    pub retry_count: u32,
    pub headers: Headers,
    pub payload_size: usize,
    pub created_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl From<DeadLetterEvent> for DeadLetterResponse {
    fn from(dead: DeadLetterEvent) -> Self {
        Self {
            id: dead.id,
            event_type: dead.event_type,
            error_message: dead.error_message,
            retry_count: dead.retry_count,
            headers: dead.headers,
            payload_size: dead.payload.len(),
            created_at: dead.created_at,
            dead_lettered_at: dead.dead_lettered_at,
        }
    }
}

/// Query string for GET /dead-letters.
#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    /// Maximum rows to return; defaults to 50, capped at 500.
    pub limit: Option<u32>,
}

/// POST /events
#[instrument(skip(state, request), fields(event_type = %request.event_type))]
async fn create_event(
    State(state): State<AppState>,
    Json(request): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<CreateEventResponse>), ApiError> {
    let payload = serde_json::to_vec(&request.payload)
        .map_err(|e| OutboxError::Validation(format!("payload is not serializable: {e}")))?;
    let new_event = NewOutboxEvent::new(request.event_type, payload)?.with_headers(request.headers);

    let event = state
        .outbox_store
        .create(new_event, state.clock.now())
        .await?;

    info!(event_id = %event.id, "outbox event captured");

    Ok((
        StatusCode::CREATED,
        Json(CreateEventResponse {
            id: event.id,
            status: event.status,
            created_at: event.created_at,
        }),
    ))
}

/// GET /events/{id}
#[instrument(skip(state))]
async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OutboxEventResponse>, ApiError> {
    let event = state.outbox_store.get(id).await?;
    Ok(Json(event.into()))
}

/// GET /dead-letters
#[instrument(skip(state))]
async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Vec<DeadLetterResponse>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .clamp(1, MAX_DEAD_LETTER_LIMIT);
    let dead = state.outbox_store.list_dead_letters(limit).await?;
    Ok(Json(dead.into_iter().map(Into::into).collect()))
}

/// GET /stats
#[instrument(skip(state))]
async fn stats(State(state): State<AppState>) -> Result<Json<StatusCounts>, ApiError> {
    let counts = state.outbox_store.status_counts().await?;
    Ok(Json(counts))
}

/// Returns the router for the outbox.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/{id}", get(get_event))
        .route("/dead-letters", get(list_dead_letters))
        .route("/stats", get(stats))
}
