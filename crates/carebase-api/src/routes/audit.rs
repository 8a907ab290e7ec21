//! Routes for the audit trail.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::post};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use carebase_core::audit::AuditLogEntry;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct RecordAuditRequest {
    /// Who performed the action.
    pub actor: String,
    /// What was done, e.g. `patient.view`.
    pub action: String,
    /// Kind of resource touched.
    pub resource_type: String,
    /// Id of the resource touched.
    pub resource_id: String,
    /// Free-form context.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Response body returned after an entry is recorded.
#[derive(Debug, Serialize)]
pub struct RecordAuditResponse {
    /// Id of the stored entry.
    pub id: Uuid,
}

/// POST /
#[instrument(skip(state, request), fields(action = %request.action))]
async fn record(
    State(state): State<AppState>,
    Json(request): Json<RecordAuditRequest>,
) -> Result<(StatusCode, Json<RecordAuditResponse>), ApiError> {
    let entry = AuditLogEntry::new(
        request.actor,
        request.action,
        request.resource_type,
        request.resource_id,
        request.metadata,
        state.clock.now(),
    )?;
    state.audit_log.record(&entry).await?;

    info!(audit_id = %entry.id, "audit entry recorded");

    Ok((StatusCode::CREATED, Json(RecordAuditResponse { id: entry.id })))
}

/// Returns the router for the audit trail.
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(record))
}
