//! Carebase API — error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use carebase_core::broker::BrokerError;
use carebase_core::error::{ConfigError, OutboxError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Startup and runtime errors for the API process.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The broker could not be reached at startup.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Tracing or metrics exporter could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `OutboxError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub OutboxError);

impl From<OutboxError> for ApiError {
    fn from(err: OutboxError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            OutboxError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            OutboxError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            OutboxError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            OutboxError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        };

        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
