//! Carebase API — process wiring for the outbox pipeline.
//!
//! Exposes the producer and operator HTTP surface and the configuration,
//! telemetry and error types used by the `carebase-api` binary.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

use axum::Router;

use crate::state::AppState;

/// Builds the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/outbox", routes::outbox::router())
        .nest("/api/v1/audit-logs", routes::audit::router())
        .with_state(state)
}
