//! Shared application state.

use std::sync::Arc;

use carebase_core::clock::Clock;
use carebase_core::store::{AuditLogStore, OutboxStore};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Clock used to stamp new rows.
    pub clock: Arc<dyn Clock>,
    /// Outbox store for producer writes and operator reads.
    pub outbox_store: Arc<dyn OutboxStore>,
    /// Audit trail.
    pub audit_log: Arc<dyn AuditLogStore>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        outbox_store: Arc<dyn OutboxStore>,
        audit_log: Arc<dyn AuditLogStore>,
    ) -> Self {
        Self {
            clock,
            outbox_store,
            audit_log,
        }
    }
}
