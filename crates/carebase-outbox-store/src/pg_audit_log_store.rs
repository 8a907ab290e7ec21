//! `PostgreSQL` implementation of the `AuditLogStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use carebase_core::audit::AuditLogEntry;
use carebase_core::error::OutboxError;
use carebase_core::store::AuditLogStore;

use crate::rows::storage_error;

/// PostgreSQL-backed audit log.
#[derive(Debug, Clone)]
pub struct PgAuditLogStore {
    pool: PgPool,
}

impl PgAuditLogStore {
    /// Creates a new `PgAuditLogStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogStore for PgAuditLogStore {
    async fn record(&self, entry: &AuditLogEntry) -> Result<(), OutboxError> {
        sqlx::query(
            r"
            INSERT INTO audit_logs
                (id, actor, action, resource_type, resource_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(entry.id)
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(Json(&entry.metadata))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected())
    }
}
