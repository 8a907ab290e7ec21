//! Carebase outbox store — PostgreSQL implementations of the storage traits.

pub mod pg_audit_log_store;
pub mod pg_outbox_store;
mod rows;

/// Embedded migrations for the outbox and audit log tables.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
