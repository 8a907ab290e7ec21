//! Error types for the outbox pipeline.

use thiserror::Error;
use uuid::Uuid;

/// Top-level outbox error type.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// A producer submitted a malformed event.
    #[error("validation error: {0}")]
    Validation(String),

    /// A requested record does not exist.
    #[error("outbox event not found: {0}")]
    NotFound(Uuid),

    /// A storage or transaction failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A component was constructed with invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration errors surfaced at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting was not provided.
    #[error("configuration error: {0} must be set")]
    Missing(&'static str),

    /// A setting was provided but is not usable.
    #[error("configuration error: {key} {reason}")]
    Invalid {
        /// The offending setting.
        key: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
