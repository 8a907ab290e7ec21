//! Message broker capability boundary.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::Headers;

/// Failure reported by a broker adapter.
///
/// The delivery worker does not distinguish between variants: every error
/// feeds the same retry state machine. The variants exist for logs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the message.
    #[error("broker rejected message: {0}")]
    Rejected(String),

    /// The message could not be encoded for the wire.
    #[error("message serialization failed: {0}")]
    Serialization(String),
}

/// Publish side of a pub/sub broker keyed by channel.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes `payload` with `headers` on `channel`.
    async fn publish(
        &self,
        channel: &str,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<(), BrokerError>;
}
