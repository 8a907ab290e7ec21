//! Redis pub/sub implementation of the `Broker` trait.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use carebase_core::broker::{Broker, BrokerError};
use carebase_core::event::Headers;

use crate::envelope::Envelope;

const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes outbox events as Redis `PUBLISH` commands.
///
/// The multiplexed connection is safe to share between tasks, so clones of
/// this broker publish concurrently without extra locking.
#[derive(Clone)]
pub struct RedisBroker {
    conn: MultiplexedConnection,
    publish_timeout: Duration,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("publish_timeout", &self.publish_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Connects to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Unavailable` if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(url).map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(Self {
            conn,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(
        &self,
        channel: &str,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<(), BrokerError> {
        let message = Envelope::encode(payload, headers)?;
        let mut conn = self.conn.clone();

        let receivers: i64 =
            tokio::time::timeout(self.publish_timeout, conn.publish(channel, message))
                .await
                .map_err(|_| {
                    BrokerError::Unavailable(format!(
                        "publish to {channel} timed out after {:?}",
                        self.publish_timeout
                    ))
                })?
                .map_err(map_redis_error)?;

        debug!(channel, receivers, "published to redis channel");
        Ok(())
    }
}

fn map_redis_error(err: redis::RedisError) -> BrokerError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
        BrokerError::Unavailable(err.to_string())
    } else {
        BrokerError::Rejected(err.to_string())
    }
}
