//! Carebase broker — pub/sub adapters for outbox delivery.
//!
//! Channels are keyed by event type. Each message is a JSON [`envelope`]
//! carrying the pass-through headers next to the opaque payload.

pub mod envelope;
pub mod redis_broker;

pub use envelope::Envelope;
pub use redis_broker::RedisBroker;
