//! Carebase outbox worker — asynchronous delivery of outbox events.
//!
//! The [`processor::OutboxProcessor`] polls the outbox on a fixed interval,
//! claims a batch under row locks, publishes each event with a two-tier retry
//! policy, and commits the resulting status changes. The
//! [`sweep::PeriodicSweeper`] runs retention deletes on its own timer.

pub mod processor;
pub mod retry;
pub mod sweep;
pub mod telemetry;
