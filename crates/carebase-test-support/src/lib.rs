//! Shared test fakes and utilities for the Carebase outbox.

mod broker;
mod clock;
mod metrics;
mod store;

pub use broker::{FailingBroker, PublishedMessage, RecordingBroker, ScriptedBroker};
pub use clock::{FixedClock, ManualClock};
pub use metrics::{Recorded, RecordingMetrics};
pub use store::{FailingOutboxStore, InMemoryAuditLogStore, InMemoryOutboxStore};
