//! Metrics recording abstraction.
//!
//! Workers receive a recorder at construction instead of touching
//! process-wide counters. The process entry point owns the backing
//! implementation and its lifecycle.

use std::time::Duration;

/// Sink for the delivery pipeline's externally visible signals.
pub trait MetricsRecorder: Send + Sync {
    /// A batch of `size` rows was claimed.
    fn batch_claimed(&self, size: usize);

    /// An event was published and marked processed. `end_to_end` is the time
    /// from row creation to successful publish.
    fn event_processed(&self, event_type: &str, end_to_end: Duration);

    /// An event failed this poll cycle and was scheduled for a deferred retry.
    fn event_retried(&self, event_type: &str);

    /// An event exhausted its retries and was moved to the dead-letter store.
    fn event_dead_lettered(&self, event_type: &str);

    /// A single publish attempt failed.
    fn publish_attempt_failed(&self, event_type: &str);

    /// Time spent handling one event, including in-process retries.
    fn processing_latency(&self, event_type: &str, elapsed: Duration);

    /// A retention sweep deleted `deleted` rows.
    fn rows_swept(&self, sweep: &str, deleted: u64);
}
