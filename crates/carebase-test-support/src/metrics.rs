//! Test metrics — a `MetricsRecorder` that keeps every observation.

use std::sync::Mutex;
use std::time::Duration;

use carebase_core::metrics::MetricsRecorder;

/// One recorded observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    /// `batch_claimed(size)`
    BatchClaimed(usize),
    /// `event_processed(event_type, end_to_end)`
    Processed(String, Duration),
    /// `event_retried(event_type)`
    Retried(String),
    /// `event_dead_lettered(event_type)`
    DeadLettered(String),
    /// `publish_attempt_failed(event_type)`
    PublishAttemptFailed(String),
    /// `processing_latency(event_type, elapsed)`
    ProcessingLatency(String, Duration),
    /// `rows_swept(sweep, deleted)`
    Swept(String, u64),
}

/// A metrics recorder that stores observations for assertions.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    recorded: Mutex<Vec<Recorded>>,
}

impl RecordingMetrics {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all observations in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn recorded(&self) -> Vec<Recorded> {
        self.recorded.lock().unwrap().clone()
    }

    /// Number of `processed` observations for `event_type`.
    pub fn processed(&self, event_type: &str) -> usize {
        self.count(|r| matches!(r, Recorded::Processed(t, _) if t == event_type))
    }

    /// Number of `retried` observations for `event_type`.
    pub fn retried(&self, event_type: &str) -> usize {
        self.count(|r| matches!(r, Recorded::Retried(t) if t == event_type))
    }

    /// Number of `dead_lettered` observations for `event_type`.
    pub fn dead_lettered(&self, event_type: &str) -> usize {
        self.count(|r| matches!(r, Recorded::DeadLettered(t) if t == event_type))
    }

    /// Number of failed publish attempts for `event_type`.
    pub fn publish_attempts_failed(&self, event_type: &str) -> usize {
        self.count(|r| matches!(r, Recorded::PublishAttemptFailed(t) if t == event_type))
    }

    fn count(&self, predicate: impl Fn(&Recorded) -> bool) -> usize {
        self.recorded.lock().unwrap().iter().filter(|r| predicate(r)).count()
    }

    fn push(&self, recorded: Recorded) {
        self.recorded.lock().unwrap().push(recorded);
    }
}

impl MetricsRecorder for RecordingMetrics {
    fn batch_claimed(&self, size: usize) {
        self.push(Recorded::BatchClaimed(size));
    }

    fn event_processed(&self, event_type: &str, end_to_end: Duration) {
        self.push(Recorded::Processed(event_type.to_owned(), end_to_end));
    }

    fn event_retried(&self, event_type: &str) {
        self.push(Recorded::Retried(event_type.to_owned()));
    }

    fn event_dead_lettered(&self, event_type: &str) {
        self.push(Recorded::DeadLettered(event_type.to_owned()));
    }

    fn publish_attempt_failed(&self, event_type: &str) {
        self.push(Recorded::PublishAttemptFailed(event_type.to_owned()));
    }

    fn processing_latency(&self, event_type: &str, elapsed: Duration) {
        self.push(Recorded::ProcessingLatency(event_type.to_owned(), elapsed));
    }

    fn rows_swept(&self, sweep: &str, deleted: u64) {
        self.push(Recorded::Swept(sweep.to_owned(), deleted));
    }
}
