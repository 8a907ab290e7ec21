//! OpenTelemetry-backed metrics recorder.
//!
//! Metric names follow Prometheus conventions. Every instrument is labelled
//! by `event_type` (or `sweep`); aggregate views are the sum across labels.

use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

use carebase_core::metrics::MetricsRecorder;

/// Events published and marked processed.
pub const EVENTS_PROCESSED: &str = "carebase_outbox_events_processed_total";

/// Events deferred to a later poll cycle.
pub const EVENTS_RETRIED: &str = "carebase_outbox_events_retried_total";

/// Events moved to the dead-letter store.
pub const EVENTS_DEAD_LETTERED: &str = "carebase_outbox_events_dead_lettered_total";

/// Individual failed publish attempts, both retry tiers.
pub const PUBLISH_ATTEMPTS_FAILED: &str = "carebase_outbox_publish_attempts_failed_total";

/// Time spent handling one event inside a batch.
pub const PROCESSING_SECONDS: &str = "carebase_outbox_processing_seconds";

/// Row creation to successful publish.
pub const END_TO_END_SECONDS: &str = "carebase_outbox_end_to_end_seconds";

/// Rows per claimed batch.
pub const BATCH_SIZE: &str = "carebase_outbox_batch_size";

/// Rows deleted by retention sweeps.
pub const ROWS_SWEPT: &str = "carebase_retention_rows_deleted_total";

/// Records pipeline metrics through an OpenTelemetry [`Meter`].
#[derive(Debug, Clone)]
pub struct OtelMetricsRecorder {
    processed: Counter<u64>,
    retried: Counter<u64>,
    dead_lettered: Counter<u64>,
    attempts_failed: Counter<u64>,
    processing: Histogram<f64>,
    end_to_end: Histogram<f64>,
    batch_size: Histogram<u64>,
    swept: Counter<u64>,
}

impl OtelMetricsRecorder {
    /// Creates every instrument on `meter`.
    #[must_use]
    pub fn new(meter: &Meter) -> Self {
        Self {
            processed: meter
                .u64_counter(EVENTS_PROCESSED)
                .with_description("Outbox events published and marked processed")
                .build(),
            retried: meter
                .u64_counter(EVENTS_RETRIED)
                .with_description("Outbox events deferred to a later poll cycle")
                .build(),
            dead_lettered: meter
                .u64_counter(EVENTS_DEAD_LETTERED)
                .with_description("Outbox events moved to the dead-letter store")
                .build(),
            attempts_failed: meter
                .u64_counter(PUBLISH_ATTEMPTS_FAILED)
                .with_description("Failed broker publish attempts")
                .build(),
            processing: meter
                .f64_histogram(PROCESSING_SECONDS)
                .with_unit("s")
                .with_description("Time spent handling one outbox event")
                .build(),
            end_to_end: meter
                .f64_histogram(END_TO_END_SECONDS)
                .with_unit("s")
                .with_description("Time from outbox row creation to successful publish")
                .build(),
            batch_size: meter
                .u64_histogram(BATCH_SIZE)
                .with_description("Rows per claimed outbox batch")
                .build(),
            swept: meter
                .u64_counter(ROWS_SWEPT)
                .with_description("Rows deleted by retention sweeps")
                .build(),
        }
    }
}

fn event_type_label(event_type: &str) -> [KeyValue; 1] {
    [KeyValue::new("event_type", event_type.to_owned())]
}

impl MetricsRecorder for OtelMetricsRecorder {
    fn batch_claimed(&self, size: usize) {
        self.batch_size.record(size as u64, &[]);
    }

    fn event_processed(&self, event_type: &str, end_to_end: Duration) {
        let labels = event_type_label(event_type);
        self.processed.add(1, &labels);
        self.end_to_end.record(end_to_end.as_secs_f64(), &labels);
    }

    fn event_retried(&self, event_type: &str) {
        self.retried.add(1, &event_type_label(event_type));
    }

    fn event_dead_lettered(&self, event_type: &str) {
        self.dead_lettered.add(1, &event_type_label(event_type));
    }

    fn publish_attempt_failed(&self, event_type: &str) {
        self.attempts_failed.add(1, &event_type_label(event_type));
    }

    fn processing_latency(&self, event_type: &str, elapsed: Duration) {
        self.processing
            .record(elapsed.as_secs_f64(), &event_type_label(event_type));
    }

    fn rows_swept(&self, sweep: &str, deleted: u64) {
        self.swept
            .add(deleted, &[KeyValue::new("sweep", sweep.to_owned())]);
    }
}
