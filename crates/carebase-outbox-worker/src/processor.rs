//! Outbox delivery worker.
//!
//! One poll cycle:
//! 1. claim up to `batch_size` due rows (the claim is the row lock held by
//!    the batch's open transaction);
//! 2. publish each row in claim order through the [`RetryPolicy`];
//! 3. stage `processed`, `retry` or dead-letter for each row;
//! 4. commit the batch.
//!
//! If anything fails before the commit completes, the batch is dropped, the
//! transaction rolls back, and every claimed row is reclaimable unchanged.
//! Broker calls that already succeeded will be repeated by the next poll,
//! which is the at-least-once contract consumers rely on.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use carebase_core::broker::Broker;
use carebase_core::clock::Clock;
use carebase_core::config::WorkerConfig;
use carebase_core::error::{ConfigError, OutboxError};
use carebase_core::event::{DeadLetterEvent, OutboxEvent};
use carebase_core::metrics::MetricsRecorder;
use carebase_core::store::{ClaimedBatch, OutboxStore};

use crate::retry::RetryPolicy;

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows claimed.
    pub claimed: usize,
    /// Rows published and marked processed.
    pub processed: usize,
    /// Rows scheduled for a deferred retry.
    pub retried: usize,
    /// Rows moved to the dead-letter store.
    pub dead_lettered: usize,
}

/// Observations held back until the batch commits.
enum Observation {
    Processed {
        event_type: String,
        end_to_end: Duration,
    },
    Retried(String),
    DeadLettered(String),
    Latency(String, Duration),
}

/// Polls the outbox and delivers events to the broker.
pub struct OutboxProcessor {
    config: WorkerConfig,
    retry: RetryPolicy,
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn Broker>,
    metrics: Arc<dyn MetricsRecorder>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for OutboxProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OutboxProcessor {
    /// Creates a processor.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any knob in `config` is unusable.
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn Broker>,
        metrics: Arc<dyn MetricsRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            retry: RetryPolicy::from_config(&config),
            config,
            store,
            broker,
            metrics,
            clock,
        })
    }

    /// Runs one poll cycle.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Storage` if claiming, staging or committing
    /// fails. In that case none of the batch's changes took effect.
    #[instrument(skip(self), fields(batch_size = self.config.batch_size))]
    pub async fn poll_once(&self) -> Result<BatchReport, OutboxError> {
        let mut batch = self
            .store
            .claim_batch(self.config.batch_size, self.clock.now())
            .await?;
        let events: Vec<OutboxEvent> = batch.events().to_vec();

        let mut report = BatchReport {
            claimed: events.len(),
            ..BatchReport::default()
        };
        if events.is_empty() {
            batch.commit().await?;
            return Ok(report);
        }
        self.metrics.batch_claimed(events.len());
        debug!(claimed = events.len(), "processing outbox batch");

        let mut observations = Vec::with_capacity(events.len() * 2);
        for event in &events {
            self.process_event(batch.as_mut(), event, &mut report, &mut observations)
                .await?;
        }

        batch.commit().await?;

        for observation in observations {
            self.record(observation);
        }
        if report.retried > 0 || report.dead_lettered > 0 {
            info!(
                processed = report.processed,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                "outbox batch committed with failures"
            );
        } else {
            debug!(processed = report.processed, "outbox batch committed");
        }
        Ok(report)
    }

    async fn process_event(
        &self,
        batch: &mut dyn ClaimedBatch,
        event: &OutboxEvent,
        report: &mut BatchReport,
        observations: &mut Vec<Observation>,
    ) -> Result<(), OutboxError> {
        let started = Instant::now();
        let published = self
            .retry
            .publish(self.broker.as_ref(), event, self.metrics.as_ref())
            .await;
        let now = self.clock.now();

        match published {
            Ok(()) => {
                batch.mark_processed(event.id, now).await?;
                report.processed += 1;
                observations.push(Observation::Processed {
                    event_type: event.event_type.clone(),
                    end_to_end: (now - event.created_at).to_std().unwrap_or_default(),
                });
            }
            Err(err) => {
                let retry_count = event.retry_count.saturating_add(1);
                let message = err.to_string();

                if self.retry.is_exhausted(retry_count) {
                    let dead = DeadLetterEvent::from_exhausted(event, &message, retry_count, now);
                    batch.move_to_dead_letter(&dead).await?;
                    report.dead_lettered += 1;
                    observations.push(Observation::DeadLettered(event.event_type.clone()));
                    error!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        retry_count,
                        error = %message,
                        "outbox event exhausted retries, moved to dead letter"
                    );
                } else {
                    let retry_at = self.retry.next_retry_at(retry_count, now);
                    batch
                        .schedule_retry(event.id, retry_count, retry_at, &message, now)
                        .await?;
                    report.retried += 1;
                    observations.push(Observation::Retried(event.event_type.clone()));
                    warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        retry_count,
                        %retry_at,
                        error = %message,
                        "outbox event delivery deferred"
                    );
                }
            }
        }

        observations.push(Observation::Latency(
            event.event_type.clone(),
            started.elapsed(),
        ));
        Ok(())
    }

    fn record(&self, observation: Observation) {
        match observation {
            Observation::Processed {
                event_type,
                end_to_end,
            } => self.metrics.event_processed(&event_type, end_to_end),
            Observation::Retried(event_type) => self.metrics.event_retried(&event_type),
            Observation::DeadLettered(event_type) => {
                self.metrics.event_dead_lettered(&event_type);
            }
            Observation::Latency(event_type, elapsed) => {
                self.metrics.processing_latency(&event_type, elapsed);
            }
        }
    }

    /// Polls on the configured interval until `cancel` fires.
    ///
    /// Cancellation is observed between ticks; a batch in flight runs to its
    /// commit or rollback first.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis(),
            batch_size = self.config.batch_size,
            retry_attempts = self.config.retry_attempts,
            retry_delay_ms = self.config.retry_delay.as_millis(),
            "outbox processor started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("outbox processor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "outbox poll failed, batch rolled back");
                    }
                }
            }
        }
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    use carebase_core::event::{EventStatus, Headers, NewOutboxEvent};
    use carebase_test_support::{
        FailingBroker, InMemoryOutboxStore, ManualClock, RecordingBroker, RecordingMetrics,
        ScriptedBroker,
    };

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn config(poll_interval: Duration) -> WorkerConfig {
        WorkerConfig {
            batch_size: 10,
            poll_interval,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }

    struct Harness {
        store: Arc<InMemoryOutboxStore>,
        clock: Arc<ManualClock>,
        metrics: Arc<RecordingMetrics>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryOutboxStore::new()),
                clock: Arc::new(ManualClock::new(t0())),
                metrics: Arc::new(RecordingMetrics::new()),
            }
        }

        fn processor(&self, config: WorkerConfig, broker: Arc<dyn Broker>) -> OutboxProcessor {
            OutboxProcessor::new(
                config,
                self.store.clone(),
                broker,
                self.metrics.clone(),
                self.clock.clone(),
            )
            .unwrap()
        }

        async fn create(&self, event_type: &str) -> OutboxEvent {
            self.store
                .create(
                    NewOutboxEvent::new(event_type, br#"{"patient_id":"p-1"}"#.to_vec()).unwrap(),
                    self.clock.now(),
                )
                .await
                .unwrap()
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let harness = Harness::new();
        let config = WorkerConfig {
            retry_attempts: 0,
            ..config(Duration::from_secs(1))
        };

        let result = OutboxProcessor::new(
            config,
            harness.store.clone(),
            Arc::new(RecordingBroker::new()),
            harness.metrics.clone(),
            harness.clock.clone(),
        );

        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                key: "OUTBOX_RETRY_ATTEMPTS",
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_publish_marks_event_processed() {
        // Arrange
        let harness = Harness::new();
        let broker = Arc::new(RecordingBroker::new());
        let processor = harness.processor(config(Duration::from_secs(1)), broker.clone());
        let mut headers = Headers::new();
        headers.insert("traceparent".into(), "00-abc-def-01".into());
        let created = harness
            .store
            .create(
                NewOutboxEvent::new("PATIENT_CREATE", b"{}".to_vec())
                    .unwrap()
                    .with_headers(headers.clone()),
                t0(),
            )
            .await
            .unwrap();
        harness.clock.advance(chrono::Duration::seconds(2));

        // Act
        let report = processor.poll_once().await.unwrap();

        // Assert
        assert_eq!(
            report,
            BatchReport {
                claimed: 1,
                processed: 1,
                ..BatchReport::default()
            }
        );
        let row = harness.store.row(created.id).unwrap();
        assert_eq!(row.status, EventStatus::Processed);
        assert_eq!(row.processed_at, Some(t0() + chrono::Duration::seconds(2)));
        assert_eq!(row.error_message, None);

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].channel, "PATIENT_CREATE");
        assert_eq!(published[0].payload, b"{}");
        assert_eq!(published[0].headers, headers);

        assert_eq!(harness.metrics.processed("PATIENT_CREATE"), 1);
        assert!(harness.metrics.recorded().contains(&carebase_test_support::Recorded::Processed(
            "PATIENT_CREATE".into(),
            Duration::from_secs(2)
        )));
        assert!(!harness.store.is_locked(created.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_outbox_reports_nothing_claimed() {
        let harness = Harness::new();
        let processor =
            harness.processor(config(Duration::from_secs(1)), Arc::new(RecordingBroker::new()));

        let report = processor.poll_once().await.unwrap();

        assert_eq!(report, BatchReport::default());
        assert!(harness.metrics.recorded().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_outage_escalates_to_dead_letter_after_retry_budget() {
        // Arrange
        let harness = Harness::new();
        let broker = Arc::new(FailingBroker::new());
        let processor = harness.processor(config(Duration::from_secs(30)), broker.clone());
        let created = harness.create("PATIENT_CREATE").await;

        // Act + Assert: first cycle defers.
        let report = processor.poll_once().await.unwrap();
        assert_eq!(report.retried, 1);
        let row = harness.store.row(created.id).unwrap();
        assert_eq!(row.status, EventStatus::Retry);
        assert_eq!(row.retry_count, 1);
        assert_eq!(row.retry_at, Some(t0() + chrono::Duration::seconds(5)));
        assert!(row.retry_at.unwrap() > row.updated_at);
        assert!(row.error_message.unwrap().contains("connection refused"));

        // Not yet due: nothing is claimed.
        assert_eq!(processor.poll_once().await.unwrap().claimed, 0);

        harness.clock.advance(chrono::Duration::seconds(5));
        let report = processor.poll_once().await.unwrap();
        assert_eq!(report.retried, 1);
        let row = harness.store.row(created.id).unwrap();
        assert_eq!(row.retry_count, 2);
        assert_eq!(row.retry_at, Some(t0() + chrono::Duration::seconds(15)));

        harness.clock.advance(chrono::Duration::seconds(10));
        let report = processor.poll_once().await.unwrap();
        assert_eq!(report.dead_lettered, 1);

        // Removed from the active store, present once in dead letter.
        assert!(harness.store.row(created.id).is_none());
        let dead = harness.store.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, created.id);
        assert_eq!(dead[0].payload, created.payload);
        assert_eq!(dead[0].retry_count, 3);
        assert_eq!(dead[0].dead_lettered_at, t0() + chrono::Duration::seconds(15));

        // Three in-process attempts per cycle.
        assert_eq!(broker.attempts(), 9);
        assert_eq!(harness.metrics.retried("PATIENT_CREATE"), 2);
        assert_eq!(harness.metrics.dead_lettered("PATIENT_CREATE"), 1);
        assert_eq!(harness.metrics.publish_attempts_failed("PATIENT_CREATE"), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_retry_succeeds_on_later_poll() {
        let harness = Harness::new();
        let failures = (0..3)
            .map(|_| Err(carebase_core::broker::BrokerError::Unavailable("down".into())))
            .collect();
        let broker = Arc::new(ScriptedBroker::new(failures));
        let processor = harness.processor(config(Duration::from_secs(30)), broker.clone());
        let created = harness.create("APPOINTMENT_BOOKED").await;

        assert_eq!(processor.poll_once().await.unwrap().retried, 1);
        harness.clock.advance(chrono::Duration::seconds(5));
        assert_eq!(processor.poll_once().await.unwrap().processed, 1);

        let row = harness.store.row(created.id).unwrap();
        assert_eq!(row.status, EventStatus::Processed);
        assert_eq!(row.retry_count, 1);
        assert_eq!(row.error_message, None);
        assert_eq!(row.retry_at, None);
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_process_retry_is_capped_by_poll_interval() {
        let harness = Harness::new();
        let broker = Arc::new(FailingBroker::new());
        // Poll interval shorter than the first 5s backoff: one attempt per cycle.
        let processor = harness.processor(config(Duration::from_secs(1)), broker.clone());
        harness.create("PATIENT_CREATE").await;
        let started = Instant::now();

        processor.poll_once().await.unwrap();

        assert_eq!(broker.attempts(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_failure_leaves_rows_unchanged_and_claimable() {
        // Arrange
        let harness = Harness::new();
        let broker = Arc::new(RecordingBroker::new());
        let processor = harness.processor(config(Duration::from_secs(1)), broker.clone());
        let created = harness.create("PATIENT_CREATE").await;
        harness.store.fail_commits(true);

        // Act
        let result = processor.poll_once().await;

        // Assert
        assert!(matches!(result, Err(OutboxError::Storage(_))));
        let row = harness.store.row(created.id).unwrap();
        assert_eq!(row.status, EventStatus::Pending);
        assert_eq!(row.retry_count, 0);
        assert!(!harness.store.is_locked(created.id));
        assert_eq!(harness.metrics.processed("PATIENT_CREATE"), 0);

        // The next poll redelivers: at-least-once.
        harness.store.fail_commits(false);
        assert_eq!(processor.poll_once().await.unwrap().processed, 1);
        assert_eq!(broker.published().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_processors_deliver_each_event_once() {
        // Arrange
        let harness = Harness::new();
        let broker = Arc::new(RecordingBroker::new());
        let config = WorkerConfig {
            batch_size: 5,
            ..config(Duration::from_secs(1))
        };
        let first = harness.processor(config, broker.clone());
        let second = harness.processor(config, broker.clone());
        let mut ids = HashSet::new();
        for _ in 0..8 {
            ids.insert(harness.create("PATIENT_CREATE").await.id);
        }

        // Act
        let (a, b) = tokio::join!(first.poll_once(), second.poll_once());

        // Assert
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.claimed + b.claimed, 8);
        assert_eq!(a.processed + b.processed, 8);
        assert_eq!(broker.published().len(), 8);
        let processed: HashSet<Uuid> = harness
            .store
            .rows()
            .into_iter()
            .filter(|e| e.status == EventStatus::Processed)
            .map(|e| e.id)
            .collect();
        assert_eq!(processed, ids);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_is_processed_oldest_first() {
        let harness = Harness::new();
        let broker = Arc::new(RecordingBroker::new());
        let processor = harness.processor(config(Duration::from_secs(1)), broker.clone());
        for event_type in ["CLINIC_CREATE", "CLINICIAN_CREATE", "PATIENT_CREATE"] {
            harness.create(event_type).await;
            harness.clock.advance(chrono::Duration::seconds(1));
        }

        processor.poll_once().await.unwrap();

        let channels: Vec<String> = broker.published().into_iter().map(|m| m.channel).collect();
        assert_eq!(
            channels,
            vec!["CLINIC_CREATE", "CLINICIAN_CREATE", "PATIENT_CREATE"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancellation() {
        // Arrange
        let harness = Harness::new();
        let broker = Arc::new(RecordingBroker::new());
        let processor = Arc::new(harness.processor(config(Duration::from_secs(1)), broker.clone()));
        let created = harness.create("PATIENT_CREATE").await;
        let cancel = CancellationToken::new();

        // Act
        let handle = processor.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        cancel.cancel();
        handle.await.unwrap();

        // Assert
        assert_eq!(
            harness.store.row(created.id).unwrap().status,
            EventStatus::Processed
        );
        assert_eq!(broker.published().len(), 1);
    }
}
