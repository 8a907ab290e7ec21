//! Test brokers — scripted `Broker` implementations for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use carebase_core::broker::{Broker, BrokerError};
use carebase_core::event::Headers;

/// A message accepted by a test broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Channel the message was published on.
    pub channel: String,
    /// Payload bytes as handed to the broker.
    pub payload: Vec<u8>,
    /// Headers as handed to the broker.
    pub headers: Headers,
}

/// A broker that accepts and records every message.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    published: Mutex<Vec<PublishedMessage>>,
}

impl RecordingBroker {
    /// Creates an empty recording broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every accepted message.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(
        &self,
        channel: &str,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<(), BrokerError> {
        self.published.lock().unwrap().push(PublishedMessage {
            channel: channel.to_owned(),
            payload: payload.to_vec(),
            headers: headers.clone(),
        });
        Ok(())
    }
}

/// A broker that is always down. Counts publish attempts.
#[derive(Debug, Default)]
pub struct FailingBroker {
    attempts: AtomicUsize,
}

impl FailingBroker {
    /// Creates a broker that rejects every publish.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of publish calls seen so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for FailingBroker {
    async fn publish(
        &self,
        _channel: &str,
        _payload: &[u8],
        _headers: &Headers,
    ) -> Result<(), BrokerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(BrokerError::Unavailable("connection refused".into()))
    }
}

/// A broker that replays a scripted list of outcomes, then accepts
/// everything. Successful publishes are recorded.
#[derive(Debug)]
pub struct ScriptedBroker {
    outcomes: Mutex<VecDeque<Result<(), BrokerError>>>,
    attempts: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
}

impl ScriptedBroker {
    /// Creates a broker that returns `outcomes` in order.
    #[must_use]
    pub fn new(outcomes: Vec<Result<(), BrokerError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            attempts: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Number of publish calls seen so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns a snapshot of every accepted message.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for ScriptedBroker {
    async fn publish(
        &self,
        channel: &str,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<(), BrokerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.published.lock().unwrap().push(PublishedMessage {
                channel: channel.to_owned(),
                payload: payload.to_vec(),
                headers: headers.clone(),
            });
        }
        outcome
    }
}
