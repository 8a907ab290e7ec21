//! Test stores — in-memory `OutboxStore` and `AuditLogStore` implementations.
//!
//! `InMemoryOutboxStore` emulates the skip-locked claim protocol: claimed rows
//! are locked until their batch commits or is dropped, and staged changes are
//! applied only on commit.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use carebase_core::audit::AuditLogEntry;
use carebase_core::error::OutboxError;
use carebase_core::event::{
    DeadLetterEvent, EventStatus, NewOutboxEvent, OutboxEvent, StatusCounts,
};
use carebase_core::store::{AuditLogStore, ClaimedBatch, OutboxStore};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    rows: BTreeMap<Uuid, OutboxEvent>,
    dead_letters: Vec<DeadLetterEvent>,
    locked: HashSet<Uuid>,
    fail_commits: bool,
}

/// An in-memory outbox with row-level claim locks and transactional batches.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryOutboxStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row as-is, bypassing validation. Useful for seeding rows in
    /// states producers cannot create (e.g. already processed).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert(&self, event: OutboxEvent) {
        self.state.lock().unwrap().rows.insert(event.id, event);
    }

    /// Returns a snapshot of active rows ordered by creation time.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn rows(&self) -> Vec<OutboxEvent> {
        let mut rows: Vec<OutboxEvent> = self.state.lock().unwrap().rows.values().cloned().collect();
        rows.sort_by_key(|e| (e.created_at, e.id));
        rows
    }

    /// Returns one active row, if present.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn row(&self, id: Uuid) -> Option<OutboxEvent> {
        self.state.lock().unwrap().rows.get(&id).cloned()
    }

    /// Returns a snapshot of the dead-letter store in escalation order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn dead_letters(&self) -> Vec<DeadLetterEvent> {
        self.state.lock().unwrap().dead_letters.clone()
    }

    /// Whether a row is currently claimed by an open batch.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn is_locked(&self, id: Uuid) -> bool {
        self.state.lock().unwrap().locked.contains(&id)
    }

    /// Makes every subsequent commit fail and roll back.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_commits(&self, fail: bool) {
        self.state.lock().unwrap().fail_commits = fail;
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn create(
        &self,
        event: NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<OutboxEvent, OutboxError> {
        let event = OutboxEvent::new_pending(event, now)?;
        self.insert(event.clone());
        Ok(event)
    }

    async fn claim_batch(
        &self,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Box<dyn ClaimedBatch>, OutboxError> {
        let mut state = self.state.lock().unwrap();
        let mut due: Vec<OutboxEvent> = state
            .rows
            .values()
            .filter(|e| e.is_due(now) && !state.locked.contains(&e.id))
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.created_at, e.id));
        due.truncate(usize::try_from(batch_size).unwrap_or(usize::MAX));

        for event in &due {
            state.locked.insert(event.id);
        }

        Ok(Box::new(InMemoryClaimedBatch {
            state: Arc::clone(&self.state),
            events: due,
            staged: Vec::new(),
            finished: false,
        }))
    }

    async fn get(&self, id: Uuid) -> Result<OutboxEvent, OutboxError> {
        self.row(id).ok_or(OutboxError::NotFound(id))
    }

    async fn list_dead_letters(&self, limit: u32) -> Result<Vec<DeadLetterEvent>, OutboxError> {
        let mut dead = self.dead_letters();
        dead.sort_by(|a, b| b.dead_lettered_at.cmp(&a.dead_lettered_at).then(a.id.cmp(&b.id)));
        dead.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(dead)
    }

    async fn status_counts(&self) -> Result<StatusCounts, OutboxError> {
        let state = self.state.lock().unwrap();
        let mut counts = StatusCounts {
            dead_lettered: state.dead_letters.len() as u64,
            ..StatusCounts::default()
        };
        for event in state.rows.values() {
            match event.status {
                EventStatus::Pending => counts.pending += 1,
                EventStatus::Retry => counts.retry += 1,
                EventStatus::Processed => counts.processed += 1,
                EventStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError> {
        let mut state = self.state.lock().unwrap();
        let before = state.rows.len();
        state.rows.retain(|_, e| {
            !(e.status == EventStatus::Processed && e.processed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - state.rows.len()) as u64)
    }
}

#[derive(Debug)]
enum Staged {
    Processed {
        id: Uuid,
        now: DateTime<Utc>,
    },
    Retry {
        id: Uuid,
        retry_count: u32,
        retry_at: DateTime<Utc>,
        error_message: String,
        now: DateTime<Utc>,
    },
    DeadLetter(DeadLetterEvent),
}

struct InMemoryClaimedBatch {
    state: Arc<Mutex<State>>,
    events: Vec<OutboxEvent>,
    staged: Vec<Staged>,
    finished: bool,
}

impl InMemoryClaimedBatch {
    fn ensure_claimed(&self, id: Uuid) -> Result<&OutboxEvent, OutboxError> {
        self.events.iter().find(|e| e.id == id).ok_or_else(|| {
            OutboxError::Validation(format!("event {id} is not part of this claimed batch"))
        })
    }

    fn release(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            for event in &self.events {
                state.locked.remove(&event.id);
            }
        }
        self.finished = true;
    }
}

impl Drop for InMemoryClaimedBatch {
    fn drop(&mut self) {
        if !self.finished {
            self.release();
        }
    }
}

#[async_trait]
impl ClaimedBatch for InMemoryClaimedBatch {
    fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    async fn mark_processed(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<(), OutboxError> {
        self.ensure_claimed(id)?;
        self.staged.push(Staged::Processed { id, now });
        Ok(())
    }

    async fn schedule_retry(
        &mut self,
        id: Uuid,
        retry_count: u32,
        retry_at: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        let current = self.ensure_claimed(id)?.retry_count;
        if retry_count <= current {
            return Err(OutboxError::Storage(format!(
                "retry_count for event {id} must increase to {retry_count}"
            )));
        }
        self.staged.push(Staged::Retry {
            id,
            retry_count,
            retry_at,
            error_message: error_message.to_owned(),
            now,
        });
        Ok(())
    }

    async fn move_to_dead_letter(&mut self, dead: &DeadLetterEvent) -> Result<(), OutboxError> {
        self.ensure_claimed(dead.id)?;
        self.staged.push(Staged::DeadLetter(dead.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), OutboxError> {
        let mut batch = self;
        let staged = std::mem::take(&mut batch.staged);
        let committed = {
            let mut state = batch.state.lock().unwrap();
            if state.fail_commits {
                false
            } else {
                for change in staged {
                    apply(&mut state, change);
                }
                true
            }
        };
        batch.release();
        if committed {
            Ok(())
        } else {
            Err(OutboxError::Storage("commit failed: connection reset".into()))
        }
    }
}

fn apply(state: &mut State, change: Staged) {
    match change {
        Staged::Processed { id, now } => {
            if let Some(row) = state.rows.get_mut(&id) {
                row.status = EventStatus::Processed;
                row.processed_at = Some(now);
                row.updated_at = now;
                row.error_message = None;
                row.retry_at = None;
            }
        }
        Staged::Retry {
            id,
            retry_count,
            retry_at,
            error_message,
            now,
        } => {
            if let Some(row) = state.rows.get_mut(&id) {
                row.status = EventStatus::Retry;
                row.retry_count = retry_count;
                row.retry_at = Some(retry_at);
                row.error_message = Some(error_message);
                row.updated_at = now;
            }
        }
        Staged::DeadLetter(dead) => {
            if state.rows.remove(&dead.id).is_some() {
                state.dead_letters.push(dead);
            }
        }
    }
}

/// An outbox store that always fails with a storage error.
#[derive(Debug)]
pub struct FailingOutboxStore;

fn connection_refused() -> OutboxError {
    OutboxError::Storage("connection refused".into())
}

#[async_trait]
impl OutboxStore for FailingOutboxStore {
    async fn create(
        &self,
        event: NewOutboxEvent,
        _now: DateTime<Utc>,
    ) -> Result<OutboxEvent, OutboxError> {
        event.validate()?;
        Err(connection_refused())
    }

    async fn claim_batch(
        &self,
        _batch_size: u32,
        _now: DateTime<Utc>,
    ) -> Result<Box<dyn ClaimedBatch>, OutboxError> {
        Err(connection_refused())
    }

    async fn get(&self, _id: Uuid) -> Result<OutboxEvent, OutboxError> {
        Err(connection_refused())
    }

    async fn list_dead_letters(&self, _limit: u32) -> Result<Vec<DeadLetterEvent>, OutboxError> {
        Err(connection_refused())
    }

    async fn status_counts(&self) -> Result<StatusCounts, OutboxError> {
        Err(connection_refused())
    }

    async fn delete_processed_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, OutboxError> {
        Err(connection_refused())
    }
}

/// An in-memory audit log.
#[derive(Debug, Default)]
pub struct InMemoryAuditLogStore {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl InMemoryAuditLogStore {
    /// Creates an empty audit log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of stored entries.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditLogStore for InMemoryAuditLogStore {
    async fn record(&self, entry: &AuditLogEntry) -> Result<(), OutboxError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, OutboxError> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.created_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}
