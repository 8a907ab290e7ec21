//! Integration tests for `PgOutboxStore` and `PgAuditLogStore`.

use std::collections::HashSet;

use carebase_core::audit::AuditLogEntry;
use carebase_core::error::OutboxError;
use carebase_core::event::{DeadLetterEvent, EventStatus, Headers, NewOutboxEvent};
use carebase_core::store::{AuditLogStore, OutboxStore};
use carebase_outbox_store::pg_audit_log_store::PgAuditLogStore;
use carebase_outbox_store::pg_outbox_store::PgOutboxStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::PgPool;
use uuid::Uuid;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn new_event(event_type: &str) -> NewOutboxEvent {
    NewOutboxEvent::new(event_type, br#"{"patient_id":"p-1"}"#.to_vec()).unwrap()
}

/// Creates `n` rows one second apart starting at `t0`.
async fn seed(store: &PgOutboxStore, n: i64) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for i in 0..n {
        let event = store
            .create(new_event("PATIENT_CREATE"), t0() + Duration::seconds(i))
            .await
            .unwrap();
        ids.push(event.id);
    }
    ids
}

// --- create ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_create_persists_pending_row(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let mut headers = Headers::new();
    headers.insert("traceparent".into(), "00-1-2-01".into());

    let created = store
        .create(new_event("PATIENT_CREATE").with_headers(headers.clone()), t0())
        .await
        .unwrap();

    let loaded = store.get(created.id).await.unwrap();
    assert_eq!(loaded, created);
    assert_eq!(loaded.status, EventStatus::Pending);
    assert_eq!(loaded.headers, headers);
    assert_eq!(loaded.processed_at, None);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_create_rejects_empty_payload_without_writing(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let malformed = NewOutboxEvent {
        event_type: "PATIENT_CREATE".into(),
        payload: Vec::new(),
        headers: Headers::new(),
    };

    let result = store.create(malformed, t0()).await;

    assert!(matches!(result, Err(OutboxError::Validation(_))));
    assert_eq!(store.status_counts().await.unwrap().pending, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_get_missing_row_is_not_found(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let id = Uuid::now_v7();

    match store.get(id).await {
        Err(OutboxError::NotFound(missing)) => assert_eq!(missing, id),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_create_in_transaction_rolls_back_with_producer(pool: PgPool) {
    let store = PgOutboxStore::new(pool.clone());

    let mut tx = pool.begin().await.unwrap();
    let event = PgOutboxStore::create_in_transaction(&mut tx, new_event("CLINIC_UPDATE"), t0())
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert!(matches!(
        store.get(event.id).await,
        Err(OutboxError::NotFound(_))
    ));

    let mut tx = pool.begin().await.unwrap();
    let event = PgOutboxStore::create_in_transaction(&mut tx, new_event("CLINIC_UPDATE"), t0())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(store.get(event.id).await.unwrap().status, EventStatus::Pending);
}

// --- claim protocol ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_claim_returns_due_rows_oldest_first(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let ids = seed(&store, 3).await;

    let batch = store
        .claim_batch(10, t0() + Duration::minutes(1))
        .await
        .unwrap();

    let claimed: Vec<Uuid> = batch.events().iter().map(|e| e.id).collect();
    assert_eq!(claimed, ids);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_claim_skips_rows_with_future_retry_at(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let ids = seed(&store, 2).await;
    let now = t0() + Duration::minutes(1);

    let mut batch = store.claim_batch(10, now).await.unwrap();
    batch
        .schedule_retry(ids[0], 1, now + Duration::seconds(5), "broker down", now)
        .await
        .unwrap();
    batch.commit().await.unwrap();

    let batch = store.claim_batch(10, now).await.unwrap();
    let claimed: Vec<Uuid> = batch.events().iter().map(|e| e.id).collect();
    assert_eq!(claimed, vec![ids[1]]);
    drop(batch);

    let later = store
        .claim_batch(10, now + Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(later.events().len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_claims_are_disjoint(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let ids = seed(&store, 8).await;
    let now = t0() + Duration::minutes(1);

    // Both batches stay open at the same time.
    let first = store.claim_batch(5, now).await.unwrap();
    let second = store.claim_batch(5, now).await.unwrap();

    let first_ids: HashSet<Uuid> = first.events().iter().map(|e| e.id).collect();
    let second_ids: HashSet<Uuid> = second.events().iter().map(|e| e.id).collect();
    assert_eq!(first_ids.len(), 5);
    assert_eq!(second_ids.len(), 3);
    assert!(first_ids.is_disjoint(&second_ids));

    let union: HashSet<Uuid> = first_ids.union(&second_ids).copied().collect();
    assert_eq!(union, ids.into_iter().collect::<HashSet<_>>());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_uncommitted_batch_is_rolled_back_on_drop(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let ids = seed(&store, 2).await;
    let now = t0() + Duration::minutes(1);

    let mut batch = store.claim_batch(10, now).await.unwrap();
    batch.mark_processed(ids[0], now).await.unwrap();
    batch
        .schedule_retry(ids[1], 1, now + Duration::seconds(5), "boom", now)
        .await
        .unwrap();
    drop(batch);

    let reclaimed = store.claim_batch(10, now).await.unwrap();
    let events = reclaimed.events();
    assert_eq!(events.len(), 2);
    for event in events {
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert_eq!(event.processed_at, None);
    }
}

// --- status transitions ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_mark_processed_sets_processed_at_and_clears_error(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let ids = seed(&store, 1).await;
    let now = t0() + Duration::minutes(1);

    let mut batch = store.claim_batch(10, now).await.unwrap();
    batch
        .schedule_retry(ids[0], 1, now, "first failure", now)
        .await
        .unwrap();
    batch.commit().await.unwrap();

    let later = now + Duration::seconds(10);
    let mut batch = store.claim_batch(10, later).await.unwrap();
    batch.mark_processed(ids[0], later).await.unwrap();
    batch.commit().await.unwrap();

    let event = store.get(ids[0]).await.unwrap();
    assert_eq!(event.status, EventStatus::Processed);
    assert_eq!(event.processed_at, Some(later));
    assert_eq!(event.error_message, None);
    assert_eq!(event.retry_count, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_schedule_retry_refuses_non_increasing_count(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let ids = seed(&store, 1).await;
    let now = t0() + Duration::minutes(1);

    let mut batch = store.claim_batch(10, now).await.unwrap();
    batch
        .schedule_retry(ids[0], 2, now + Duration::seconds(10), "boom", now)
        .await
        .unwrap();
    let result = batch
        .schedule_retry(ids[0], 1, now + Duration::seconds(5), "boom", now)
        .await;

    assert!(matches!(result, Err(OutboxError::Storage(_))));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_batch_rejects_rows_it_did_not_claim(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    seed(&store, 1).await;

    let mut batch = store.claim_batch(10, t0()).await.unwrap();
    let result = batch.mark_processed(Uuid::now_v7(), t0()).await;

    assert!(matches!(result, Err(OutboxError::Validation(_))));
}

// --- dead letter ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_dead_letter_moves_row_atomically(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let ids = seed(&store, 1).await;
    let now = t0() + Duration::minutes(1);

    let mut batch = store.claim_batch(10, now).await.unwrap();
    let event = batch.events()[0].clone();
    let dead = DeadLetterEvent::from_exhausted(&event, "broker down", 3, now);
    batch.move_to_dead_letter(&dead).await.unwrap();

    // Not yet committed: still visible in the active store only.
    assert!(store.list_dead_letters(10).await.unwrap().is_empty());

    batch.commit().await.unwrap();

    assert!(matches!(
        store.get(ids[0]).await,
        Err(OutboxError::NotFound(_))
    ));
    let dead_letters = store.list_dead_letters(10).await.unwrap();
    assert_eq!(dead_letters, vec![dead]);
    assert_eq!(dead_letters[0].payload, event.payload);

    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.dead_lettered, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_dropped_dead_letter_leaves_active_row(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let ids = seed(&store, 1).await;

    let mut batch = store.claim_batch(10, t0()).await.unwrap();
    let dead = DeadLetterEvent::from_exhausted(&batch.events()[0], "broker down", 3, t0());
    batch.move_to_dead_letter(&dead).await.unwrap();
    drop(batch);

    assert_eq!(store.get(ids[0]).await.unwrap().status, EventStatus::Pending);
    assert!(store.list_dead_letters(10).await.unwrap().is_empty());
}

// --- retention ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_delete_processed_before_honours_cutoff_and_is_idempotent(pool: PgPool) {
    let store = PgOutboxStore::new(pool);
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    let old = store.create(new_event("PATIENT_CREATE"), now - Duration::days(46)).await.unwrap();
    let recent = store.create(new_event("PATIENT_CREATE"), now - Duration::days(11)).await.unwrap();
    let pending = store.create(new_event("PATIENT_CREATE"), now - Duration::days(60)).await.unwrap();

    let mut batch = store.claim_batch(2, now).await.unwrap();
    let claimed: Vec<Uuid> = batch.events().iter().map(|e| e.id).collect();
    assert_eq!(claimed, vec![pending.id, old.id]);
    batch.mark_processed(old.id, now - Duration::days(45)).await.unwrap();
    batch.commit().await.unwrap();
    let mut batch = store.claim_batch(10, now).await.unwrap();
    batch.mark_processed(recent.id, now - Duration::days(10)).await.unwrap();
    batch.commit().await.unwrap();

    let cutoff = now - Duration::days(30);
    assert_eq!(store.delete_processed_before(cutoff).await.unwrap(), 1);
    assert_eq!(store.delete_processed_before(cutoff).await.unwrap(), 0);

    assert!(store.get(old.id).await.is_err());
    assert_eq!(store.get(recent.id).await.unwrap().status, EventStatus::Processed);
    assert_eq!(store.get(pending.id).await.unwrap().status, EventStatus::Pending);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_audit_log_delete_before_removes_only_expired_entries(pool: PgPool) {
    let audit = PgAuditLogStore::new(pool);
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    let old = AuditLogEntry::new(
        "acct-1",
        "patient.update",
        "patient",
        "p-1",
        serde_json::json!({}),
        now - Duration::days(400),
    )
    .unwrap();
    let fresh = AuditLogEntry::new(
        "acct-1",
        "patient.view",
        "patient",
        "p-1",
        serde_json::json!({"region": "eu"}),
        now - Duration::days(2),
    )
    .unwrap();
    audit.record(&old).await.unwrap();
    audit.record(&fresh).await.unwrap();

    let cutoff = now - Duration::days(365);
    assert_eq!(audit.delete_before(cutoff).await.unwrap(), 1);
    assert_eq!(audit.delete_before(cutoff).await.unwrap(), 0);
}
