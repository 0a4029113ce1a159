//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container.
//! Run with:
//!
//! ```bash
//! cargo test -p outbox --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use outbox::{
    AggregateId, ClaimOutcome, OutboxError, OutboxEvent, OutboxQuery, OutboxStatus, OutboxStore,
    OutboxStoreExt, OutboxTransaction, PostgresOutboxStore, SagaStatus, metadata,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_outbox_events_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            // Stand-in for a business table written in the same transaction.
            sqlx::raw_sql(
                "CREATE TABLE IF NOT EXISTS contacts (id UUID PRIMARY KEY, name TEXT NOT NULL)",
            )
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresOutboxStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE outbox_events, contacts")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOutboxStore::new(pool)
}

fn contact_created(aggregate_id: AggregateId) -> OutboxEvent {
    OutboxEvent::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("contact")
        .event_type("contact.created")
        .payload(&serde_json::json!({"name": "Ada"}))
        .unwrap()
        .tenant_id("tenant-1")
        .project_id("project-1")
        .build()
        .unwrap()
}

fn saga_step(correlation_id: &str, step: &str, number: i64) -> OutboxEvent {
    OutboxEvent::builder()
        .aggregate_id(AggregateId::new())
        .aggregate_type("contact")
        .event_type(step)
        .payload_bytes(b"{}".to_vec())
        .metadata(metadata::CORRELATION_ID, serde_json::json!(correlation_id))
        .metadata(metadata::SAGA_STEP, serde_json::json!(step))
        .metadata(metadata::STEP_NUMBER, serde_json::json!(number))
        .build()
        .unwrap()
}

#[tokio::test]
async fn committed_rows_become_pending() {
    let store = get_test_store().await;
    let event = contact_created(AggregateId::new());
    let event_id = event.event_id;

    store.save_standalone(vec![event]).await.unwrap();

    let pending = store.get_pending_events(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_id, event_id);
    assert_eq!(pending[0].status, OutboxStatus::Pending);
    assert_eq!(pending[0].retry_count, 0);
    assert!(pending[0].id > 0);
    assert_eq!(pending[0].tenant_id.as_deref(), Some("tenant-1"));
    assert_eq!(
        pending[0].payload_json().unwrap(),
        serde_json::json!({"name": "Ada"})
    );
}

#[tokio::test]
async fn rollback_discards_business_row_and_outbox_row() {
    let store = get_test_store().await;
    let contact_id = AggregateId::new();

    let mut tx = store.begin().await.unwrap();
    sqlx::query("INSERT INTO contacts (id, name) VALUES ($1, $2)")
        .bind(contact_id.as_uuid())
        .bind("Ada")
        .execute(tx.connection())
        .await
        .unwrap();
    tx.save(contact_created(contact_id)).await.unwrap();
    tx.rollback().await.unwrap();

    let contacts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contacts")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(contacts, 0);
    assert!(store.get_pending_events(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn commit_persists_business_row_and_outbox_row_together() {
    let store = get_test_store().await;
    let contact_id = AggregateId::new();

    let mut tx = store.begin().await.unwrap();
    sqlx::query("INSERT INTO contacts (id, name) VALUES ($1, $2)")
        .bind(contact_id.as_uuid())
        .bind("Ada")
        .execute(tx.connection())
        .await
        .unwrap();
    tx.save(contact_created(contact_id)).await.unwrap();
    tx.commit().await.unwrap();

    let contacts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contacts")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(contacts, 1);
    assert_eq!(store.count_pending().await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_event_id_is_rejected() {
    let store = get_test_store().await;
    let event = contact_created(AggregateId::new());

    store.save_standalone(vec![event.clone()]).await.unwrap();
    let result = store.save_standalone(vec![event.clone()]).await;

    assert!(matches!(result, Err(OutboxError::DuplicateEvent(id)) if id == event.event_id));
}

#[tokio::test]
async fn claim_is_exclusive() {
    let store = get_test_store().await;
    let event = contact_created(AggregateId::new());
    let event_id = event.event_id;
    store.save_standalone(vec![event]).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.mark_as_processing(event_id).await.unwrap()
        }));
    }

    let mut claimed = 0;
    for handle in handles {
        if handle.await.unwrap() == ClaimOutcome::Claimed {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 1);
    assert!(store.get_pending_events(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn claim_of_unknown_row_is_not_found() {
    let store = get_test_store().await;
    let unknown = outbox::EventId::new();

    let result = store.mark_as_processing(unknown).await;

    assert!(matches!(result, Err(OutboxError::EventNotFound(_))));
}

#[tokio::test]
async fn failure_then_retry_after_backoff() {
    let store = get_test_store().await;
    let event = contact_created(AggregateId::new());
    let event_id = event.event_id;
    store.save_standalone(vec![event]).await.unwrap();

    assert!(store.mark_as_processing(event_id).await.unwrap().is_claimed());
    store.mark_as_failed(event_id, "broker down").await.unwrap();

    // Backoff not yet elapsed.
    let eligible = store
        .get_failed_events_for_retry(3, Duration::from_secs(3600), 10)
        .await
        .unwrap();
    assert!(eligible.is_empty());

    let eligible = store
        .get_failed_events_for_retry(3, Duration::ZERO, 10)
        .await
        .unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].retry_count, 1);
    assert_eq!(eligible[0].last_error.as_deref(), Some("broker down"));

    // Exhausted once retry_count reaches max_retries.
    let eligible = store
        .get_failed_events_for_retry(1, Duration::ZERO, 10)
        .await
        .unwrap();
    assert!(eligible.is_empty());

    assert!(store.claim_for_retry(event_id).await.unwrap().is_claimed());
    assert_eq!(
        store.claim_for_retry(event_id).await.unwrap(),
        ClaimOutcome::AlreadyClaimed
    );
    store.mark_as_processed(event_id).await.unwrap();

    let rows = store
        .query_events(OutboxQuery::new().status(OutboxStatus::Processed))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].processed_at.is_some());
    assert_eq!(rows[0].retry_count, 1);
}

#[tokio::test]
async fn stale_processing_rows_are_reclaimed() {
    let store = get_test_store().await;
    let event = contact_created(AggregateId::new());
    let event_id = event.event_id;
    store.save_standalone(vec![event]).await.unwrap();
    assert!(store.mark_as_processing(event_id).await.unwrap().is_claimed());

    assert_eq!(
        store
            .reclaim_stale_processing(Duration::from_secs(3600))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store.reclaim_stale_processing(Duration::ZERO).await.unwrap(),
        1
    );

    let pending = store.get_pending_events(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 0);
    assert!(pending[0].claimed_at.is_none());
}

#[tokio::test]
async fn late_failure_does_not_undo_processed_row() {
    let store = get_test_store().await;
    let step = saga_step("corr-late", "contact.created", 1);
    let event_id = step.event_id;
    store.save_standalone(vec![step]).await.unwrap();

    // Worker A's claim expires, worker B reclaims and delivers the row.
    assert!(store.mark_as_processing(event_id).await.unwrap().is_claimed());
    store.reclaim_stale_processing(Duration::ZERO).await.unwrap();
    assert!(store.mark_as_processing(event_id).await.unwrap().is_claimed());
    store.mark_as_processed(event_id).await.unwrap();

    store
        .mark_as_failed(event_id, "late failure from expired claim")
        .await
        .unwrap();

    let rows = store.get_saga_events("corr-late").await.unwrap();
    assert_eq!(rows[0].status, OutboxStatus::Processed);
    assert_eq!(rows[0].retry_count, 0);
    assert_eq!(
        store.get_saga_status("corr-late").await.unwrap().status,
        SagaStatus::Completed
    );
    assert_eq!(store.count_failed().await.unwrap(), 0);
}

#[tokio::test]
async fn failing_unknown_row_is_not_found() {
    let store = get_test_store().await;
    let err = store
        .mark_as_failed(outbox::EventId::new(), "boom")
        .await
        .unwrap_err();
    assert!(matches!(err, OutboxError::EventNotFound(_)));
}

#[tokio::test]
async fn saga_rows_and_status() {
    let store = get_test_store().await;
    let steps = vec![
        saga_step("corr-1", "contact.created", 1),
        saga_step("corr-1", "session.started", 2),
        saga_step("corr-2", "contact.created", 1),
    ];
    let first = steps[0].event_id;
    let second = steps[1].event_id;
    store.save_standalone(steps).await.unwrap();

    let rows = store.get_saga_events("corr-1").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].step_number(), Some(1));
    assert_eq!(rows[1].saga_step(), Some("session.started"));

    let summary = store.get_saga_status("corr-1").await.unwrap();
    assert_eq!(summary.status, SagaStatus::InProgress);
    assert_eq!((summary.total, summary.completed), (2, 0));

    for id in [first, second] {
        assert!(store.mark_as_processing(id).await.unwrap().is_claimed());
        store.mark_as_processed(id).await.unwrap();
    }
    let summary = store.get_saga_status("corr-1").await.unwrap();
    assert_eq!(summary.status, SagaStatus::Completed);
    assert_eq!(summary.completed, 2);

    let summary = store.get_saga_status("unknown").await.unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(summary.status, SagaStatus::InProgress);
}

#[tokio::test]
async fn saga_lookup_uses_correlation_index() {
    let store = get_test_store().await;
    let mut conn = store.pool().acquire().await.unwrap();
    sqlx::query("SET enable_seqscan = off")
        .execute(&mut *conn)
        .await
        .unwrap();

    let plan: Vec<String> = sqlx::query_scalar(
        "EXPLAIN SELECT * FROM outbox_events \
         WHERE metadata ->> 'correlation_id' = $1 ORDER BY created_at, id",
    )
    .bind("corr-1")
    .fetch_all(&mut *conn)
    .await
    .unwrap();

    sqlx::query("RESET enable_seqscan")
        .execute(&mut *conn)
        .await
        .unwrap();

    assert!(
        plan.iter().any(|line| line.contains("idx_outbox_correlation_id")),
        "plan did not use the correlation index: {plan:?}"
    );
}

#[tokio::test]
async fn query_events_is_scoped_and_paginated() {
    let store = get_test_store().await;
    let mut events = Vec::new();
    for _ in 0..5 {
        events.push(contact_created(AggregateId::new()));
    }
    let other_tenant = OutboxEvent::builder()
        .aggregate_id(AggregateId::new())
        .aggregate_type("contact")
        .event_type("contact.created")
        .payload_bytes(b"{}".to_vec())
        .tenant_id("tenant-2")
        .build()
        .unwrap();
    events.push(other_tenant);
    store.save_standalone(events).await.unwrap();

    let page = store
        .query_events(
            OutboxQuery::for_tenant("tenant-1")
                .project_id("project-1")
                .limit(2)
                .offset(1),
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert!(page.iter().all(|e| e.tenant_id.as_deref() == Some("tenant-1")));

    let other = store
        .query_events(OutboxQuery::for_tenant("tenant-2"))
        .await
        .unwrap();
    assert_eq!(other.len(), 1);
}
