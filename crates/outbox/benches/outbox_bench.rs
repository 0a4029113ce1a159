use std::hint::black_box;

use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use outbox::{InMemoryOutboxStore, OutboxEvent, OutboxStore, OutboxStoreExt, metadata};

fn make_event(correlation_id: &str, step: i64) -> OutboxEvent {
    OutboxEvent::builder()
        .aggregate_id(AggregateId::new())
        .aggregate_type("contact")
        .event_type("contact.created")
        .payload(&serde_json::json!({
            "name": "Ada Lovelace",
            "email": "ada@example.com"
        }))
        .unwrap()
        .metadata(metadata::CORRELATION_ID, serde_json::json!(correlation_id))
        .metadata(metadata::STEP_NUMBER, serde_json::json!(step))
        .tenant_id("tenant-1")
        .build()
        .unwrap()
}

fn bench_save_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("outbox/save_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryOutboxStore::new();
                store
                    .save_standalone(vec![make_event("corr", 1)])
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_save_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("outbox/save_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryOutboxStore::new();
                let events = (1..=10).map(|n| make_event("corr", n)).collect();
                store.save_standalone(events).await.unwrap();
            });
        });
    });
}

fn bench_claim_and_process(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("outbox/claim_and_process_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryOutboxStore::new();
                let events = (1..=100).map(|n| make_event("corr", n)).collect();
                store.save_standalone(events).await.unwrap();
                for event in store.get_pending_events(100).await.unwrap() {
                    if store
                        .mark_as_processing(event.event_id)
                        .await
                        .unwrap()
                        .is_claimed()
                    {
                        store.mark_as_processed(event.event_id).await.unwrap();
                    }
                }
            });
        });
    });
}

fn bench_saga_status(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryOutboxStore::new();

    rt.block_on(async {
        for saga in 0..100 {
            let correlation_id = format!("saga-{saga}");
            let events = (1..=5).map(|n| make_event(&correlation_id, n)).collect();
            store.save_standalone(events).await.unwrap();
        }
    });

    c.bench_function("outbox/get_saga_status_500_rows", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(store.get_saga_status("saga-42").await.unwrap());
            });
        });
    });
}

criterion_group!(
    benches,
    bench_save_single_event,
    bench_save_batch_10,
    bench_claim_and_process,
    bench_saga_status
);
criterion_main!(benches);
