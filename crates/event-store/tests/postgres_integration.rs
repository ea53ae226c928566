//! PostgreSQL integration tests.
//!
//! These share one container and need Docker. Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;

use common::MessageId;
use event_store::{
    AggregateId, AppendOptions, ApplyStatus, EventEnvelope, EventStore, EventStoreError,
    IdempotencyLedger, PostgresEventStore, Receipt, Version,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Keeps the container alive.
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
            for migration in [
                include_str!("../../../migrations/001_create_events_table.sql"),
                include_str!("../../../migrations/002_create_processed_messages_table.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events, processed_messages")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn create_test_event(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Payment")
        .event_type(event_type)
        .version(Version::new(version))
        .payload_raw(serde_json::json!({"test": true}))
        .build()
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn append_and_retrieve_events() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let version = store
        .append(
            vec![
                create_test_event(id, 1, "PaymentOpened"),
                create_test_event(id, 2, "ChargeAttempted"),
            ],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    assert_eq!(version, Version::new(2));

    let events = store.get_events_for_aggregate(id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "PaymentOpened");
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn second_stream_creation_conflicts() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    store
        .append(
            vec![create_test_event(id, 1, "PaymentOpened")],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();
    let result = store
        .append(
            vec![create_test_event(id, 1, "PaymentOpened")],
            AppendOptions::expect_new(),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { .. })
    ));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn duplicate_receipt_rolls_back_events() {
    let store = get_test_store().await;
    let id = AggregateId::new();
    let message_id = MessageId::new();

    store
        .append(
            vec![create_test_event(id, 1, "PaymentOpened")],
            AppendOptions::expect_new().with_receipt(Receipt::new("payment-service", message_id)),
        )
        .await
        .unwrap();

    let result = store
        .append(
            vec![create_test_event(id, 2, "PaymentApproved")],
            AppendOptions::expect_version(Version::first())
                .with_receipt(Receipt::new("payment-service", message_id)),
        )
        .await;

    assert!(matches!(result, Err(EventStoreError::AlreadyApplied { .. })));
    assert_eq!(
        store.get_aggregate_version(id).await.unwrap(),
        Some(Version::first())
    );
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn try_apply_is_first_time_once() {
    let store = get_test_store().await;
    let message_id = MessageId::new();

    assert_eq!(
        store.try_apply("order-service", message_id).await.unwrap(),
        ApplyStatus::FirstTime
    );
    assert_eq!(
        store.try_apply("order-service", message_id).await.unwrap(),
        ApplyStatus::AlreadyApplied
    );
    assert!(store.is_applied("order-service", message_id).await.unwrap());
    assert!(!store.is_applied("payment-service", message_id).await.unwrap());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn stream_follows_insertion_order() {
    use futures_util::StreamExt;

    let store = get_test_store().await;
    let a = AggregateId::new();
    let b = AggregateId::new();
    for (id, version, ty) in [(b, 1, "B1"), (a, 1, "A1"), (b, 2, "B2")] {
        store
            .append(vec![create_test_event(id, version, ty)], AppendOptions::new())
            .await
            .unwrap();
    }

    let types: Vec<String> = store
        .stream_all_events()
        .await
        .unwrap()
        .map(|e| e.unwrap().event_type)
        .collect()
        .await;
    assert_eq!(types, vec!["B1", "A1", "B2"]);
}
