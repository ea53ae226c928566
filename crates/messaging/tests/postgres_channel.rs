//! PostgreSQL channel integration tests.
//!
//! These share one container and need Docker. Run with:
//!
//! ```bash
//! cargo test -p messaging --test postgres_channel -- --ignored
//! ```

use std::sync::Arc;

use common::{AggregateId, Money, OwnerId};
use messaging::{
    ChannelError, EventChannel, EventChannelExt, MessageEnvelope, ORDER_CREATED_TOPIC,
    OrderCreated, PostgresChannel, partition_for,
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
            sqlx::raw_sql(include_str!(
                "../../../migrations/003_create_channel_tables.sql"
            ))
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

async fn connect() -> PgPool {
    let info = get_container_info().await;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap()
}

async fn get_test_channel(partitions: u32) -> PostgresChannel {
    let pool = connect().await;
    sqlx::query("TRUNCATE TABLE channel_messages, channel_offsets")
        .execute(&pool)
        .await
        .unwrap();
    PostgresChannel::new(pool, partitions)
}

fn order_created(order_id: AggregateId) -> OrderCreated {
    OrderCreated {
        order_id,
        owner_id: OwnerId::new(),
        total_amount: Money::from_cents(1500),
    }
}

async fn publish(channel: &PostgresChannel, order_id: AggregateId) -> MessageEnvelope {
    let message = order_created(order_id);
    let envelope = MessageEnvelope::new(&message).unwrap();
    channel
        .publish_contract(&message, envelope.clone())
        .await
        .unwrap();
    envelope
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn test_same_key_is_delivered_in_publish_order() {
    let channel = get_test_channel(4).await;
    let order_id = AggregateId::new();
    let first = publish(&channel, order_id).await;
    let second = publish(&channel, order_id).await;
    let partition = partition_for(&order_id.to_string(), 4);

    let d1 = channel
        .fetch(ORDER_CREATED_TOPIC, "g", partition)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(d1.envelope, first);
    assert_eq!(d1.offset, 0);
    assert_eq!(d1.key, order_id.to_string());

    channel
        .commit(ORDER_CREATED_TOPIC, "g", partition, d1.offset)
        .await
        .unwrap();
    let d2 = channel
        .fetch(ORDER_CREATED_TOPIC, "g", partition)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(d2.envelope.message_id, second.message_id);
    assert_eq!(d2.offset, 1);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn test_uncommitted_messages_survive_restart() {
    let channel = get_test_channel(1).await;
    let order_id = AggregateId::new();
    let envelope = publish(&channel, order_id).await;
    let before = channel
        .fetch(ORDER_CREATED_TOPIC, "payment-service", 0)
        .await
        .unwrap()
        .unwrap();
    channel.pool().close().await;

    // A new process over a new pool picks up where the old one stopped.
    let restarted = PostgresChannel::new(connect().await, 1);
    let after = restarted
        .fetch(ORDER_CREATED_TOPIC, "payment-service", 0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.offset, before.offset);
    assert_eq!(after.envelope, envelope);
    assert_eq!(
        restarted
            .lag(ORDER_CREATED_TOPIC, "payment-service")
            .await
            .unwrap(),
        1
    );

    restarted
        .commit(ORDER_CREATED_TOPIC, "payment-service", 0, after.offset)
        .await
        .unwrap();
    let again = PostgresChannel::new(connect().await, 1);
    assert!(
        again
            .fetch(ORDER_CREATED_TOPIC, "payment-service", 0)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn test_groups_track_offsets_independently() {
    let channel = get_test_channel(1).await;
    publish(&channel, AggregateId::new()).await;
    publish(&channel, AggregateId::new()).await;

    channel.commit(ORDER_CREATED_TOPIC, "a", 0, 1).await.unwrap();
    // An older offset never moves a group backwards.
    channel.commit(ORDER_CREATED_TOPIC, "a", 0, 0).await.unwrap();

    assert_eq!(channel.lag(ORDER_CREATED_TOPIC, "a").await.unwrap(), 0);
    assert_eq!(channel.lag(ORDER_CREATED_TOPIC, "b").await.unwrap(), 2);
    assert!(
        channel
            .fetch(ORDER_CREATED_TOPIC, "a", 0)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(
        channel
            .fetch(ORDER_CREATED_TOPIC, "b", 0)
            .await
            .unwrap()
            .unwrap()
            .offset,
        0
    );
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn test_concurrent_publishes_get_dense_offsets() {
    let channel = Arc::new(get_test_channel(1).await);
    let mut handles = Vec::new();
    for _ in 0..10 {
        let channel = Arc::clone(&channel);
        handles.push(tokio::spawn(async move {
            publish(&channel, AggregateId::new()).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut offsets = Vec::new();
    while let Some(delivery) = channel.fetch(ORDER_CREATED_TOPIC, "g", 0).await.unwrap() {
        offsets.push(delivery.offset);
        channel
            .commit(ORDER_CREATED_TOPIC, "g", 0, delivery.offset)
            .await
            .unwrap();
    }
    assert_eq!(offsets, (0..10).collect::<Vec<u64>>());
    assert_eq!(channel.published(ORDER_CREATED_TOPIC).await.unwrap().len(), 10);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn test_unknown_topic_is_rejected() {
    let channel = get_test_channel(1).await;
    let order_id = AggregateId::new();
    let envelope = MessageEnvelope::new(&order_created(order_id)).unwrap();

    assert!(matches!(
        channel.publish("nope", &order_id.to_string(), envelope).await,
        Err(ChannelError::UnknownTopic(_))
    ));
    assert!(matches!(
        channel.fetch("nope", "g", 0).await,
        Err(ChannelError::UnknownTopic(_))
    ));
}
