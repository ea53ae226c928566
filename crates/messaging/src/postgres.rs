use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::{
    ChannelError, Delivery, MessageEnvelope, ORDER_CREATED_TOPIC, PAYMENT_PROCESSED_TOPIC, Result,
    channel::{EventChannel, partition_for},
};

/// Event channel persisted in PostgreSQL.
///
/// Each topic partition is a table-backed log. A publish is acknowledged
/// only after its row commits, and group offsets live next to the log, so
/// messages survive a restart until their group commits them.
#[derive(Clone)]
pub struct PostgresChannel {
    pool: PgPool,
    partitions: u32,
    topics: Vec<String>,
}

impl PostgresChannel {
    /// Channel with the order and payment topics registered.
    pub fn new(pool: PgPool, partitions: u32) -> Self {
        Self::with_topics(pool, partitions, &[ORDER_CREATED_TOPIC, PAYMENT_PROCESSED_TOPIC])
    }

    pub fn with_topics(pool: PgPool, partitions: u32, topics: &[&str]) -> Self {
        Self {
            pool,
            partitions: partitions.max(1),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// All messages on a topic, partition by partition.
    pub async fn published(&self, topic: &str) -> Result<Vec<MessageEnvelope>> {
        self.require_topic(topic)?;
        let bodies: Vec<serde_json::Value> = sqlx::query_scalar(
            "SELECT envelope FROM channel_messages WHERE topic = $1 ORDER BY partition_id, log_offset",
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;
        bodies
            .into_iter()
            .map(|body| serde_json::from_value(body).map_err(ChannelError::from))
            .collect()
    }

    fn require_topic(&self, topic: &str) -> Result<()> {
        if self.topics.iter().any(|t| t == topic) {
            Ok(())
        } else {
            Err(ChannelError::UnknownTopic(topic.to_string()))
        }
    }
}

#[async_trait]
impl EventChannel for PostgresChannel {
    async fn publish(&self, topic: &str, key: &str, envelope: MessageEnvelope) -> Result<()> {
        self.require_topic(topic)?;
        let partition = partition_for(key, self.partitions) as i32;
        let body = serde_json::to_value(&envelope)?;

        let mut tx = self.pool.begin().await?;

        // Serializes appends per partition so offsets stay dense.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), $2)")
            .bind(topic)
            .bind(partition)
            .execute(&mut *tx)
            .await?;

        let offset: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO channel_messages (topic, partition_id, log_offset, message_key, message_id, envelope)
            SELECT $1, $2, COALESCE(MAX(log_offset) + 1, 0), $3, $4, $5
            FROM channel_messages
            WHERE topic = $1 AND partition_id = $2
            RETURNING log_offset
            "#,
        )
        .bind(topic)
        .bind(partition)
        .bind(key)
        .bind(envelope.message_id.as_uuid())
        .bind(body)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ChannelError::PublishFailed {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        tx.commit().await?;
        tracing::trace!(topic, key, partition, offset, message_id = %envelope.message_id, "message appended");
        Ok(())
    }

    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn fetch(&self, topic: &str, group: &str, partition: u32) -> Result<Option<Delivery>> {
        self.require_topic(topic)?;
        let row = sqlx::query(
            r#"
            SELECT m.log_offset, m.message_key, m.envelope
            FROM channel_messages m
            WHERE m.topic = $1
              AND m.partition_id = $2
              AND m.log_offset >= COALESCE(
                  (SELECT o.next_offset FROM channel_offsets o
                   WHERE o.topic = $1 AND o.consumer_group = $3 AND o.partition_id = $2),
                  0)
            ORDER BY m.log_offset ASC
            LIMIT 1
            "#,
        )
        .bind(topic)
        .bind(partition as i32)
        .bind(group)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let offset: i64 = row.try_get("log_offset")?;
        let envelope: MessageEnvelope = serde_json::from_value(row.try_get("envelope")?)?;

        Ok(Some(Delivery {
            topic: topic.to_string(),
            key: row.try_get("message_key")?,
            partition,
            offset: offset as u64,
            attempt: 1,
            envelope,
        }))
    }

    async fn commit(&self, topic: &str, group: &str, partition: u32, offset: u64) -> Result<()> {
        self.require_topic(topic)?;
        sqlx::query(
            r#"
            INSERT INTO channel_offsets (topic, consumer_group, partition_id, next_offset)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (topic, consumer_group, partition_id) DO UPDATE
            SET next_offset = GREATEST(channel_offsets.next_offset, EXCLUDED.next_offset),
                committed_at = NOW()
            "#,
        )
        .bind(topic)
        .bind(group)
        .bind(partition as i32)
        .bind(offset as i64 + 1)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lag(&self, topic: &str, group: &str) -> Result<u64> {
        self.require_topic(topic)?;
        let lag: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM channel_messages m
            LEFT JOIN channel_offsets o
              ON o.topic = m.topic AND o.partition_id = m.partition_id AND o.consumer_group = $2
            WHERE m.topic = $1 AND m.log_offset >= COALESCE(o.next_offset, 0)
            "#,
        )
        .bind(topic)
        .bind(group)
        .fetch_one(&self.pool)
        .await?;
        Ok(lag as u64)
    }
}
