use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    ChannelError, Delivery, MessageEnvelope, ORDER_CREATED_TOPIC, PAYMENT_PROCESSED_TOPIC, Result,
    channel::{EventChannel, partition_for},
};

#[derive(Debug, Clone)]
struct Record {
    key: String,
    envelope: MessageEnvelope,
}

#[derive(Default)]
struct Faults {
    fail_publishes: usize,
    drop_publishes: usize,
}

#[derive(Default)]
struct Inner {
    /// topic -> partition logs
    topics: HashMap<String, Vec<Vec<Record>>>,
    /// (topic, group, partition) -> next offset
    offsets: HashMap<(String, String, u32), u64>,
    faults: Faults,
}

/// Event channel held in process memory.
///
/// Publishing can be made to fail or to silently lose messages, which is
/// how tests exercise the reconciliation paths.
#[derive(Clone)]
pub struct InMemoryChannel {
    partitions: u32,
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryChannel {
    /// Channel with the order and payment topics registered.
    pub fn new(partitions: u32) -> Self {
        Self::with_topics(partitions, &[ORDER_CREATED_TOPIC, PAYMENT_PROCESSED_TOPIC])
    }

    pub fn with_topics(partitions: u32, topics: &[&str]) -> Self {
        let partitions = partitions.max(1);
        let topics = topics
            .iter()
            .map(|t| (t.to_string(), vec![Vec::new(); partitions as usize]))
            .collect();
        Self {
            partitions,
            inner: Arc::new(Mutex::new(Inner {
                topics,
                ..Inner::default()
            })),
        }
    }

    /// The next `n` publishes return an error.
    pub async fn fail_next_publishes(&self, n: usize) {
        self.inner.lock().await.faults.fail_publishes = n;
    }

    /// The next `n` publishes report success but are never delivered.
    pub async fn drop_next_publishes(&self, n: usize) {
        self.inner.lock().await.faults.drop_publishes = n;
    }

    /// All messages on a topic, partition by partition.
    pub async fn published(&self, topic: &str) -> Vec<MessageEnvelope> {
        let inner = self.inner.lock().await;
        inner
            .topics
            .get(topic)
            .map(|logs| {
                logs.iter()
                    .flatten()
                    .map(|r| r.envelope.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventChannel for InMemoryChannel {
    async fn publish(&self, topic: &str, key: &str, envelope: MessageEnvelope) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if inner.faults.fail_publishes > 0 {
            inner.faults.fail_publishes -= 1;
            return Err(ChannelError::PublishFailed {
                topic: topic.to_string(),
                reason: "channel unavailable".to_string(),
            });
        }

        let partition = partition_for(key, self.partitions);
        let drop_message = inner.faults.drop_publishes > 0;
        if drop_message {
            inner.faults.drop_publishes -= 1;
        }

        let logs = inner
            .topics
            .get_mut(topic)
            .ok_or_else(|| ChannelError::UnknownTopic(topic.to_string()))?;

        if drop_message {
            tracing::debug!(topic, key, message_id = %envelope.message_id, "message lost");
            return Ok(());
        }

        logs[partition as usize].push(Record {
            key: key.to_string(),
            envelope,
        });
        Ok(())
    }

    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn fetch(&self, topic: &str, group: &str, partition: u32) -> Result<Option<Delivery>> {
        let inner = self.inner.lock().await;
        let logs = inner
            .topics
            .get(topic)
            .ok_or_else(|| ChannelError::UnknownTopic(topic.to_string()))?;
        let offset = inner
            .offsets
            .get(&(topic.to_string(), group.to_string(), partition))
            .copied()
            .unwrap_or(0);

        Ok(logs
            .get(partition as usize)
            .and_then(|log| log.get(offset as usize))
            .map(|record| Delivery {
                topic: topic.to_string(),
                key: record.key.clone(),
                partition,
                offset,
                attempt: 1,
                envelope: record.envelope.clone(),
            }))
    }

    async fn commit(&self, topic: &str, group: &str, partition: u32, offset: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.topics.contains_key(topic) {
            return Err(ChannelError::UnknownTopic(topic.to_string()));
        }
        let committed = inner
            .offsets
            .entry((topic.to_string(), group.to_string(), partition))
            .or_insert(0);
        *committed = (*committed).max(offset + 1);
        Ok(())
    }

    async fn lag(&self, topic: &str, group: &str) -> Result<u64> {
        let inner = self.inner.lock().await;
        let logs = inner
            .topics
            .get(topic)
            .ok_or_else(|| ChannelError::UnknownTopic(topic.to_string()))?;
        Ok(logs
            .iter()
            .enumerate()
            .map(|(partition, log)| {
                let committed = inner
                    .offsets
                    .get(&(topic.to_string(), group.to_string(), partition as u32))
                    .copied()
                    .unwrap_or(0);
                log.len() as u64 - committed.min(log.len() as u64)
            })
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OrderCreated;
    use common::{AggregateId, Money, OwnerId};

    fn envelope_for(order_id: AggregateId) -> MessageEnvelope {
        MessageEnvelope::new(&OrderCreated {
            order_id,
            owner_id: OwnerId::new(),
            total_amount: Money::from_cents(100),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn same_key_preserves_order() {
        let channel = InMemoryChannel::new(4);
        let order_id = AggregateId::new();
        let key = order_id.to_string();
        let first = envelope_for(order_id);
        let second = envelope_for(order_id);

        channel
            .publish(ORDER_CREATED_TOPIC, &key, first.clone())
            .await
            .unwrap();
        channel
            .publish(ORDER_CREATED_TOPIC, &key, second.clone())
            .await
            .unwrap();

        let partition = partition_for(&key, 4);
        let d1 = channel
            .fetch(ORDER_CREATED_TOPIC, "g", partition)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d1.envelope.message_id, first.message_id);

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
    }

    #[tokio::test]
    async fn uncommitted_message_is_redelivered() {
        let channel = InMemoryChannel::new(1);
        let order_id = AggregateId::new();
        channel
            .publish(ORDER_CREATED_TOPIC, &order_id.to_string(), envelope_for(order_id))
            .await
            .unwrap();

        let a = channel.fetch(ORDER_CREATED_TOPIC, "g", 0).await.unwrap().unwrap();
        let b = channel.fetch(ORDER_CREATED_TOPIC, "g", 0).await.unwrap().unwrap();
        assert_eq!(a.envelope.message_id, b.envelope.message_id);
    }

    #[tokio::test]
    async fn groups_have_independent_offsets() {
        let channel = InMemoryChannel::new(1);
        let order_id = AggregateId::new();
        channel
            .publish(ORDER_CREATED_TOPIC, &order_id.to_string(), envelope_for(order_id))
            .await
            .unwrap();

        channel.commit(ORDER_CREATED_TOPIC, "a", 0, 0).await.unwrap();
        assert!(channel.fetch(ORDER_CREATED_TOPIC, "a", 0).await.unwrap().is_none());
        assert!(channel.fetch(ORDER_CREATED_TOPIC, "b", 0).await.unwrap().is_some());
        assert_eq!(channel.lag(ORDER_CREATED_TOPIC, "b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn injected_failures_and_losses() {
        let channel = InMemoryChannel::new(2);
        let order_id = AggregateId::new();
        let key = order_id.to_string();

        channel.fail_next_publishes(1).await;
        assert!(matches!(
            channel
                .publish(ORDER_CREATED_TOPIC, &key, envelope_for(order_id))
                .await,
            Err(ChannelError::PublishFailed { .. })
        ));

        channel.drop_next_publishes(1).await;
        channel
            .publish(ORDER_CREATED_TOPIC, &key, envelope_for(order_id))
            .await
            .unwrap();
        assert!(channel.published(ORDER_CREATED_TOPIC).await.is_empty());

        channel
            .publish(ORDER_CREATED_TOPIC, &key, envelope_for(order_id))
            .await
            .unwrap();
        assert_eq!(channel.published(ORDER_CREATED_TOPIC).await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_topic_is_rejected() {
        let channel = InMemoryChannel::new(1);
        let order_id = AggregateId::new();
        assert!(matches!(
            channel.publish("nope", "k", envelope_for(order_id)).await,
            Err(ChannelError::UnknownTopic(_))
        ));
    }
}
