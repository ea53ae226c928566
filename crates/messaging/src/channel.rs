use std::sync::Arc;

use async_trait::async_trait;

use crate::{Contract, Delivery, MessageEnvelope, Result};

/// A partitioned, at-least-once message log.
///
/// `publish` returns only after the message is appended to its partition.
/// Consumer groups read each partition from their committed offset; an
/// uncommitted message is delivered again.
#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, envelope: MessageEnvelope) -> Result<()>;

    fn partitions(&self) -> u32;

    /// Message at the group's committed offset, if any.
    async fn fetch(&self, topic: &str, group: &str, partition: u32) -> Result<Option<Delivery>>;

    /// Moves the group's offset past `offset`.
    async fn commit(&self, topic: &str, group: &str, partition: u32, offset: u64) -> Result<()>;

    /// Messages on `topic` that `group` has not committed, over all partitions.
    async fn lag(&self, topic: &str, group: &str) -> Result<u64>;
}

#[async_trait]
impl<T: EventChannel + ?Sized> EventChannel for Arc<T> {
    async fn publish(&self, topic: &str, key: &str, envelope: MessageEnvelope) -> Result<()> {
        (**self).publish(topic, key, envelope).await
    }

    fn partitions(&self) -> u32 {
        (**self).partitions()
    }

    async fn fetch(&self, topic: &str, group: &str, partition: u32) -> Result<Option<Delivery>> {
        (**self).fetch(topic, group, partition).await
    }

    async fn commit(&self, topic: &str, group: &str, partition: u32, offset: u64) -> Result<()> {
        (**self).commit(topic, group, partition, offset).await
    }

    async fn lag(&self, topic: &str, group: &str) -> Result<u64> {
        (**self).lag(topic, group).await
    }
}

#[async_trait]
pub trait EventChannelExt: EventChannel {
    /// Publishes a contract message under `envelope`, routed by its key.
    async fn publish_contract<C: Contract>(&self, message: &C, envelope: MessageEnvelope) -> Result<()> {
        self.publish(C::TOPIC, &message.partition_key(), envelope)
            .await
    }
}

impl<T: EventChannel + ?Sized> EventChannelExt for T {}

/// Stable key-to-partition mapping (FNV-1a).
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % u64::from(partitions.max(1))) as u32
}
