use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::MessageId;
use serde::{Deserialize, Serialize};

use crate::{ChannelError, Contract, Result};

/// A message as carried by the channel.
///
/// `message_id` is the idempotency key. Republishing the same logical
/// message reuses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message_id: MessageId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl MessageEnvelope {
    /// Wraps a contract message under a fresh id.
    pub fn new<C: Contract>(message: &C) -> Result<Self> {
        Self::with_id(MessageId::new(), message)
    }

    pub fn with_id<C: Contract>(message_id: MessageId, message: &C) -> Result<Self> {
        Ok(Self {
            message_id,
            kind: C::KIND.to_string(),
            payload: serde_json::to_value(message)?,
            published_at: Utc::now(),
            headers: HashMap::new(),
        })
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn decode<C: Contract>(&self) -> Result<C> {
        if self.kind != C::KIND {
            return Err(ChannelError::Decode {
                expected: C::KIND,
                actual: self.kind.clone(),
                reason: "kind mismatch".to_string(),
            });
        }
        serde_json::from_value(self.payload.clone()).map_err(|e| ChannelError::Decode {
            expected: C::KIND,
            actual: self.kind.clone(),
            reason: e.to_string(),
        })
    }
}

/// One delivery attempt of a message to a consumer group.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub key: String,
    pub partition: u32,
    pub offset: u64,
    /// Starts at 1 and grows on each redelivery of the same offset.
    pub attempt: u32,
    pub envelope: MessageEnvelope,
}

impl Delivery {
    pub fn message_id(&self) -> MessageId {
        self.envelope.message_id
    }

    pub fn decode<C: Contract>(&self) -> Result<C> {
        self.envelope.decode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OrderCreated, PaymentOutcome};
    use common::{AggregateId, Money, OwnerId};

    fn order_created() -> OrderCreated {
        OrderCreated {
            order_id: AggregateId::new(),
            owner_id: OwnerId::new(),
            total_amount: Money::from_cents(2000),
        }
    }

    #[test]
    fn decodes_matching_kind() {
        let message = order_created();
        let envelope = MessageEnvelope::new(&message).unwrap();
        assert_eq!(envelope.kind, "OrderCreated");
        assert_eq!(envelope.decode::<OrderCreated>().unwrap(), message);
    }

    #[test]
    fn rejects_other_kind() {
        let envelope = MessageEnvelope::new(&order_created()).unwrap();
        assert!(matches!(
            envelope.decode::<PaymentOutcome>(),
            Err(ChannelError::Decode { .. })
        ));
    }

    #[test]
    fn with_id_keeps_the_id() {
        let id = MessageId::new();
        let envelope = MessageEnvelope::with_id(id, &order_created())
            .unwrap()
            .with_header("source", "sweep");
        assert_eq!(envelope.message_id, id);
        assert_eq!(envelope.headers["source"], "sweep");
    }
}
