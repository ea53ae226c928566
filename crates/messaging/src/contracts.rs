//! Wire contracts exchanged between the components.
//!
//! Field names are camelCase on the wire and statuses are upper-case names.

use common::{AggregateId, Money, OwnerId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

pub const ORDER_CREATED_TOPIC: &str = "order-created";
pub const PAYMENT_PROCESSED_TOPIC: &str = "payment-processed";

/// A message type bound to its topic.
pub trait Contract: Serialize + DeserializeOwned + Send + Sync {
    const TOPIC: &'static str;
    const KIND: &'static str;

    /// Key that selects the partition. Every contract is keyed by order.
    fn partition_key(&self) -> String;
}

/// Published by the order component once an order is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: AggregateId,
    pub owner_id: OwnerId,
    pub total_amount: Money,
}

impl Contract for OrderCreated {
    const TOPIC: &'static str = ORDER_CREATED_TOPIC;
    const KIND: &'static str = "OrderCreated";

    fn partition_key(&self) -> String {
        self.order_id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Cancelled,
    RefundPending,
    Refunded,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "SUCCESS",
            OutcomeStatus::Failed => "FAILED",
            OutcomeStatus::Cancelled => "CANCELLED",
            OutcomeStatus::RefundPending => "REFUND_PENDING",
            OutcomeStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published by the payment component for every payment status change the
/// order side may act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub order_id: AggregateId,
    pub payment_id: Option<AggregateId>,
    pub amount: Money,
    pub status: OutcomeStatus,
    pub reason: Option<String>,
}

impl Contract for PaymentOutcome {
    const TOPIC: &'static str = PAYMENT_PROCESSED_TOPIC;
    const KIND: &'static str = "PaymentOutcome";

    fn partition_key(&self) -> String {
        self.order_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_created_wire_shape() {
        let message = OrderCreated {
            order_id: AggregateId::new(),
            owner_id: OwnerId::new(),
            total_amount: Money::from_cents(2000),
        };
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["orderId"], message.order_id.to_string());
        assert_eq!(json["ownerId"], message.owner_id.to_string());
        assert_eq!(json["totalAmount"]["cents"], 2000);
    }

    #[test]
    fn outcome_status_is_upper_case() {
        let message = PaymentOutcome {
            order_id: AggregateId::new(),
            payment_id: None,
            amount: Money::from_cents(500),
            status: OutcomeStatus::RefundPending,
            reason: Some("customer request".into()),
        };
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["status"], "REFUND_PENDING");
        assert_eq!(json["paymentId"], serde_json::Value::Null);
        assert_eq!(OutcomeStatus::RefundPending.to_string(), "REFUND_PENDING");
    }

    #[test]
    fn keyed_by_order() {
        let order_id = AggregateId::new();
        let message = PaymentOutcome {
            order_id,
            payment_id: Some(order_id.derive("payment")),
            amount: Money::from_cents(1),
            status: OutcomeStatus::Success,
            reason: None,
        };
        assert_eq!(message.partition_key(), order_id.to_string());
    }
}
