//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, MessageId, Money, OwnerId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::OrderLine;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order persisted in CREATED; `message_id` identifies its OrderCreated message.
    OrderPlaced(OrderPlacedData),

    /// OrderCreated was accepted by the channel.
    PaymentRequested(PaymentRequestedData),

    OrderPaid(OrderPaidData),

    OrderPaymentFailed(OrderPaymentFailedData),

    OrderCompleted(OrderCompletedData),

    OrderCancelled(OrderCancelledData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::PaymentRequested(_) => "PaymentRequested",
            OrderEvent::OrderPaid(_) => "OrderPaid",
            OrderEvent::OrderPaymentFailed(_) => "OrderPaymentFailed",
            OrderEvent::OrderCompleted(_) => "OrderCompleted",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: AggregateId,
    pub owner_id: OwnerId,
    pub lines: Vec<OrderLine>,
    pub total_amount: Money,
    pub shipping_address: String,
    pub message_id: MessageId,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequestedData {
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaidData {
    pub payment_id: AggregateId,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaymentFailedData {
    pub payment_id: Option<AggregateId>,
    pub reason: String,
    /// Forced by reconciliation rather than reported by the payment side.
    #[serde(default)]
    pub compensated: bool,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCompletedData {
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn order_placed(
        order_id: AggregateId,
        owner_id: OwnerId,
        lines: Vec<OrderLine>,
        shipping_address: String,
        message_id: MessageId,
    ) -> Self {
        let total_amount = lines.iter().map(OrderLine::line_total).sum();
        OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            owner_id,
            lines,
            total_amount,
            shipping_address,
            message_id,
            placed_at: Utc::now(),
        })
    }

    pub fn payment_requested() -> Self {
        OrderEvent::PaymentRequested(PaymentRequestedData {
            requested_at: Utc::now(),
        })
    }

    pub fn order_paid(payment_id: AggregateId) -> Self {
        OrderEvent::OrderPaid(OrderPaidData {
            payment_id,
            paid_at: Utc::now(),
        })
    }

    pub fn payment_failed(
        payment_id: Option<AggregateId>,
        reason: impl Into<String>,
        compensated: bool,
    ) -> Self {
        OrderEvent::OrderPaymentFailed(OrderPaymentFailedData {
            payment_id,
            reason: reason.into(),
            compensated,
            failed_at: Utc::now(),
        })
    }

    pub fn order_completed() -> Self {
        OrderEvent::OrderCompleted(OrderCompletedData {
            completed_at: Utc::now(),
        })
    }

    pub fn order_cancelled(reason: impl Into<String>) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            reason: reason.into(),
            cancelled_at: Utc::now(),
        })
    }

    /// When the event happened.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(d) => d.placed_at,
            OrderEvent::PaymentRequested(d) => d.requested_at,
            OrderEvent::OrderPaid(d) => d.paid_at,
            OrderEvent::OrderPaymentFailed(d) => d.failed_at,
            OrderEvent::OrderCompleted(d) => d.completed_at,
            OrderEvent::OrderCancelled(d) => d.cancelled_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placed_computes_total_once() {
        let event = OrderEvent::order_placed(
            AggregateId::new(),
            OwnerId::new(),
            vec![
                OrderLine {
                    product_id: "A".into(),
                    quantity: 1,
                    unit_price: Money::from_cents(1000),
                },
                OrderLine {
                    product_id: "B".into(),
                    quantity: 2,
                    unit_price: Money::from_cents(500),
                },
            ],
            "1 Main St".into(),
            MessageId::new(),
        );

        let OrderEvent::OrderPlaced(data) = &event else {
            panic!("expected OrderPlaced");
        };
        assert_eq!(data.total_amount, Money::from_cents(2000));
        assert_eq!(event.event_type(), "OrderPlaced");
    }

    #[test]
    fn tagged_serialization() {
        let event = OrderEvent::payment_failed(None, "card declined", false);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "OrderPaymentFailed");
        assert_eq!(json["data"]["reason"], "card declined");
    }
}
