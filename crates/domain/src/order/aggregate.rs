//! Order aggregate.

use chrono::{DateTime, Utc};
use common::{AggregateId, MessageId, Money, OwnerId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{OrderError, OrderEvent, OrderLine, OrderStatus, events::OrderPlacedData};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    owner_id: Option<OwnerId>,

    lines: Vec<OrderLine>,

    /// Fixed at placement; never recomputed.
    total_amount: Money,

    shipping_address: String,

    status: OrderStatus,

    payment_id: Option<AggregateId>,

    failure_reason: Option<String>,

    /// Id of this order's OrderCreated message, reused on republish.
    created_message_id: Option<MessageId>,

    created_at: Option<DateTime<Utc>>,

    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        self.updated_at = Some(event.occurred_at());
        match event {
            OrderEvent::OrderPlaced(data) => self.apply_placed(data),
            OrderEvent::PaymentRequested(_) => {
                self.status = OrderStatus::PendingPayment;
            }
            OrderEvent::OrderPaid(data) => {
                self.status = OrderStatus::Paid;
                self.payment_id = Some(data.payment_id);
            }
            OrderEvent::OrderPaymentFailed(data) => {
                self.status = OrderStatus::PaymentFailed;
                self.payment_id = data.payment_id.or(self.payment_id);
                self.failure_reason = Some(data.reason);
            }
            OrderEvent::OrderCompleted(_) => {
                self.status = OrderStatus::Completed;
            }
            OrderEvent::OrderCancelled(data) => {
                self.status = OrderStatus::Cancelled;
                self.failure_reason = Some(data.reason);
            }
        }
    }
}

// Queries
impl Order {
    pub fn owner_id(&self) -> Option<OwnerId> {
        self.owner_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn shipping_address(&self) -> &str {
        &self.shipping_address
    }

    pub fn payment_id(&self) -> Option<AggregateId> {
        self.payment_id
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn created_message_id(&self) -> Option<MessageId> {
        self.created_message_id
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Commands
//
// Creation and client-driven transitions reject illegal states. Settlement
// commands driven by payment outcomes return no events instead, so late or
// repeated outcomes are discarded without failing the consumer.
impl Order {
    pub fn place(
        &self,
        order_id: AggregateId,
        owner_id: OwnerId,
        lines: Vec<OrderLine>,
        shipping_address: String,
        message_id: MessageId,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyCreated);
        }
        if lines.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(line) = lines.iter().find(|l| l.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: line.product_id.to_string(),
                quantity: line.quantity,
            });
        }

        Ok(vec![OrderEvent::order_placed(
            order_id,
            owner_id,
            lines,
            shipping_address,
            message_id,
        )])
    }

    /// CREATED → PENDING_PAYMENT once OrderCreated is on the channel.
    pub fn request_payment(&self) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_request_payment() {
            return Ok(vec![]);
        }
        Ok(vec![OrderEvent::payment_requested()])
    }

    pub fn mark_paid(&self, payment_id: AggregateId) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_settle() {
            return Ok(vec![]);
        }
        Ok(vec![OrderEvent::order_paid(payment_id)])
    }

    /// Also used by reconciliation with `compensated = true`.
    pub fn mark_payment_failed(
        &self,
        payment_id: Option<AggregateId>,
        reason: &str,
        compensated: bool,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_settle() {
            return Ok(vec![]);
        }
        Ok(vec![OrderEvent::payment_failed(
            payment_id,
            reason,
            compensated,
        )])
    }

    /// PAID → CANCELLED after the payment was cancelled.
    pub fn cancel_for_payment(&self, reason: &str) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_cancel() {
            return Ok(vec![]);
        }
        Ok(vec![OrderEvent::order_cancelled(reason)])
    }

    pub fn complete(&self) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_complete() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action: "complete",
            });
        }
        Ok(vec![OrderEvent::order_completed()])
    }
}

impl Order {
    fn apply_placed(&mut self, data: OrderPlacedData) {
        self.id = Some(data.order_id);
        self.owner_id = Some(data.owner_id);
        self.lines = data.lines;
        self.total_amount = data.total_amount;
        self.shipping_address = data.shipping_address;
        self.created_message_id = Some(data.message_id);
        self.created_at = Some(data.placed_at);
        self.status = OrderStatus::Created;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product: &str, quantity: u32, cents: i64) -> OrderLine {
        OrderLine {
            product_id: product.into(),
            quantity,
            unit_price: Money::from_cents(cents),
        }
    }

    fn placed_order() -> Order {
        let mut order = Order::default();
        let events = order
            .place(
                AggregateId::new(),
                OwnerId::new(),
                vec![line("A", 1, 1000), line("B", 2, 500)],
                "1 Main St".into(),
                MessageId::new(),
            )
            .unwrap();
        order.apply_events(events);
        order
    }

    fn step(order: &mut Order, command: impl Fn(&Order) -> Result<Vec<OrderEvent>, OrderError>) {
        let events = command(order).unwrap();
        order.apply_events(events);
    }

    #[test]
    fn place_sets_created_with_total() {
        let order = placed_order();
        assert_eq!(order.status(), OrderStatus::Created);
        assert_eq!(order.total_amount(), Money::from_cents(2000));
        assert_eq!(order.lines().len(), 2);
        assert!(order.created_message_id().is_some());
    }

    #[test]
    fn place_validates_lines() {
        let order = Order::default();
        let id = AggregateId::new();
        let owner = OwnerId::new();

        assert!(matches!(
            order.place(id, owner, vec![], String::new(), MessageId::new()),
            Err(OrderError::NoItems)
        ));
        assert!(matches!(
            order.place(id, owner, vec![line("A", 0, 100)], String::new(), MessageId::new()),
            Err(OrderError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn place_twice_is_rejected() {
        let order = placed_order();
        let result = order.place(
            AggregateId::new(),
            OwnerId::new(),
            vec![line("A", 1, 1)],
            String::new(),
            MessageId::new(),
        );
        assert!(matches!(result, Err(OrderError::AlreadyCreated)));
    }

    #[test]
    fn request_payment_once() {
        let mut order = placed_order();
        assert_eq!(order.request_payment().unwrap().len(), 1);
        step(&mut order, Order::request_payment);
        assert_eq!(order.status(), OrderStatus::PendingPayment);
        assert!(order.request_payment().unwrap().is_empty());
    }

    #[test]
    fn success_from_created_or_pending() {
        let payment_id = AggregateId::new();

        let mut order = placed_order();
        step(&mut order, |o| o.mark_paid(payment_id));
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.payment_id(), Some(payment_id));

        let mut order = placed_order();
        step(&mut order, |o| o.request_payment());
        step(&mut order, |o| o.mark_paid(payment_id));
        assert_eq!(order.status(), OrderStatus::Paid);
    }

    #[test]
    fn outcome_after_resolution_is_discarded() {
        let mut order = placed_order();
        step(&mut order, |o| o.mark_payment_failed(None, "declined", false));
        assert_eq!(order.status(), OrderStatus::PaymentFailed);
        assert_eq!(order.failure_reason(), Some("declined"));

        assert!(order.mark_paid(AggregateId::new()).unwrap().is_empty());
        assert!(
            order
                .mark_payment_failed(None, "again", false)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn request_payment_after_outcome_is_noop() {
        let mut order = placed_order();
        step(&mut order, |o| o.mark_paid(AggregateId::new()));
        assert!(order.request_payment().unwrap().is_empty());
    }

    #[test]
    fn cancellation_only_when_paid() {
        let mut order = placed_order();
        assert!(order.cancel_for_payment("refund").unwrap().is_empty());

        step(&mut order, |o| o.mark_paid(AggregateId::new()));
        step(&mut order, |o| o.cancel_for_payment("refund"));
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn complete_requires_paid() {
        let mut order = placed_order();
        assert!(matches!(
            order.complete(),
            Err(OrderError::InvalidStateTransition { .. })
        ));

        step(&mut order, |o| o.mark_paid(AggregateId::new()));
        step(&mut order, |o| o.complete());
        assert_eq!(order.status(), OrderStatus::Completed);
        assert!(order.is_terminal());
    }
}
