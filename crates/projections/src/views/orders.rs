//! Orders read model: one summary per order, queryable by owner and status.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, Money, OwnerId};
use domain::{Aggregate, Order, OrderEvent, OrderStatus};
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order_id: AggregateId,
    pub owner_id: OwnerId,
    pub status: OrderStatus,
    pub line_count: usize,
    pub total_amount: Money,
    pub payment_id: Option<AggregateId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct OrdersState {
    orders: HashMap<AggregateId, OrderSummary>,
    position: ProjectionPosition,
}

/// Every order ever placed, with its latest status.
#[derive(Clone, Default)]
pub struct OrdersView {
    state: Arc<RwLock<OrdersState>>,
}

impl OrdersView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, order_id: AggregateId) -> Option<OrderSummary> {
        self.state.read().await.orders.get(&order_id).cloned()
    }

    /// Orders of one owner, oldest first.
    pub async fn by_owner(&self, owner_id: OwnerId) -> Vec<OrderSummary> {
        self.collect(|o| o.owner_id == owner_id).await
    }

    pub async fn by_status(&self, status: OrderStatus) -> Vec<OrderSummary> {
        self.collect(|o| o.status == status).await
    }

    /// Orders still waiting for a payment outcome that were placed before
    /// `cutoff`.
    pub async fn unsettled_before(&self, cutoff: DateTime<Utc>) -> Vec<OrderSummary> {
        self.collect(|o| o.status.can_settle() && o.created_at < cutoff)
            .await
    }

    pub async fn all(&self) -> Vec<OrderSummary> {
        self.collect(|_| true).await
    }

    async fn collect(&self, filter: impl Fn(&OrderSummary) -> bool) -> Vec<OrderSummary> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state.orders.values().filter(|o| filter(o)).cloned().collect();
        orders.sort_by_key(|o| (o.created_at, o.order_id));
        orders
    }
}

#[async_trait]
impl Projection for OrdersView {
    fn name(&self) -> &'static str {
        "OrdersView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.write().await;
        state.position = state.position.advance();

        if event.aggregate_type != Order::aggregate_type() {
            return Ok(());
        }

        let order_event: OrderEvent = event.decode()?;
        let order_id = event.aggregate_id;
        let at = order_event.occurred_at();

        if let OrderEvent::OrderPlaced(data) = order_event {
            state.orders.insert(
                order_id,
                OrderSummary {
                    order_id,
                    owner_id: data.owner_id,
                    status: OrderStatus::Created,
                    line_count: data.lines.len(),
                    total_amount: data.total_amount,
                    payment_id: None,
                    failure_reason: None,
                    created_at: data.placed_at,
                    updated_at: data.placed_at,
                },
            );
            return Ok(());
        }

        let Some(order) = state.orders.get_mut(&order_id) else {
            tracing::warn!(%order_id, event_type = %event.event_type, "event for unknown order");
            return Ok(());
        };
        order.updated_at = at;
        match order_event {
            OrderEvent::OrderPlaced(_) => {}
            OrderEvent::PaymentRequested(_) => order.status = OrderStatus::PendingPayment,
            OrderEvent::OrderPaid(data) => {
                order.status = OrderStatus::Paid;
                order.payment_id = Some(data.payment_id);
            }
            OrderEvent::OrderPaymentFailed(data) => {
                order.status = OrderStatus::PaymentFailed;
                order.payment_id = data.payment_id.or(order.payment_id);
                order.failure_reason = Some(data.reason);
            }
            OrderEvent::OrderCompleted(_) => order.status = OrderStatus::Completed,
            OrderEvent::OrderCancelled(data) => {
                order.status = OrderStatus::Cancelled;
                order.failure_reason = Some(data.reason);
            }
        }

        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = OrdersState::default();
        Ok(())
    }
}

impl ReadModel for OrdersView {
    fn name(&self) -> &'static str {
        "OrdersView"
    }

    fn count(&self) -> usize {
        // Use try_read to avoid blocking; returns 0 if lock is held
        self.state.try_read().map(|s| s.orders.len()).unwrap_or(0)
    }
}
