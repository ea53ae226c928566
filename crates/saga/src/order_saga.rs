//! Order side of the saga: creates orders and folds payment outcomes back.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, MessageId, OwnerId};
use domain::{
    Aggregate, CommandHandler, LineRequest, Order, OrderStatus, ProductCatalog, payment_id_for,
    price_lines, validate_line_requests,
};
use event_store::{EventStore, Receipt};
use messaging::{
    Delivery, EventChannel, EventChannelExt, Handled, HandlerError, MessageEnvelope,
    MessageHandler, OrderCreated, OutcomeStatus, PaymentOutcome,
};
use projections::{OrderSummary, ReadSide};

use crate::error::{Result, SagaError};

/// Ledger consumer name and consumer group of the order component.
pub const ORDER_CONSUMER: &str = "order-service";

pub struct OrderSaga<S: EventStore, C: EventChannel> {
    orders: CommandHandler<S, Order>,
    channel: Arc<C>,
    catalog: Arc<dyn ProductCatalog>,
    read_side: Arc<ReadSide<S>>,
}

impl<S, C> OrderSaga<S, C>
where
    S: EventStore,
    C: EventChannel,
{
    pub fn new(
        store: S,
        channel: Arc<C>,
        catalog: Arc<dyn ProductCatalog>,
        read_side: Arc<ReadSide<S>>,
    ) -> Self {
        Self {
            orders: CommandHandler::new(store),
            channel,
            catalog,
            read_side,
        }
    }

    /// Persists a new order in CREATED, then announces it.
    ///
    /// A failed publish leaves the order in CREATED for reconciliation and
    /// does not fail the call.
    #[tracing::instrument(skip(self, items, shipping_address), fields(items = items.len()))]
    pub async fn create_order(
        &self,
        owner_id: OwnerId,
        items: Vec<LineRequest>,
        shipping_address: String,
    ) -> Result<Order> {
        validate_line_requests(&items)?;
        let lines = price_lines(self.catalog.as_ref(), &items).await?;

        let order_id = AggregateId::new();
        let message_id = MessageId::new();
        let placed = self
            .orders
            .execute(order_id, |order: &Order| {
                order.place(
                    order_id,
                    owner_id,
                    lines.clone(),
                    shipping_address.clone(),
                    message_id,
                )
            })
            .await?;
        let order = placed.aggregate;

        tracing::info!(%order_id, %owner_id, total = %order.total_amount(), "order created");
        metrics::counter!("orders_created_total").increment(1);

        match self.announce(&order).await {
            Ok(()) => self.request_payment(order).await,
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "OrderCreated publish failed, left for reconciliation");
                metrics::counter!("order_publish_failures_total").increment(1);
                Ok(order)
            }
        }
    }

    /// Folds one payment outcome into the order, at most once per message.
    #[tracing::instrument(skip(self, outcome), fields(order_id = %outcome.order_id, status = %outcome.status))]
    pub async fn apply_payment_outcome(
        &self,
        message_id: MessageId,
        outcome: &PaymentOutcome,
    ) -> Result<Handled> {
        let order_id = outcome.order_id;
        if self.orders.load_existing(order_id).await?.is_none() {
            return Err(SagaError::OrderNotFound(order_id));
        }

        let payment_id = outcome.payment_id.unwrap_or_else(|| payment_id_for(order_id));
        let reason = outcome.reason.as_deref();
        let receipt = Receipt::new(ORDER_CONSUMER, message_id);

        let result = match outcome.status {
            OutcomeStatus::Success => {
                self.orders
                    .execute_once(order_id, receipt, |o: &Order| o.mark_paid(payment_id))
                    .await?
            }
            OutcomeStatus::Failed => {
                let reason = reason.unwrap_or("payment failed");
                self.orders
                    .execute_once(order_id, receipt, |o: &Order| {
                        o.mark_payment_failed(Some(payment_id), reason, false)
                    })
                    .await?
            }
            OutcomeStatus::Cancelled => {
                let reason = reason.unwrap_or("payment cancelled");
                self.orders
                    .execute_once(order_id, receipt, |o: &Order| o.cancel_for_payment(reason))
                    .await?
            }
            OutcomeStatus::RefundPending | OutcomeStatus::Refunded => {
                tracing::info!(%order_id, %payment_id, "refund progress noted");
                self.orders
                    .execute_once(order_id, receipt, |_: &Order| Ok(vec![]))
                    .await?
            }
        };

        let handled = match result {
            None => {
                tracing::debug!(%order_id, %message_id, "duplicate payment outcome");
                Handled::Duplicate
            }
            Some(result) if result.is_noop() => {
                let informational = matches!(
                    outcome.status,
                    OutcomeStatus::RefundPending | OutcomeStatus::Refunded
                );
                if !informational {
                    tracing::warn!(
                        %order_id,
                        current = %result.aggregate.status(),
                        "payment outcome no longer applies, discarded"
                    );
                }
                Handled::Ignored
            }
            Some(result) => {
                tracing::info!(%order_id, status = %result.aggregate.status(), "order settled by payment outcome");
                Handled::Applied
            }
        };

        metrics::counter!(
            "payment_outcomes_total",
            "status" => outcome.status.as_str(),
            "result" => handled.as_str()
        )
        .increment(1);
        Ok(handled)
    }

    /// PAID → COMPLETED.
    #[tracing::instrument(skip(self))]
    pub async fn complete_order(&self, order_id: AggregateId) -> Result<Order> {
        self.require(order_id).await?;
        let result = self.orders.execute(order_id, Order::complete).await?;
        tracing::info!(%order_id, "order completed");
        Ok(result.aggregate)
    }

    /// Forces an unsettled order to PAYMENT_FAILED. Returns whether it moved.
    #[tracing::instrument(skip(self))]
    pub async fn compensate(&self, order_id: AggregateId, reason: &str) -> Result<bool> {
        let order = self.require(order_id).await?;
        let payment_id = order.payment_id().or(Some(payment_id_for(order_id)));
        let result = self
            .orders
            .execute(order_id, |o: &Order| o.mark_payment_failed(payment_id, reason, true))
            .await?;
        if result.is_noop() {
            return Ok(false);
        }
        tracing::warn!(%order_id, reason, "order compensated to PAYMENT_FAILED");
        Ok(true)
    }

    /// Publishes the order's OrderCreated again under its original message id.
    #[tracing::instrument(skip(self))]
    pub async fn republish(&self, order_id: AggregateId) -> Result<Order> {
        let order = self.require(order_id).await?;
        if !order.status().can_settle() {
            return Err(SagaError::IllegalTransition(format!(
                "cannot republish order in {} state",
                order.status()
            )));
        }
        self.announce(&order).await?;
        tracing::info!(%order_id, "OrderCreated republished");
        self.request_payment(order).await
    }

    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>> {
        Ok(self.orders.load_existing(order_id).await?)
    }

    pub async fn list_by_owner(&self, owner_id: OwnerId) -> Result<Vec<OrderSummary>> {
        self.read_side.refresh().await?;
        Ok(self.read_side.orders().by_owner(owner_id).await)
    }

    pub async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<OrderSummary>> {
        self.read_side.refresh().await?;
        Ok(self.read_side.orders().by_status(status).await)
    }

    async fn require(&self, order_id: AggregateId) -> Result<Order> {
        self.orders
            .load_existing(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }

    async fn announce(&self, order: &Order) -> Result<()> {
        let (Some(order_id), Some(owner_id)) = (order.id(), order.owner_id()) else {
            return Err(SagaError::Validation("order has not been placed".to_string()));
        };
        let message = OrderCreated {
            order_id,
            owner_id,
            total_amount: order.total_amount(),
        };
        let message_id = order.created_message_id().unwrap_or_default();
        let envelope = MessageEnvelope::with_id(message_id, &message)?;
        self.channel.publish_contract(&message, envelope).await?;
        Ok(())
    }

    /// CREATED → PENDING_PAYMENT unless an outcome already moved it on.
    async fn request_payment(&self, order: Order) -> Result<Order> {
        let Some(order_id) = order.id() else {
            return Ok(order);
        };
        match self.orders.execute(order_id, Order::request_payment).await {
            Ok(result) => Ok(result.aggregate),
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "could not record payment request");
                Ok(order)
            }
        }
    }
}

#[async_trait]
impl<S, C> MessageHandler for OrderSaga<S, C>
where
    S: EventStore + 'static,
    C: EventChannel + 'static,
{
    fn name(&self) -> &str {
        ORDER_CONSUMER
    }

    async fn handle(&self, delivery: &Delivery) -> std::result::Result<Handled, HandlerError> {
        let outcome: PaymentOutcome = delivery
            .decode()
            .map_err(|e| HandlerError::Permanent(e.to_string()))?;

        self.apply_payment_outcome(delivery.message_id(), &outcome)
            .await
            .map_err(|e| match e {
                // Ordering per key means the order is only not there yet.
                SagaError::OrderNotFound(_) => HandlerError::Transient(e.to_string()),
                e if e.is_transient() => HandlerError::Transient(e.to_string()),
                e => HandlerError::Permanent(e.to_string()),
            })
    }
}
