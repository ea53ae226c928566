//! Payment side of the saga: charges orders and reports outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, MessageId, OwnerId};
use domain::{
    Aggregate, CommandHandler, DomainError, Payment, PaymentError, PaymentEvent, PaymentStatus,
    payment_id_for,
};
use event_store::{ApplyStatus, EventStore, Receipt};
use messaging::{
    Delivery, EventChannel, EventChannelExt, Handled, HandlerError, MessageEnvelope,
    MessageHandler, OrderCreated, OutcomeStatus, PaymentOutcome,
};
use projections::{PaymentSummary, ReadSide};

use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::services::{ChargeOutcome, GatewayError, PaymentGateway, TimeoutGateway};

/// Ledger consumer name and consumer group of the payment component.
pub const PAYMENT_CONSUMER: &str = "payment-service";

pub struct PaymentSaga<S: EventStore, C: EventChannel, G: PaymentGateway> {
    payments: CommandHandler<S, Payment>,
    channel: Arc<C>,
    gateway: TimeoutGateway<G>,
    read_side: Arc<ReadSide<S>>,
    config: SagaConfig,
}

impl<S, C, G> PaymentSaga<S, C, G>
where
    S: EventStore,
    C: EventChannel,
    G: PaymentGateway,
{
    pub fn new(
        store: S,
        channel: Arc<C>,
        gateway: G,
        read_side: Arc<ReadSide<S>>,
        config: SagaConfig,
    ) -> Self {
        Self {
            payments: CommandHandler::new(store),
            channel,
            gateway: TimeoutGateway::new(gateway, config.gateway_timeout),
            read_side,
            config,
        }
    }

    /// Opens the order's payment and makes one charge attempt.
    ///
    /// Redeliveries re-drive a payment still in PROCESSING, up to
    /// `max_charge_attempts` calls in total. Any other existing payment is
    /// left alone and the gateway is not called.
    #[tracing::instrument(skip(self, message), fields(order_id = %message.order_id))]
    pub async fn on_order_created(
        &self,
        message_id: MessageId,
        message: &OrderCreated,
    ) -> Result<Handled> {
        if self
            .payments
            .store()
            .is_applied(PAYMENT_CONSUMER, message_id)
            .await
            .map_err(DomainError::from)?
        {
            tracing::debug!(%message_id, "duplicate OrderCreated");
            metrics::counter!("message_duplicates_total", "consumer" => PAYMENT_CONSUMER)
                .increment(1);
            return Ok(Handled::Duplicate);
        }

        let order_id = message.order_id;
        let payment_id = payment_id_for(order_id);
        let payment = self.open(payment_id, message).await?;

        if payment.status() != PaymentStatus::Processing {
            tracing::debug!(%payment_id, status = %payment.status(), "payment already past processing, not charging");
            return self.acknowledge(message_id).await;
        }

        match self
            .payments
            .execute(payment_id, |p: &Payment| {
                p.begin_charge(self.config.max_charge_attempts)
            })
            .await
        {
            Ok(_) => {}
            Err(DomainError::Payment(PaymentError::ChargeAttemptsExhausted { attempts })) => {
                tracing::warn!(%payment_id, attempts, "charge attempts exhausted, leaving payment to reconciliation");
                return self.acknowledge(message_id).await;
            }
            Err(e) => return Err(e.into()),
        }

        let receipt = Receipt::new(PAYMENT_CONSUMER, message_id);
        match self.gateway.charge(message.total_amount, order_id).await {
            ChargeOutcome::Approved { transaction_id } => {
                self.settle(payment_id, receipt, true, |p, outcome_id| {
                    p.approve(&transaction_id, outcome_id)
                })
                .await
            }
            ChargeOutcome::Declined { reason } => {
                self.settle(payment_id, receipt, false, |p, outcome_id| {
                    p.decline(&reason, outcome_id)
                })
                .await
            }
            ChargeOutcome::TransientError { reason } => {
                tracing::warn!(%payment_id, %reason, "charge failed transiently, payment stays PROCESSING");
                Err(GatewayError::Unavailable(reason).into())
            }
        }
    }

    /// Cancels a payment and voids it at the gateway.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_payment(&self, payment_id: AggregateId, reason: &str) -> Result<Payment> {
        let payment = self.require(payment_id).await?;
        if !payment.status().can_cancel() {
            return Err(illegal(&payment, "cancel"));
        }

        self.gateway.cancel(payment_id).await?;
        let outcome_id = MessageId::new();
        let result = self
            .payments
            .execute(payment_id, |p: &Payment| p.cancel(reason, outcome_id))
            .await?;

        tracing::info!(%payment_id, reason, "payment cancelled");
        self.publish_stored(&result.aggregate).await;
        Ok(result.aggregate)
    }

    /// CANCELLED → REFUND_PENDING.
    #[tracing::instrument(skip(self))]
    pub async fn initiate_refund(&self, payment_id: AggregateId, reason: &str) -> Result<Payment> {
        let payment = self.require(payment_id).await?;
        if !payment.status().can_refund() {
            return Err(illegal(&payment, "refund"));
        }

        let outcome_id = MessageId::new();
        let result = self
            .payments
            .execute(payment_id, |p: &Payment| p.request_refund(reason, outcome_id))
            .await?;

        tracing::info!(%payment_id, reason, "refund requested");
        self.publish_stored(&result.aggregate).await;
        Ok(result.aggregate)
    }

    /// REFUND_PENDING → REFUNDED once the gateway accepts the refund.
    ///
    /// A gateway error leaves the payment in REFUND_PENDING.
    #[tracing::instrument(skip(self))]
    pub async fn process_refund(&self, payment_id: AggregateId) -> Result<Payment> {
        let payment = self.require(payment_id).await?;
        if !payment.status().can_process_refund() {
            return Err(illegal(&payment, "process refund"));
        }

        self.gateway.refund(payment_id).await?;
        let outcome_id = MessageId::new();
        let result = self
            .payments
            .execute(payment_id, |p: &Payment| p.complete_refund(outcome_id))
            .await?;

        tracing::info!(%payment_id, "payment refunded");
        self.publish_stored(&result.aggregate).await;
        Ok(result.aggregate)
    }

    /// Forces a stuck payment to FAILED without publishing an outcome.
    /// Returns whether it moved.
    #[tracing::instrument(skip(self))]
    pub async fn abandon(&self, payment_id: AggregateId, reason: &str) -> Result<bool> {
        self.require(payment_id).await?;
        let result = self
            .payments
            .execute(payment_id, |p: &Payment| p.abandon(reason))
            .await?;
        if result.is_noop() {
            return Ok(false);
        }
        tracing::warn!(%payment_id, reason, "payment abandoned");
        Ok(true)
    }

    /// Publishes the payment's last outcome again under its original
    /// message id. Returns `false` when there is nothing to replay.
    #[tracing::instrument(skip(self))]
    pub async fn replay_outcome(&self, payment_id: AggregateId) -> Result<bool> {
        let payment = self.require(payment_id).await?;
        let Some((message_id, outcome)) = stored_outcome(&payment) else {
            return Ok(false);
        };
        let envelope = MessageEnvelope::with_id(message_id, &outcome)?.with_header("replay", "true");
        self.channel.publish_contract(&outcome, envelope).await?;
        tracing::info!(%payment_id, status = %outcome.status, "payment outcome replayed");
        Ok(true)
    }

    pub async fn get_payment(&self, payment_id: AggregateId) -> Result<Option<Payment>> {
        Ok(self.payments.load_existing(payment_id).await?)
    }

    pub async fn payment_for_order(&self, order_id: AggregateId) -> Result<Option<Payment>> {
        self.get_payment(payment_id_for(order_id)).await
    }

    pub async fn list_by_owner(&self, owner_id: OwnerId) -> Result<Vec<PaymentSummary>> {
        self.read_side.refresh().await?;
        Ok(self.read_side.payments().by_owner(owner_id).await)
    }

    pub async fn list_by_status(&self, status: PaymentStatus) -> Result<Vec<PaymentSummary>> {
        self.read_side.refresh().await?;
        Ok(self.read_side.payments().by_status(status).await)
    }

    pub fn gateway(&self) -> &G {
        self.gateway.inner()
    }

    async fn require(&self, payment_id: AggregateId) -> Result<Payment> {
        self.payments
            .load_existing(payment_id)
            .await?
            .ok_or(SagaError::PaymentNotFound(payment_id))
    }

    /// Loads the payment, creating it first when the order has none.
    async fn open(&self, payment_id: AggregateId, message: &OrderCreated) -> Result<Payment> {
        if let Some(existing) = self.payments.load_existing(payment_id).await? {
            return Ok(existing);
        }

        let opened = self
            .payments
            .execute(payment_id, |p: &Payment| {
                p.open(
                    payment_id,
                    message.order_id,
                    message.owner_id,
                    message.total_amount,
                )
            })
            .await;

        match opened {
            Ok(result) => {
                tracing::info!(%payment_id, amount = %message.total_amount, "payment opened");
                Ok(result.aggregate)
            }
            // Lost a creation race; the winner's payment is the one.
            Err(DomainError::Payment(PaymentError::AlreadyCreated)) => self.require(payment_id).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Records the charge result with the message receipt, then publishes it.
    ///
    /// An approval that can no longer be recorded because the payment was
    /// abandoned or cancelled meanwhile is voided at the gateway.
    async fn settle<F>(
        &self,
        payment_id: AggregateId,
        receipt: Receipt,
        approved: bool,
        command: F,
    ) -> Result<Handled>
    where
        F: Fn(&Payment, MessageId) -> std::result::Result<Vec<PaymentEvent>, PaymentError>,
    {
        let message_id = receipt.message_id;
        let outcome_id = MessageId::new();
        let settled = self
            .payments
            .execute_once(payment_id, receipt, |p: &Payment| command(p, outcome_id))
            .await;

        match settled {
            Ok(Some(result)) => {
                tracing::info!(%payment_id, status = %result.aggregate.status(), "payment settled");
                self.publish_stored(&result.aggregate).await;
                Ok(Handled::Applied)
            }
            Ok(None) => {
                tracing::debug!(%payment_id, %message_id, "charge result for an already handled message");
                Ok(Handled::Duplicate)
            }
            Err(DomainError::Payment(PaymentError::InvalidStateTransition {
                current_state,
                ..
            })) => {
                tracing::warn!(%payment_id, %current_state, "late charge result discarded");
                if approved && current_state != PaymentStatus::Success {
                    self.void(payment_id).await;
                }
                self.acknowledge(message_id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn void(&self, payment_id: AggregateId) {
        match self.gateway.cancel(payment_id).await {
            Ok(()) => tracing::warn!(%payment_id, "late approval voided"),
            Err(e) => tracing::error!(%payment_id, error = %e, "could not void late approval"),
        }
        metrics::counter!("gateway_voids_total").increment(1);
    }

    /// Records the receipt of a message that changes nothing.
    async fn acknowledge(&self, message_id: MessageId) -> Result<Handled> {
        let status = self
            .payments
            .store()
            .try_apply(PAYMENT_CONSUMER, message_id)
            .await
            .map_err(DomainError::from)?;
        Ok(match status {
            ApplyStatus::FirstTime => Handled::Ignored,
            ApplyStatus::AlreadyApplied => Handled::Duplicate,
        })
    }

    /// Publishes the payment's stored outcome. Failures are left for replay.
    async fn publish_stored(&self, payment: &Payment) {
        let Some((message_id, outcome)) = stored_outcome(payment) else {
            return;
        };
        let published = match MessageEnvelope::with_id(message_id, &outcome) {
            Ok(envelope) => self.channel.publish_contract(&outcome, envelope).await,
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            tracing::warn!(order_id = %outcome.order_id, status = %outcome.status, error = %e, "PaymentOutcome publish failed, left for replay");
            metrics::counter!("outcome_publish_failures_total").increment(1);
        }
    }
}

/// The outcome message a payment's current state stands for, if any.
pub fn stored_outcome(payment: &Payment) -> Option<(MessageId, PaymentOutcome)> {
    let message_id = payment.outcome_message_id()?;
    let (status, reason) = match payment.status() {
        PaymentStatus::Success => (OutcomeStatus::Success, None),
        PaymentStatus::Failed => (OutcomeStatus::Failed, payment.failure_reason()),
        PaymentStatus::Cancelled => (OutcomeStatus::Cancelled, payment.cancellation_reason()),
        PaymentStatus::RefundPending => (OutcomeStatus::RefundPending, payment.refund_reason()),
        PaymentStatus::Refunded => (OutcomeStatus::Refunded, None),
        PaymentStatus::Pending | PaymentStatus::Processing => return None,
    };
    Some((
        message_id,
        PaymentOutcome {
            order_id: payment.order_id()?,
            payment_id: payment.id(),
            amount: payment.amount(),
            status,
            reason: reason.map(str::to_string),
        },
    ))
}

fn illegal(payment: &Payment, action: &str) -> SagaError {
    SagaError::IllegalTransition(format!(
        "cannot {action} payment in {} state",
        payment.status()
    ))
}

#[async_trait]
impl<S, C, G> MessageHandler for PaymentSaga<S, C, G>
where
    S: EventStore + 'static,
    C: EventChannel + 'static,
    G: PaymentGateway + 'static,
{
    fn name(&self) -> &str {
        PAYMENT_CONSUMER
    }

    async fn handle(&self, delivery: &Delivery) -> std::result::Result<Handled, HandlerError> {
        let message: OrderCreated = delivery
            .decode()
            .map_err(|e| HandlerError::Permanent(e.to_string()))?;

        self.on_order_created(delivery.message_id(), &message)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    HandlerError::Transient(e.to_string())
                } else {
                    HandlerError::Permanent(e.to_string())
                }
            })
    }
}
