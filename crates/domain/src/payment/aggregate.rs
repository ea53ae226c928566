//! Payment aggregate.

use chrono::{DateTime, Utc};
use common::{AggregateId, MessageId, Money, OwnerId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{PaymentError, PaymentEvent, PaymentStatus, events::PaymentOpenedData};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payment {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    order_id: Option<AggregateId>,

    owner_id: Option<OwnerId>,

    amount: Money,

    status: PaymentStatus,

    external_transaction_id: Option<String>,

    failure_reason: Option<String>,

    charge_attempts: u32,

    /// Message id of the last outcome recorded for this payment.
    outcome_message_id: Option<MessageId>,

    created_at: Option<DateTime<Utc>>,

    processing_started_at: Option<DateTime<Utc>>,

    cancelled_at: Option<DateTime<Utc>>,

    cancellation_reason: Option<String>,

    refund_requested_at: Option<DateTime<Utc>>,

    refund_reason: Option<String>,

    refunded_at: Option<DateTime<Utc>>,

    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Payment {
    type Event = PaymentEvent;
    type Error = PaymentError;

    fn aggregate_type() -> &'static str {
        "Payment"
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
            PaymentEvent::PaymentOpened(data) => self.apply_opened(data),
            PaymentEvent::ProcessingStarted(data) => {
                self.status = PaymentStatus::Processing;
                self.processing_started_at = Some(data.started_at);
            }
            PaymentEvent::ChargeAttempted(data) => {
                self.charge_attempts = data.attempt;
            }
            PaymentEvent::PaymentApproved(data) => {
                self.status = PaymentStatus::Success;
                self.external_transaction_id = Some(data.transaction_id);
                self.outcome_message_id = Some(data.outcome_message_id);
            }
            PaymentEvent::PaymentDeclined(data) => {
                self.status = PaymentStatus::Failed;
                self.failure_reason = Some(data.reason);
                self.outcome_message_id = Some(data.outcome_message_id);
            }
            PaymentEvent::PaymentAbandoned(data) => {
                self.status = PaymentStatus::Failed;
                self.failure_reason = Some(data.reason);
            }
            PaymentEvent::PaymentCancelled(data) => {
                self.status = PaymentStatus::Cancelled;
                self.cancelled_at = Some(data.cancelled_at);
                self.cancellation_reason = Some(data.reason);
                self.outcome_message_id = Some(data.outcome_message_id);
            }
            PaymentEvent::RefundRequested(data) => {
                self.status = PaymentStatus::RefundPending;
                self.refund_requested_at = Some(data.requested_at);
                self.refund_reason = Some(data.reason);
                self.outcome_message_id = Some(data.outcome_message_id);
            }
            PaymentEvent::PaymentRefunded(data) => {
                self.status = PaymentStatus::Refunded;
                self.refunded_at = Some(data.refunded_at);
                self.outcome_message_id = Some(data.outcome_message_id);
            }
        }
    }
}

// Queries
impl Payment {
    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn owner_id(&self) -> Option<OwnerId> {
        self.owner_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn external_transaction_id(&self) -> Option<&str> {
        self.external_transaction_id.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn charge_attempts(&self) -> u32 {
        self.charge_attempts
    }

    /// `None` for payments that never produced an outcome, including
    /// abandoned ones.
    pub fn outcome_message_id(&self) -> Option<MessageId> {
        self.outcome_message_id
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn processing_started_at(&self) -> Option<DateTime<Utc>> {
        self.processing_started_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn refund_requested_at(&self) -> Option<DateTime<Utc>> {
        self.refund_requested_at
    }

    pub fn refund_reason(&self) -> Option<&str> {
        self.refund_reason.as_deref()
    }

    pub fn refunded_at(&self) -> Option<DateTime<Utc>> {
        self.refunded_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

// Commands
impl Payment {
    /// Opens the payment and moves it straight to PROCESSING.
    pub fn open(
        &self,
        payment_id: AggregateId,
        order_id: AggregateId,
        owner_id: OwnerId,
        amount: Money,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.id.is_some() {
            return Err(PaymentError::AlreadyCreated);
        }
        Ok(vec![
            PaymentEvent::opened(payment_id, order_id, owner_id, amount),
            PaymentEvent::processing_started(),
        ])
    }

    /// Records one more gateway call, bounded by `max_attempts`.
    pub fn begin_charge(&self, max_attempts: u32) -> Result<Vec<PaymentEvent>, PaymentError> {
        if !self.status.can_settle() {
            return Err(self.illegal("charge"));
        }
        if self.charge_attempts >= max_attempts {
            return Err(PaymentError::ChargeAttemptsExhausted {
                attempts: self.charge_attempts,
            });
        }
        Ok(vec![PaymentEvent::charge_attempted(
            self.charge_attempts + 1,
        )])
    }

    pub fn approve(
        &self,
        transaction_id: &str,
        outcome_message_id: MessageId,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if !self.status.can_settle() {
            return Err(self.illegal("approve"));
        }
        Ok(vec![PaymentEvent::approved(
            transaction_id,
            outcome_message_id,
        )])
    }

    pub fn decline(
        &self,
        reason: &str,
        outcome_message_id: MessageId,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if !self.status.can_settle() {
            return Err(self.illegal("decline"));
        }
        Ok(vec![PaymentEvent::declined(reason, outcome_message_id)])
    }

    /// Forces a stuck payment to FAILED. No-op once it has moved on.
    pub fn abandon(&self, reason: &str) -> Result<Vec<PaymentEvent>, PaymentError> {
        if !self.status.can_abandon() {
            return Ok(vec![]);
        }
        Ok(vec![PaymentEvent::abandoned(reason)])
    }

    pub fn cancel(
        &self,
        reason: &str,
        outcome_message_id: MessageId,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if !self.status.can_cancel() {
            return Err(self.illegal("cancel"));
        }
        Ok(vec![PaymentEvent::cancelled(reason, outcome_message_id)])
    }

    pub fn request_refund(
        &self,
        reason: &str,
        outcome_message_id: MessageId,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if !self.status.can_refund() {
            return Err(self.illegal("refund"));
        }
        Ok(vec![PaymentEvent::refund_requested(
            reason,
            outcome_message_id,
        )])
    }

    pub fn complete_refund(
        &self,
        outcome_message_id: MessageId,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if !self.status.can_process_refund() {
            return Err(self.illegal("process refund"));
        }
        Ok(vec![PaymentEvent::refunded(outcome_message_id)])
    }
}

impl Payment {
    fn apply_opened(&mut self, data: PaymentOpenedData) {
        self.id = Some(data.payment_id);
        self.order_id = Some(data.order_id);
        self.owner_id = Some(data.owner_id);
        self.amount = data.amount;
        self.created_at = Some(data.opened_at);
        self.status = PaymentStatus::Pending;
    }

    fn illegal(&self, action: &'static str) -> PaymentError {
        PaymentError::InvalidStateTransition {
            current_state: self.status,
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened_payment() -> Payment {
        let order_id = AggregateId::new();
        let mut payment = Payment::default();
        let events = payment
            .open(
                order_id.derive("payment"),
                order_id,
                OwnerId::new(),
                Money::from_cents(2000),
            )
            .unwrap();
        payment.apply_events(events);
        payment
    }

    fn step(
        payment: &mut Payment,
        command: impl Fn(&Payment) -> Result<Vec<PaymentEvent>, PaymentError>,
    ) {
        let events = command(payment).unwrap();
        payment.apply_events(events);
    }

    #[test]
    fn open_moves_to_processing() {
        let payment = opened_payment();
        assert_eq!(payment.status(), PaymentStatus::Processing);
        assert_eq!(payment.amount(), Money::from_cents(2000));
        assert!(payment.processing_started_at().is_some());
        assert_eq!(payment.charge_attempts(), 0);
    }

    #[test]
    fn open_twice_is_rejected() {
        let payment = opened_payment();
        let result = payment.open(
            AggregateId::new(),
            AggregateId::new(),
            OwnerId::new(),
            Money::zero(),
        );
        assert!(matches!(result, Err(PaymentError::AlreadyCreated)));
    }

    #[test]
    fn charge_attempts_are_bounded() {
        let mut payment = opened_payment();
        step(&mut payment, |p| p.begin_charge(2));
        step(&mut payment, |p| p.begin_charge(2));
        assert_eq!(payment.charge_attempts(), 2);
        assert!(matches!(
            payment.begin_charge(2),
            Err(PaymentError::ChargeAttemptsExhausted { attempts: 2 })
        ));
    }

    #[test]
    fn approval_settles_once() {
        let mut payment = opened_payment();
        let message_id = MessageId::new();
        step(&mut payment, |p| p.approve("txn-1", message_id));

        assert_eq!(payment.status(), PaymentStatus::Success);
        assert_eq!(payment.external_transaction_id(), Some("txn-1"));
        assert_eq!(payment.outcome_message_id(), Some(message_id));
        assert!(payment.decline("late", MessageId::new()).is_err());
        assert!(payment.begin_charge(3).is_err());
    }

    #[test]
    fn decline_records_reason() {
        let mut payment = opened_payment();
        step(&mut payment, |p| p.decline("insufficient funds", MessageId::new()));
        assert_eq!(payment.status(), PaymentStatus::Failed);
        assert_eq!(payment.failure_reason(), Some("insufficient funds"));
    }

    #[test]
    fn abandon_only_while_unsettled() {
        let mut payment = opened_payment();
        step(&mut payment, |p| p.abandon("timed out"));
        assert_eq!(payment.status(), PaymentStatus::Failed);
        assert!(payment.outcome_message_id().is_none());
        assert!(payment.abandon("again").unwrap().is_empty());
        assert!(payment.approve("txn-late", MessageId::new()).is_err());
    }

    #[test]
    fn cancel_refund_path() {
        let mut payment = opened_payment();
        assert!(payment.request_refund("early", MessageId::new()).is_err());

        step(&mut payment, |p| p.approve("txn-1", MessageId::new()));
        step(&mut payment, |p| p.cancel("customer request", MessageId::new()));
        assert_eq!(payment.status(), PaymentStatus::Cancelled);
        assert_eq!(payment.cancellation_reason(), Some("customer request"));
        assert!(payment.cancelled_at().is_some());

        assert!(payment.complete_refund(MessageId::new()).is_err());
        step(&mut payment, |p| p.request_refund("returned", MessageId::new()));
        assert_eq!(payment.status(), PaymentStatus::RefundPending);
        assert_eq!(payment.refund_reason(), Some("returned"));

        step(&mut payment, |p| p.complete_refund(MessageId::new()));
        assert_eq!(payment.status(), PaymentStatus::Refunded);
        assert!(payment.refunded_at().is_some());
    }

    #[test]
    fn failed_payment_cannot_be_cancelled() {
        let mut payment = opened_payment();
        step(&mut payment, |p| p.decline("declined", MessageId::new()));
        assert!(matches!(
            payment.cancel("too late", MessageId::new()),
            Err(PaymentError::InvalidStateTransition {
                current_state: PaymentStatus::Failed,
                ..
            })
        ));
    }
}
