use chrono::{DateTime, Utc};
use common::{AggregateId, MessageId, Money, OwnerId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::PaymentStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentOpened(PaymentOpenedData),
    ProcessingStarted(ProcessingStartedData),
    ChargeAttempted(ChargeAttemptedData),
    PaymentApproved(PaymentApprovedData),
    PaymentDeclined(PaymentDeclinedData),
    /// Forced to FAILED by reconciliation; no outcome is published.
    PaymentAbandoned(PaymentAbandonedData),
    PaymentCancelled(PaymentCancelledData),
    RefundRequested(RefundRequestedData),
    PaymentRefunded(PaymentRefundedData),
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentOpened(_) => "PaymentOpened",
            PaymentEvent::ProcessingStarted(_) => "ProcessingStarted",
            PaymentEvent::ChargeAttempted(_) => "ChargeAttempted",
            PaymentEvent::PaymentApproved(_) => "PaymentApproved",
            PaymentEvent::PaymentDeclined(_) => "PaymentDeclined",
            PaymentEvent::PaymentAbandoned(_) => "PaymentAbandoned",
            PaymentEvent::PaymentCancelled(_) => "PaymentCancelled",
            PaymentEvent::RefundRequested(_) => "RefundRequested",
            PaymentEvent::PaymentRefunded(_) => "PaymentRefunded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOpenedData {
    pub payment_id: AggregateId,
    pub order_id: AggregateId,
    pub owner_id: OwnerId,
    pub amount: Money,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStartedData {
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeAttemptedData {
    pub attempt: u32,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentApprovedData {
    pub transaction_id: String,
    pub outcome_message_id: MessageId,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDeclinedData {
    pub reason: String,
    pub outcome_message_id: MessageId,
    pub declined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAbandonedData {
    pub reason: String,
    pub abandoned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCancelledData {
    pub reason: String,
    pub outcome_message_id: MessageId,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequestedData {
    pub reason: String,
    pub outcome_message_id: MessageId,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefundedData {
    pub outcome_message_id: MessageId,
    pub refunded_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn opened(
        payment_id: AggregateId,
        order_id: AggregateId,
        owner_id: OwnerId,
        amount: Money,
    ) -> Self {
        PaymentEvent::PaymentOpened(PaymentOpenedData {
            payment_id,
            order_id,
            owner_id,
            amount,
            opened_at: Utc::now(),
        })
    }

    pub fn processing_started() -> Self {
        PaymentEvent::ProcessingStarted(ProcessingStartedData {
            started_at: Utc::now(),
        })
    }

    pub fn charge_attempted(attempt: u32) -> Self {
        PaymentEvent::ChargeAttempted(ChargeAttemptedData {
            attempt,
            attempted_at: Utc::now(),
        })
    }

    pub fn approved(transaction_id: impl Into<String>, outcome_message_id: MessageId) -> Self {
        PaymentEvent::PaymentApproved(PaymentApprovedData {
            transaction_id: transaction_id.into(),
            outcome_message_id,
            approved_at: Utc::now(),
        })
    }

    pub fn declined(reason: impl Into<String>, outcome_message_id: MessageId) -> Self {
        PaymentEvent::PaymentDeclined(PaymentDeclinedData {
            reason: reason.into(),
            outcome_message_id,
            declined_at: Utc::now(),
        })
    }

    pub fn abandoned(reason: impl Into<String>) -> Self {
        PaymentEvent::PaymentAbandoned(PaymentAbandonedData {
            reason: reason.into(),
            abandoned_at: Utc::now(),
        })
    }

    pub fn cancelled(reason: impl Into<String>, outcome_message_id: MessageId) -> Self {
        PaymentEvent::PaymentCancelled(PaymentCancelledData {
            reason: reason.into(),
            outcome_message_id,
            cancelled_at: Utc::now(),
        })
    }

    pub fn refund_requested(reason: impl Into<String>, outcome_message_id: MessageId) -> Self {
        PaymentEvent::RefundRequested(RefundRequestedData {
            reason: reason.into(),
            outcome_message_id,
            requested_at: Utc::now(),
        })
    }

    pub fn refunded(outcome_message_id: MessageId) -> Self {
        PaymentEvent::PaymentRefunded(PaymentRefundedData {
            outcome_message_id,
            refunded_at: Utc::now(),
        })
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PaymentEvent::PaymentOpened(d) => d.opened_at,
            PaymentEvent::ProcessingStarted(d) => d.started_at,
            PaymentEvent::ChargeAttempted(d) => d.attempted_at,
            PaymentEvent::PaymentApproved(d) => d.approved_at,
            PaymentEvent::PaymentDeclined(d) => d.declined_at,
            PaymentEvent::PaymentAbandoned(d) => d.abandoned_at,
            PaymentEvent::PaymentCancelled(d) => d.cancelled_at,
            PaymentEvent::RefundRequested(d) => d.requested_at,
            PaymentEvent::PaymentRefunded(d) => d.refunded_at,
        }
    }

    /// Status the payment is in after this event, if the event changes it.
    pub fn resulting_status(&self) -> Option<PaymentStatus> {
        match self {
            PaymentEvent::PaymentOpened(_) => Some(PaymentStatus::Pending),
            PaymentEvent::ProcessingStarted(_) => Some(PaymentStatus::Processing),
            PaymentEvent::ChargeAttempted(_) => None,
            PaymentEvent::PaymentApproved(_) => Some(PaymentStatus::Success),
            PaymentEvent::PaymentDeclined(_) | PaymentEvent::PaymentAbandoned(_) => {
                Some(PaymentStatus::Failed)
            }
            PaymentEvent::PaymentCancelled(_) => Some(PaymentStatus::Cancelled),
            PaymentEvent::RefundRequested(_) => Some(PaymentStatus::RefundPending),
            PaymentEvent::PaymentRefunded(_) => Some(PaymentStatus::Refunded),
        }
    }

    /// Human-readable description for payment history.
    pub fn describe(&self) -> String {
        match self {
            PaymentEvent::PaymentOpened(d) => format!("Payment of {} opened", d.amount),
            PaymentEvent::ProcessingStarted(_) => "Processing started".to_string(),
            PaymentEvent::ChargeAttempted(d) => format!("Charge attempt {}", d.attempt),
            PaymentEvent::PaymentApproved(d) => {
                format!("Approved, transaction {}", d.transaction_id)
            }
            PaymentEvent::PaymentDeclined(d) => format!("Declined: {}", d.reason),
            PaymentEvent::PaymentAbandoned(d) => format!("Abandoned: {}", d.reason),
            PaymentEvent::PaymentCancelled(d) => format!("Cancelled: {}", d.reason),
            PaymentEvent::RefundRequested(d) => format!("Refund requested: {}", d.reason),
            PaymentEvent::PaymentRefunded(_) => "Refunded".to_string(),
        }
    }
}
