use serde::{Deserialize, Serialize};

/// Lifecycle of a payment.
///
/// ```text
/// PENDING ──► PROCESSING ──┬──► SUCCESS
///    │            │        └──► FAILED
///    └────────────┴──► CANCELLED ◄── SUCCESS
///                          │
///                          ▼
///                   REFUND_PENDING ──► REFUNDED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
    RefundPending,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 7] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Success,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::RefundPending,
        PaymentStatus::Refunded,
    ];

    pub const CANCELLABLE: &'static [PaymentStatus] = &[
        PaymentStatus::Success,
        PaymentStatus::Pending,
        PaymentStatus::Processing,
    ];

    pub const REFUNDABLE: &'static [PaymentStatus] = &[PaymentStatus::Cancelled];

    pub const REFUND_PROCESSABLE: &'static [PaymentStatus] = &[PaymentStatus::RefundPending];

    /// States reconciliation may force to FAILED.
    pub const ABANDONABLE: &'static [PaymentStatus] =
        &[PaymentStatus::Pending, PaymentStatus::Processing];

    pub fn can_cancel(&self) -> bool {
        Self::CANCELLABLE.contains(self)
    }

    pub fn can_refund(&self) -> bool {
        Self::REFUNDABLE.contains(self)
    }

    pub fn can_process_refund(&self) -> bool {
        Self::REFUND_PROCESSABLE.contains(self)
    }

    pub fn can_abandon(&self) -> bool {
        Self::ABANDONABLE.contains(self)
    }

    /// Whether a gateway charge result can still be recorded.
    pub fn can_settle(&self) -> bool {
        *self == PaymentStatus::Processing
    }

    /// The charge has a final answer.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::RefundPending => "REFUND_PENDING",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown payment status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellable_set() {
        let cancellable: Vec<_> = PaymentStatus::ALL
            .into_iter()
            .filter(PaymentStatus::can_cancel)
            .collect();
        assert_eq!(
            cancellable,
            vec![
                PaymentStatus::Pending,
                PaymentStatus::Processing,
                PaymentStatus::Success
            ]
        );
    }

    #[test]
    fn refund_path() {
        for status in PaymentStatus::ALL {
            assert_eq!(status.can_refund(), status == PaymentStatus::Cancelled);
            assert_eq!(
                status.can_process_refund(),
                status == PaymentStatus::RefundPending
            );
        }
    }

    #[test]
    fn settled_means_success_or_failed() {
        assert!(PaymentStatus::Success.is_settled());
        assert!(PaymentStatus::Failed.is_settled());
        assert!(!PaymentStatus::Processing.is_settled());
        assert!(!PaymentStatus::Cancelled.is_settled());
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!(
            "REFUND_PENDING".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::RefundPending
        );
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Processing).unwrap(),
            "\"PROCESSING\""
        );
    }
}
