//! Order state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle of an order.
///
/// ```text
/// CREATED ──► PENDING_PAYMENT ──┬──► PAID ──┬──► COMPLETED
///    │                          │           └──► CANCELLED
///    └──────────────────────────┴──► PAYMENT_FAILED
/// ```
///
/// A payment outcome may overtake the publish acknowledgement, so
/// settlement is accepted from `CREATED` as well as `PENDING_PAYMENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Created,
    PendingPayment,
    Paid,
    PaymentFailed,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Created,
        OrderStatus::PendingPayment,
        OrderStatus::Paid,
        OrderStatus::PaymentFailed,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// States a successful publish may advance.
    pub const PAYMENT_REQUESTABLE: &'static [OrderStatus] = &[OrderStatus::Created];

    /// States that accept a SUCCESS/FAILED outcome or sweep compensation.
    pub const SETTLEABLE: &'static [OrderStatus] =
        &[OrderStatus::Created, OrderStatus::PendingPayment];

    pub const COMPLETABLE: &'static [OrderStatus] = &[OrderStatus::Paid];

    /// States a payment cancellation can cancel.
    pub const CANCELLABLE: &'static [OrderStatus] = &[OrderStatus::Paid];

    pub fn can_request_payment(&self) -> bool {
        Self::PAYMENT_REQUESTABLE.contains(self)
    }

    pub fn can_settle(&self) -> bool {
        Self::SETTLEABLE.contains(self)
    }

    pub fn can_complete(&self) -> bool {
        Self::COMPLETABLE.contains(self)
    }

    pub fn can_cancel(&self) -> bool {
        Self::CANCELLABLE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::PaymentFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::PaymentFailed => "PAYMENT_FAILED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_created() {
        assert_eq!(OrderStatus::default(), OrderStatus::Created);
    }

    #[test]
    fn settlement_only_before_payment_resolves() {
        assert!(OrderStatus::Created.can_settle());
        assert!(OrderStatus::PendingPayment.can_settle());
        for status in [
            OrderStatus::Paid,
            OrderStatus::PaymentFailed,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert!(!status.can_settle(), "{status} must not settle");
        }
    }

    #[test]
    fn only_paid_completes_or_cancels() {
        for status in OrderStatus::ALL {
            assert_eq!(status.can_complete(), status == OrderStatus::Paid);
            assert_eq!(status.can_cancel(), status == OrderStatus::Paid);
        }
    }

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = OrderStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                OrderStatus::PaymentFailed,
                OrderStatus::Completed,
                OrderStatus::Cancelled
            ]
        );
    }

    #[test]
    fn wire_names() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::PendingPayment).unwrap(),
            "\"PENDING_PAYMENT\""
        );
        assert_eq!(
            "payment_failed".parse::<OrderStatus>().unwrap(),
            OrderStatus::PaymentFailed
        );
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }
}
