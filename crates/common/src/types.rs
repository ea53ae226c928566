use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identity of an event-sourced aggregate (orders and payments).
    AggregateId
);

uuid_id!(
    /// The user who owns an order and its payment.
    OwnerId
);

uuid_id!(
    /// Idempotency key of a channel message.
    ///
    /// Distinct from any business id: a republished message keeps its id, a
    /// new message always gets a fresh one.
    MessageId
);

/// Namespace for ids derived from other ids (payment id from order id).
const DERIVED_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b7d_4c38_a1e5_0d3f_72b9_c814);

impl AggregateId {
    /// Derives a stable id from another aggregate id.
    ///
    /// The same `(self, scope)` always yields the same id, which lets a
    /// component claim "at most one X per Y" through stream creation.
    pub fn derive(&self, scope: &str) -> AggregateId {
        let mut name = Vec::with_capacity(16 + scope.len());
        name.extend_from_slice(self.0.as_bytes());
        name.extend_from_slice(scope.as_bytes());
        AggregateId(Uuid::new_v5(&DERIVED_NAMESPACE, &name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(AggregateId::new(), AggregateId::new());
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        assert_eq!(OwnerId::from_uuid(uuid).as_uuid(), uuid);
    }

    #[test]
    fn parses_from_string() {
        let id = AggregateId::new();
        let parsed: AggregateId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<MessageId>().is_err());
    }

    #[test]
    fn serializes_as_plain_uuid() {
        let id = MessageId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }

    #[test]
    fn derive_is_stable_and_scoped() {
        let order = AggregateId::new();
        assert_eq!(order.derive("payment"), order.derive("payment"));
        assert_ne!(order.derive("payment"), order.derive("refund"));
        assert_ne!(order.derive("payment"), AggregateId::new().derive("payment"));
    }
}
