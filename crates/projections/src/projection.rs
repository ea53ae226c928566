//! The contract every order/payment view implements.
//!
//! Views are fed the store's global stream in insertion order. A view's
//! position is how far into that stream it has read, so catch-up can hand
//! it only the events it has not seen, and a rebuild starts it from zero.

use async_trait::async_trait;
use event_store::EventEnvelope;

use crate::Result;

/// Count of global-stream events a view has consumed, relevant or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProjectionPosition {
    pub events_seen: u64,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn advance(&self) -> Self {
        Self {
            events_seen: self.events_seen + 1,
        }
    }

    /// Whether the event at 1-based stream `index` was already consumed.
    pub fn has_seen(&self, index: u64) -> bool {
        index <= self.events_seen
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "seen {} events", self.events_seen)
    }
}

/// A query-side view over order and payment events.
///
/// `handle` must advance the position for every event it is given, including
/// events of aggregate types the view ignores.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Label used in logs and the `projections_events_processed` metric.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    /// Drops every summary and rewinds to zero.
    async fn reset(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_view_has_seen_nothing() {
        let pos = ProjectionPosition::zero();
        assert_eq!(pos.events_seen, 0);
        assert!(!pos.has_seen(1));
    }

    #[test]
    fn advancing_marks_stream_prefix_seen() {
        let pos = ProjectionPosition::zero().advance().advance();
        assert!(pos.has_seen(1));
        assert!(pos.has_seen(2));
        assert!(!pos.has_seen(3));
        assert!(pos > ProjectionPosition::zero());
    }

    #[test]
    fn position_display() {
        let pos = ProjectionPosition { events_seen: 42 };
        assert_eq!(pos.to_string(), "seen 42 events");
    }
}
