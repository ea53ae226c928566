//! The views the services query, behind one processor.

use event_store::EventStore;

use crate::Result;
use crate::processor::ProjectionProcessor;
use crate::views::{OrdersView, PaymentsView};

/// Orders and payments views kept current by catching up on demand.
///
/// Callers [`refresh`](ReadSide::refresh) before querying to see every
/// event appended so far.
pub struct ReadSide<S: EventStore> {
    processor: ProjectionProcessor<S>,
    orders: OrdersView,
    payments: PaymentsView,
}

impl<S: EventStore> ReadSide<S> {
    pub fn new(store: S) -> Self {
        let orders = OrdersView::new();
        let payments = PaymentsView::new();
        let mut processor = ProjectionProcessor::new(store);
        processor.register(Box::new(orders.clone()));
        processor.register(Box::new(payments.clone()));
        Self {
            processor,
            orders,
            payments,
        }
    }

    pub async fn refresh(&self) -> Result<()> {
        self.processor.run_catch_up().await
    }

    pub async fn rebuild(&self) -> Result<()> {
        self.processor.rebuild_all().await
    }

    pub fn orders(&self) -> &OrdersView {
        &self.orders
    }

    pub fn payments(&self) -> &PaymentsView {
        &self.payments
    }
}
