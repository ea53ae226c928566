//! Wiring of the store, channel, components and background workers.

use std::sync::Arc;

use domain::{InMemoryCatalog, ProductCatalog};
use event_store::EventStore;
use messaging::{ConsumerRuntime, EventChannel, ORDER_CREATED_TOPIC, PAYMENT_PROCESSED_TOPIC};
use projections::ReadSide;
use saga::{InMemoryGateway, OrderSaga, PaymentSaga, ReconciliationSweep};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;

pub type Orders<S, C> = OrderSaga<S, C>;
pub type Payments<S, C> = PaymentSaga<S, C, InMemoryGateway>;
pub type Sweep<S, C> = ReconciliationSweep<S, C, InMemoryGateway>;

/// Products offered when no catalog file is configured.
pub fn default_catalog() -> InMemoryCatalog {
    InMemoryCatalog::from_prices([
        ("SKU-001", common::Money::from_cents(1000)),
        ("SKU-002", common::Money::from_cents(500)),
        ("SKU-003", common::Money::from_cents(2599)),
    ])
}

/// Both components and everything they share, with the background workers
/// that connect them.
pub struct Runtime<S: EventStore, C: EventChannel> {
    pub orders: Arc<Orders<S, C>>,
    pub payments: Arc<Payments<S, C>>,
    pub sweep: Arc<Sweep<S, C>>,
    pub read_side: Arc<ReadSide<S>>,
    pub channel: Arc<C>,
    pub gateway: InMemoryGateway,
    config: Config,
    consumers: Option<ConsumerRuntime<C>>,
    sweep_shutdown: watch::Sender<bool>,
    sweep_task: Option<JoinHandle<()>>,
}

impl<S: EventStore + Clone + 'static, C: EventChannel + 'static> Runtime<S, C> {
    pub fn new(
        store: S,
        channel: Arc<C>,
        catalog: Arc<dyn ProductCatalog>,
        gateway: InMemoryGateway,
        config: Config,
    ) -> Self {
        let read_side = Arc::new(ReadSide::new(store.clone()));

        let orders = Arc::new(OrderSaga::new(
            store.clone(),
            Arc::clone(&channel),
            catalog,
            Arc::clone(&read_side),
        ));
        let payments = Arc::new(PaymentSaga::new(
            store,
            Arc::clone(&channel),
            gateway.clone(),
            Arc::clone(&read_side),
            config.saga.clone(),
        ));
        let sweep = Arc::new(ReconciliationSweep::new(
            Arc::clone(&orders),
            Arc::clone(&payments),
            Arc::clone(&read_side),
            config.saga.clone(),
        ));
        let (sweep_shutdown, _) = watch::channel(false);

        Self {
            orders,
            payments,
            sweep,
            read_side,
            channel,
            gateway,
            config,
            consumers: None,
            sweep_shutdown,
            sweep_task: None,
        }
    }

    /// Subscribes both components to their topics and starts the sweep loop.
    pub fn start(&mut self) {
        if self.consumers.is_some() {
            return;
        }

        let mut consumers =
            ConsumerRuntime::new(Arc::clone(&self.channel), self.config.consumer.clone());
        consumers.subscribe(ORDER_CREATED_TOPIC, self.payments.clone());
        consumers.subscribe(PAYMENT_PROCESSED_TOPIC, self.orders.clone());
        self.consumers = Some(consumers);

        let sweep = Arc::clone(&self.sweep);
        let interval = self.config.sweep_interval;
        let shutdown = self.sweep_shutdown.subscribe();
        self.sweep_task = Some(tokio::spawn(async move {
            sweep.run(interval, shutdown).await;
        }));

        tracing::info!(
            partitions = self.channel.partitions(),
            sweep_interval_secs = interval.as_secs(),
            "runtime started"
        );
    }

    /// Stops the sweep loop and every consumer worker.
    pub async fn shutdown(mut self) {
        let _ = self.sweep_shutdown.send(true);
        if let Some(task) = self.sweep_task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "sweep task panicked");
            }
        }
        if let Some(consumers) = self.consumers.take() {
            consumers.shutdown().await;
        }
        tracing::info!("runtime stopped");
    }
}
