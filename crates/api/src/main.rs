//! Fulfillment server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::runtime::{Runtime, default_catalog};
use domain::{InMemoryCatalog, ProductCatalog};
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use messaging::{EventChannel, InMemoryChannel, PostgresChannel};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::InMemoryGateway;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn load_catalog(config: &Config) -> Arc<dyn ProductCatalog> {
    let Some(path) = &config.catalog_path else {
        return Arc::new(default_catalog());
    };
    let json = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("failed to read catalog {}: {e}", path.display()));
    let catalog = InMemoryCatalog::from_json(&json)
        .unwrap_or_else(|e| panic!("invalid catalog {}: {e}", path.display()));
    tracing::info!(path = %path.display(), products = catalog.len(), "catalog loaded");
    Arc::new(catalog)
}

async fn serve<S: EventStore + Clone + 'static, C: EventChannel + 'static>(
    store: S,
    channel: C,
    config: Config,
    metrics_handle: PrometheusHandle,
) {
    let catalog = load_catalog(&config);
    let addr = config.addr();
    let mut runtime = Runtime::new(
        store,
        Arc::new(channel),
        catalog,
        InMemoryGateway::new(),
        config,
    );

    // Replay existing events into the read models before taking traffic.
    runtime
        .read_side
        .rebuild()
        .await
        .expect("read model rebuild failed");
    runtime.start();

    let app = api::create_app(api::AppState::from_runtime(&runtime), metrics_handle);

    tracing::info!(%addr, "starting fulfillment server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    runtime.shutdown().await;
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env().expect("invalid configuration");
    init_tracing(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresEventStore::connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            let channel = PostgresChannel::new(store.pool().clone(), config.channel_partitions);
            tracing::info!("using PostgreSQL event store and channel");
            serve(store, channel, config, metrics_handle).await;
        }
        None => {
            let channel = InMemoryChannel::new(config.channel_partitions);
            tracing::info!("using in-memory event store and channel");
            serve(InMemoryEventStore::new(), channel, config, metrics_handle).await;
        }
    }
}
