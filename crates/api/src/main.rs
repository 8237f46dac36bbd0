//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::routes::system::{Backends, SystemState};
use api::{DEMO_CATALOG, Services};
use broker::{InMemoryBus, MessageBus};
use domain::{InMemoryOrderRepository, OrderRepository, PostgresOrderRepository};
use inventory::{
    AdvisoryLock, InMemoryInventoryStore, InventoryStore, PostgresInventoryStore,
    StaticPricingProvider,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
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
    let (json, text) = match config.log_format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text);

    #[cfg(feature = "otel")]
    registry
        .with(broker::trace::otel_layer("order-fulfillment"))
        .init();

    #[cfg(not(feature = "otel"))]
    registry.init();
}

async fn connect_bus(config: &Config) -> (Arc<dyn MessageBus>, &'static str) {
    match &config.amqp_url {
        #[cfg(feature = "amqp")]
        Some(url) => {
            let bus = broker::AmqpBus::connect(url)
                .await
                .expect("failed to connect to RabbitMQ");
            (Arc::new(bus), "amqp")
        }
        #[cfg(not(feature = "amqp"))]
        Some(_) => {
            tracing::warn!("AMQP_URL is set but the amqp feature is disabled, using the in-memory bus");
            (Arc::new(InMemoryBus::new()), "in_memory")
        }
        None => (Arc::new(InMemoryBus::new()), "in_memory"),
    }
}

#[cfg(feature = "redis")]
async fn advisory_lock(config: &Config) -> Option<Arc<dyn AdvisoryLock>> {
    let url = config.redis_url.as_ref()?;
    let lock = inventory::RedisAdvisoryLock::connect(url)
        .await
        .expect("failed to connect to Redis");
    Some(Arc::new(lock))
}

#[cfg(not(feature = "redis"))]
async fn advisory_lock(config: &Config) -> Option<Arc<dyn AdvisoryLock>> {
    if let Some(url) = &config.redis_url {
        tracing::warn!(%url, "REDIS_URL is set but the redis feature is disabled, reserving without an advisory lock");
    }
    None
}

async fn serve<S, R>(
    config: Config,
    stock: Arc<S>,
    orders: Arc<R>,
    bus: Arc<dyn MessageBus>,
    backends: Backends,
    metrics: PrometheusHandle,
) where
    S: InventoryStore + 'static,
    R: OrderRepository + 'static,
{
    let pricing = Arc::new(
        StaticPricingProvider::with_prices(DEMO_CATALOG.iter().map(|(id, _, price)| (*id, *price)))
            .await,
    );
    let lock = advisory_lock(&config).await;

    let Services {
        state,
        handlers,
        coordinator,
    } = api::assemble(&config, stock, pricing, orders, bus.clone(), lock);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumers = saga::spawn_consumers(bus, coordinator, handlers, shutdown_rx);

    let app = api::create_app(state, Arc::new(SystemState { backends, metrics }));

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("HTTP server stopped, stopping consumers");
    let _ = shutdown_tx.send(true);
    for consumer in consumers {
        match consumer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "consumer stopped with an error"),
            Err(e) => tracing::error!(error = %e, "consumer task panicked"),
        }
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = Config::from_env().expect("invalid configuration");
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Message bus
    let (bus, bus_kind) = connect_bus(&config).await;

    // 4. Stores, then serve until a shutdown signal
    let locking_strategy = config.locking_strategy.as_str();
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let stock = Arc::new(PostgresInventoryStore::new(pool.clone()));
            stock
                .run_migrations()
                .await
                .expect("failed to run migrations");
            let orders = Arc::new(PostgresOrderRepository::new(pool));
            let backends = Backends {
                storage: "postgres",
                bus: bus_kind,
                locking_strategy,
            };
            serve(config, stock, orders, bus, backends, metrics).await;
        }
        None => {
            let stock = Arc::new(
                InMemoryInventoryStore::with_stock(
                    DEMO_CATALOG.iter().map(|(id, quantity, _)| (*id, *quantity)),
                )
                .await,
            );
            let orders = Arc::new(InMemoryOrderRepository::new());
            let backends = Backends {
                storage: "in_memory",
                bus: bus_kind,
                locking_strategy,
            };
            serve(config, stock, orders, bus, backends, metrics).await;
        }
    }
}
