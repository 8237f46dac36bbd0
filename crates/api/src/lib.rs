//! HTTP API and process wiring for the order fulfillment services.
//!
//! Exposes the customer order endpoints and the payment webhook, and
//! assembles the stock, order, payment and kitchen participants over a
//! shared message bus.

pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use broker::{MessageBus, RetryCoordinator};
use domain::{OrderRepository, OrderService};
use inventory::{AdvisoryLock, InventoryStore, PricingProvider, ReservationEngine, StockService};
use saga::{
    InMemoryPaymentLinkProvider, KitchenHandler, LocalOrderClient, LocalStockClient,
    OrderCreatedHandler, OrderPaidHandler, PaymentWebhook, SagaHandlers, WebhookVerifier,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::orders::AppState;
use routes::system::SystemState;

/// Catalog served when no database is configured: `(product id, stock, price reference)`.
pub const DEMO_CATALOG: &[(&str, i32, &str)] = &[
    ("item-1", 10_000, "pid-1"),
    ("item-2", 10_000, "pid-2"),
    ("item-3", 10_000, "pid-3"),
    ("item-4", 10_000, "pid-4"),
];

/// Largest accepted payment webhook body.
pub const WEBHOOK_BODY_LIMIT: usize = 64 * 1024;

/// Everything a process needs to serve HTTP and run the saga consumers.
pub struct Services<R: OrderRepository> {
    pub state: Arc<AppState<R>>,
    pub handlers: SagaHandlers,
    pub coordinator: Arc<RetryCoordinator>,
}

/// Wires the stock, order, payment and kitchen participants together.
pub fn assemble<S, P, R>(
    config: &Config,
    stock: Arc<S>,
    pricing: Arc<P>,
    orders: Arc<R>,
    bus: Arc<dyn MessageBus>,
    advisory_lock: Option<Arc<dyn AdvisoryLock>>,
) -> Services<R>
where
    S: InventoryStore + 'static,
    P: PricingProvider + 'static,
    R: OrderRepository + 'static,
{
    let mut engine = ReservationEngine::new(stock, pricing.clone(), config.engine_config());
    if let Some(lock) = advisory_lock {
        engine = engine.with_advisory_lock(lock);
    }
    let stock_service = Arc::new(StockService::new(Arc::new(engine), pricing));

    let order_service = Arc::new(OrderService::new(
        orders,
        Arc::new(LocalStockClient::new(stock_service)),
        bus.clone(),
    ));
    let order_client = Arc::new(LocalOrderClient::new(order_service.clone()));

    let handlers = SagaHandlers {
        order: Arc::new(OrderPaidHandler::new(order_client.clone())),
        payment: Arc::new(OrderCreatedHandler::new(
            Arc::new(InMemoryPaymentLinkProvider::default()),
            order_client.clone(),
        )),
        kitchen: Arc::new(KitchenHandler::new(order_client, config.cook_time)),
    };

    let verifier = match &config.webhook_secret {
        Some(secret) => WebhookVerifier::new(secret.expose()),
        None => {
            tracing::warn!("PAYMENT_WEBHOOK_SECRET is not set, every payment webhook will be rejected");
            WebhookVerifier::new("")
        }
    };

    Services {
        state: Arc::new(AppState {
            orders: order_service,
            webhook: PaymentWebhook::new(bus.clone(), verifier),
            payment_success_url: config.payment_success_url.clone(),
        }),
        handlers,
        coordinator: Arc::new(RetryCoordinator::new(bus, config.retry_policy())),
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<R: OrderRepository + 'static>(
    state: Arc<AppState<R>>,
    system: Arc<SystemState>,
) -> Router {
    let system_router = Router::new()
        .route("/health", get(routes::system::health))
        .route("/metrics", get(routes::system::metrics))
        .with_state(system);

    Router::new()
        .route(
            "/api/customer/{customer_id}/orders",
            post(routes::orders::create::<R>),
        )
        .route(
            "/api/customer/{customer_id}/orders/{order_id}",
            get(routes::orders::get::<R>),
        )
        .route(
            "/api/webhook",
            post(routes::webhook::receive::<R>).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        )
        .with_state(state)
        .merge(system_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http().make_span_with(telemetry::request_span))
}
