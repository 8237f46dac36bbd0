//! End-to-end tests of the order saga over the in-memory bus.
//!
//! Every participant runs its real consumer loop; only the payment provider
//! and the webhook caller are simulated.

use std::sync::Arc;
use std::time::Duration;

use broker::{Envelope, InMemoryBus, MessageBus, RetryCoordinator, RetryPolicy};
use common::{CustomerId, ItemWithQuantity, ProductId, events::DEAD_LETTER_QUEUE, events::ORDER_PAID};
use domain::{InMemoryOrderRepository, Order, OrderService, OrderStatus};
use inventory::{
    EngineConfig, InMemoryInventoryStore, ReservationEngine, StaticPricingProvider, StockService,
};
use saga::{
    InMemoryPaymentLinkProvider, KitchenHandler, LocalOrderClient, LocalStockClient,
    OrderClient, OrderCreatedHandler, OrderPaidHandler, PaymentWebhook, SagaHandlers,
    WebhookEvent, WebhookOutcome, WebhookVerifier, spawn_consumers,
    webhook::{CHECKOUT_SESSION_COMPLETED, PAYMENT_STATUS_PAID},
};
use tokio::sync::watch;

const MAX_RETRY: i64 = 3;
const WEBHOOK_SECRET: &str = "whsec_saga";

struct Harness {
    bus: Arc<InMemoryBus>,
    orders: Arc<OrderService<InMemoryOrderRepository>>,
    order_client: Arc<LocalOrderClient<InMemoryOrderRepository>>,
    stock: Arc<InMemoryInventoryStore>,
    provider: Arc<InMemoryPaymentLinkProvider>,
    webhook: PaymentWebhook,
    _shutdown: watch::Sender<bool>,
}

impl Harness {
    async fn start() -> Self {
        let bus = Arc::new(InMemoryBus::recording());

        let stock = Arc::new(InMemoryInventoryStore::with_stock([("sku-1", 10), ("sku-2", 1)]).await);
        let pricing = Arc::new(
            StaticPricingProvider::with_prices([("sku-1", "price_1"), ("sku-2", "price_2")]).await,
        );
        let engine = Arc::new(ReservationEngine::new(
            stock.clone(),
            pricing.clone(),
            EngineConfig::default(),
        ));
        let stock_client = Arc::new(LocalStockClient::new(Arc::new(StockService::new(
            engine, pricing,
        ))));

        let orders = Arc::new(OrderService::new(
            Arc::new(InMemoryOrderRepository::new()),
            stock_client,
            bus.clone(),
        ));
        let order_client = Arc::new(LocalOrderClient::new(orders.clone()));
        let provider =
            Arc::new(InMemoryPaymentLinkProvider::new("https://pay.example").with_recording());

        let handlers = SagaHandlers {
            order: Arc::new(OrderPaidHandler::new(order_client.clone())),
            payment: Arc::new(OrderCreatedHandler::new(provider.clone(), order_client.clone())),
            kitchen: Arc::new(KitchenHandler::new(
                order_client.clone(),
                Duration::from_millis(10),
            )),
        };
        let coordinator = Arc::new(RetryCoordinator::new(
            bus.clone(),
            RetryPolicy {
                max_retry: MAX_RETRY,
                base_delay: Duration::from_millis(5),
            },
        ));

        let (shutdown, rx) = watch::channel(false);
        spawn_consumers(bus.clone(), coordinator, handlers, rx);
        // let the broadcast consumers bind their queues
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            bus: bus.clone(),
            orders,
            order_client,
            stock,
            provider,
            webhook: PaymentWebhook::new(bus, WebhookVerifier::new(WEBHOOK_SECRET)),
            _shutdown: shutdown,
        }
    }

    async fn place_order(&self, lines: Vec<ItemWithQuantity>) -> Order {
        self.orders
            .create_order(CustomerId::new("cust-1"), lines)
            .await
            .unwrap()
    }

    async fn status(&self, order: &Order) -> OrderStatus {
        self.order_client
            .get_order(order.id, &order.customer_id)
            .await
            .unwrap()
            .status
    }

    async fn wait_for_status(&self, order: &Order, status: OrderStatus) -> Order {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let current = self
                    .order_client
                    .get_order(order.id, &order.customer_id)
                    .await
                    .unwrap();
                if current.status == status {
                    return current;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("order never reached {status}"))
    }

    async fn pay(&self, order: &Order) -> WebhookOutcome {
        let session = self
            .provider
            .session_for(order.id)
            .expect("no checkout session for order");
        let event = WebhookEvent {
            kind: CHECKOUT_SESSION_COMPLETED.to_string(),
            payment_status: PAYMENT_STATUS_PAID.to_string(),
            metadata: Some(session.metadata),
        };
        let body = serde_json::to_vec(&event).unwrap();
        let signature = WebhookVerifier::new(WEBHOOK_SECRET)
            .sign(&body, chrono::Utc::now().timestamp())
            .unwrap();
        self.webhook.handle(&body, Some(&signature)).await.unwrap()
    }

    async fn wait_for_dead_letters(&self, count: usize) -> Vec<Envelope> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let dead = self
                    .bus
                    .published()
                    .into_iter()
                    .filter(|e| e.routing_key == DEAD_LETTER_QUEUE)
                    .count();
                if dead >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages were never dead-lettered");
        self.bus.drain(DEAD_LETTER_QUEUE).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn order_goes_from_pending_to_ready() {
    let h = Harness::start().await;
    let order = h
        .place_order(vec![
            ItemWithQuantity::new("sku-1", 3),
            ItemWithQuantity::new("sku-1", 1),
        ])
        .await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.items.len(), 1);
    assert_eq!(h.stock.quantity(&ProductId::new("sku-1")).await, Some(6));

    let waiting = h.wait_for_status(&order, OrderStatus::WaitingForPayment).await;
    let link = waiting.payment_link.clone().expect("payment link stored");

    assert!(matches!(h.pay(&order).await, WebhookOutcome::Published { .. }));

    let ready = h.wait_for_status(&order, OrderStatus::Ready).await;
    assert_eq!(ready.payment_link.as_deref(), Some(link.as_str()));
    assert!(h.bus.drain(DEAD_LETTER_QUEUE).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn payment_link_survives_the_webhook_round_trip() {
    let h = Harness::start().await;
    let order = h.place_order(vec![ItemWithQuantity::new("sku-2", 1)]).await;
    h.wait_for_status(&order, OrderStatus::WaitingForPayment).await;

    h.pay(&order).await;

    let paid = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = h
                .order_client
                .get_order(order.id, &order.customer_id)
                .await
                .unwrap();
            if current.status >= OrderStatus::Paid {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("order never paid");

    let link = paid.payment_link.unwrap_or_default();
    assert!(!link.is_empty());
    assert_eq!(Some(link), h.provider.session_for(order.id).map(|s| s.url));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_payment_notification_is_harmless() {
    let h = Harness::start().await;
    let order = h.place_order(vec![ItemWithQuantity::new("sku-1", 1)]).await;
    h.wait_for_status(&order, OrderStatus::WaitingForPayment).await;

    h.pay(&order).await;
    h.pay(&order).await;

    h.wait_for_status(&order, OrderStatus::Ready).await;
    // let the second copies settle
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.status(&order).await, OrderStatus::Ready);
    assert!(h.bus.drain(DEAD_LETTER_QUEUE).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forged_paid_event_is_quarantined() {
    let h = Harness::start().await;
    let order = h.place_order(vec![ItemWithQuantity::new("sku-1", 1)]).await;
    let waiting = h.wait_for_status(&order, OrderStatus::WaitingForPayment).await;

    // Claims to be order.paid but the payload was never paid.
    h.bus
        .publish(Envelope::fanout_json(ORDER_PAID, &waiting).unwrap())
        .await
        .unwrap();

    let dead = h.wait_for_dead_letters(2).await;
    assert_eq!(dead.len(), 2);
    assert!(dead.iter().all(|e| e.retry_count() == 0));
    assert_eq!(h.status(&order).await, OrderStatus::WaitingForPayment);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_order_service_exhausts_retries() {
    let h = Harness::start().await;
    h.order_client.set_fail_on_update(true);

    let order = h.place_order(vec![ItemWithQuantity::new("sku-1", 2)]).await;

    let dead = h.wait_for_dead_letters(1).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_count(), MAX_RETRY);
    let payload: Order = dead[0].decode().unwrap();
    assert_eq!(payload.id, order.id);

    // one link per attempt, none of them stored
    assert_eq!(h.provider.sessions().len(), MAX_RETRY as usize);
    assert_eq!(h.status(&order).await, OrderStatus::Pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn insufficient_stock_rejects_order_synchronously() {
    let h = Harness::start().await;
    let err = h
        .orders
        .create_order(
            CustomerId::new("cust-1"),
            vec![ItemWithQuantity::new("sku-2", 2)],
        )
        .await
        .unwrap_err();

    assert_eq!(common::StatusCode::code(&err), common::Code::FailedPrecondition);
    assert_eq!(h.stock.quantity(&ProductId::new("sku-2")).await, Some(1));
    assert!(h.bus.published().is_empty());
}
