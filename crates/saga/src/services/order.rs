//! Order service client used by the payment and kitchen participants.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{CustomerId, OrderId};
use domain::{DomainError, Order, OrderRepository, OrderService, TransitionFn};

/// The order service's `GetOrder` and `UpdateOrder` calls.
#[async_trait]
pub trait OrderClient: Send + Sync {
    async fn get_order(&self, order_id: OrderId, customer_id: &CustomerId)
    -> domain::Result<Order>;

    async fn update_order(
        &self,
        order_id: OrderId,
        customer_id: &CustomerId,
        transition: TransitionFn,
    ) -> domain::Result<Order>;
}

/// Calls an order service living in the same process.
pub struct LocalOrderClient<R: OrderRepository> {
    service: Arc<OrderService<R>>,
    fail_on_update: AtomicBool,
}

impl<R: OrderRepository> LocalOrderClient<R> {
    pub fn new(service: Arc<OrderService<R>>) -> Self {
        Self {
            service,
            fail_on_update: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent update fail as if the order service were unreachable.
    pub fn set_fail_on_update(&self, fail: bool) {
        self.fail_on_update.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl<R: OrderRepository + 'static> OrderClient for LocalOrderClient<R> {
    async fn get_order(
        &self,
        order_id: OrderId,
        customer_id: &CustomerId,
    ) -> domain::Result<Order> {
        self.service.get_order(order_id, customer_id).await
    }

    async fn update_order(
        &self,
        order_id: OrderId,
        customer_id: &CustomerId,
        transition: TransitionFn,
    ) -> domain::Result<Order> {
        if self.fail_on_update.load(Ordering::SeqCst) {
            return Err(DomainError::Storage("order service unreachable".to_string()));
        }
        self.service
            .update_order(order_id, customer_id, transition)
            .await
    }
}
