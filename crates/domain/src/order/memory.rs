use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{CustomerId, OrderId};
use tokio::sync::RwLock;

use super::{Order, OrderRepository, TransitionFn, repository::ensure_forward};
use crate::error::{DomainError, Result};

/// In-memory order repository for tests and single-process deployments.
///
/// Updates hold the write lock across the read, the transition and the
/// write-back, so concurrent updaters of one order never lose a change.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    fail_on_update: Arc<AtomicBool>,
}

impl InMemoryOrderRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    /// Makes every subsequent update fail as if the database were down.
    pub fn set_fail_on_update(&self, fail: bool) {
        self.fail_on_update.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(DomainError::Storage(format!(
                "order {} already exists",
                order.id
            )));
        }
        orders.insert(order.id, order.clone());
        tracing::debug!(order_id = %order.id, "Order stored");
        Ok(())
    }

    async fn get(&self, order_id: OrderId, customer_id: &CustomerId) -> Result<Order> {
        self.orders
            .read()
            .await
            .get(&order_id)
            .filter(|o| &o.customer_id == customer_id)
            .cloned()
            .ok_or(DomainError::NotFound { order_id })
    }

    async fn update(
        &self,
        order_id: OrderId,
        customer_id: &CustomerId,
        transition: TransitionFn,
    ) -> Result<Order> {
        if self.fail_on_update.load(Ordering::SeqCst) {
            return Err(DomainError::Storage("simulated storage outage".to_string()));
        }

        let mut orders = self.orders.write().await;
        let current = orders
            .get(&order_id)
            .filter(|o| &o.customer_id == customer_id)
            .cloned()
            .ok_or(DomainError::NotFound { order_id })?;

        let updated = ensure_forward(&current, transition(current.clone())?)?;
        orders.insert(order_id, updated.clone());
        Ok(updated)
    }
}
