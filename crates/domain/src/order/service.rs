//! Order service: the order side of the saga's RPC surface.

use std::sync::{Arc, OnceLock};

use broker::{Envelope, MessageBus};
use common::{CustomerId, ItemWithQuantity, OrderId, events::ORDER_CREATED, merge_items};

use super::{Order, OrderError, OrderRepository, StockClient, TransitionFn};
use crate::error::Result;

/// Service for creating, reading and transitioning orders.
pub struct OrderService<R: OrderRepository> {
    repository: Arc<R>,
    stock: Arc<dyn StockClient>,
    bus: Arc<dyn MessageBus>,
}

impl<R: OrderRepository> OrderService<R> {
    /// Creates a new order service.
    pub fn new(repository: Arc<R>, stock: Arc<dyn StockClient>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            repository,
            stock,
            bus,
        }
    }

    /// Returns a reference to the underlying repository.
    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Reserves stock, stores a pending order and announces it on `order.created`.
    ///
    /// Duplicate lines for one product are merged before the reservation. If
    /// the announcement cannot be published the call fails even though the
    /// order is already stored as pending. The announcement carries the
    /// caller's trace context.
    #[tracing::instrument(skip(self, items))]
    pub async fn create_order(
        &self,
        customer_id: CustomerId,
        items: Vec<ItemWithQuantity>,
    ) -> Result<Order> {
        if customer_id.is_empty() {
            return Err(OrderError::CustomerIdRequired.into());
        }
        if items.is_empty() {
            return Err(OrderError::NoItems.into());
        }
        for item in &items {
            item.validate().map_err(OrderError::from)?;
        }

        let merged = merge_items(&items).map_err(OrderError::from)?;
        let reserved = self.stock.check_stock_and_reserve(&merged).await?;

        let order = Order::new_pending(customer_id, reserved)?;
        self.repository.create(&order).await?;

        let envelope = Envelope::direct_json(ORDER_CREATED, &order)?;
        self.bus.publish(envelope).await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id, customer_id = %order.customer_id, "Order created");
        Ok(order)
    }

    /// Loads an order belonging to `customer_id`.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId, customer_id: &CustomerId) -> Result<Order> {
        self.repository.get(order_id, customer_id).await
    }

    /// Applies `transition` to the stored order inside the repository's transaction.
    #[tracing::instrument(skip(self, transition))]
    pub async fn update_order(
        &self,
        order_id: OrderId,
        customer_id: &CustomerId,
        transition: TransitionFn,
    ) -> Result<Order> {
        // Status as read inside the repository's transaction.
        let seen = Arc::new(OnceLock::new());
        let recorder = seen.clone();
        let wrapped = super::transition(move |current| {
            recorder.get_or_init(|| current.status);
            transition(current)
        });

        let updated = self
            .repository
            .update(order_id, customer_id, wrapped)
            .await?;

        if let Some(&before) = seen.get()
            && before != updated.status
        {
            metrics::counter!("order_transitions_total", "to" => updated.status.as_str())
                .increment(1);
            tracing::info!(
                order_id = %order_id,
                from = %before,
                to = %updated.status,
                "Order transitioned"
            );
        }
        Ok(updated)
    }
}
