use async_trait::async_trait;
use common::{CustomerId, OrderId};

use super::{Order, OrderError, OrderStatus};
use crate::error::Result;

/// Mutation applied to the currently persisted order inside the store's
/// transaction. Returns the order to write back, or an error to abort.
pub type TransitionFn = Box<dyn FnOnce(Order) -> Result<Order> + Send>;

/// Boxes a closure as a [`TransitionFn`].
pub fn transition<F>(f: F) -> TransitionFn
where
    F: FnOnce(Order) -> Result<Order> + Send + 'static,
{
    Box::new(f)
}

/// Persistence for orders, keyed by (order ID, customer ID).
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order.
    async fn create(&self, order: &Order) -> Result<()>;

    /// Loads an order. A customer mismatch is reported as not found.
    async fn get(&self, order_id: OrderId, customer_id: &CustomerId) -> Result<Order>;

    /// Re-reads the order under the store's lock, applies `transition` and
    /// writes the result back atomically.
    async fn update(
        &self,
        order_id: OrderId,
        customer_id: &CustomerId,
        transition: TransitionFn,
    ) -> Result<Order>;
}

/// Rejects an update that would move the status backwards or skip a step.
///
/// Identity fields are restored from `before`; a transition can only change
/// status, payment link and items.
pub fn ensure_forward(before: &Order, mut after: Order) -> Result<Order> {
    if after.status != before.status && !before.status.can_transition_to(after.status) {
        return Err(OrderError::InvalidTransition {
            from: before.status,
            to: after.status,
        }
        .into());
    }
    if after.status == OrderStatus::WaitingForPayment
        && after.payment_link.as_deref().unwrap_or_default().is_empty()
    {
        return Err(OrderError::EmptyPaymentLink.into());
    }
    after.id = before.id;
    after.customer_id = before.customer_id.clone();
    Ok(after)
}
