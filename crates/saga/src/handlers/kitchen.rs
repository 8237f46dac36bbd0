use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use broker::{Envelope, HandlerError, MessageContext, MessageHandler};
use domain::{DomainError, OrderError, OrderStatus, transition};

use super::decode_order;
use crate::services::OrderClient;

/// Kitchen participant: cooks every paid order, then marks it ready through
/// the order service.
pub struct KitchenHandler {
    orders: Arc<dyn OrderClient>,
    cook_time: Duration,
    cooked: AtomicU64,
}

impl KitchenHandler {
    pub fn new(orders: Arc<dyn OrderClient>, cook_time: Duration) -> Self {
        Self {
            orders,
            cook_time,
            cooked: AtomicU64::new(0),
        }
    }

    /// Orders cooked by this handler since it was built.
    pub fn cooked(&self) -> u64 {
        self.cooked.load(Ordering::Relaxed)
    }

    async fn cook(&self, order_id: &common::OrderId) {
        tracing::info!(order_id = %order_id, "Cooking order");
        tokio::time::sleep(self.cook_time).await;
        self.cooked.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("kitchen_orders_cooked_total").increment(1);
        tracing::info!(order_id = %order_id, "Order cooked");
    }
}

#[async_trait]
impl MessageHandler for KitchenHandler {
    fn name(&self) -> &'static str {
        "kitchen.order_paid"
    }

    async fn handle(&self, _ctx: &MessageContext, envelope: &Envelope) -> Result<(), HandlerError> {
        let order = decode_order(envelope)?;
        if order.status != OrderStatus::Paid {
            return Err(HandlerError::permanent(format!(
                "order {} not paid (status = {}), can not cook",
                order.id, order.status
            )));
        }

        // A redelivered copy for an order already ready is not cooked twice.
        let current = self
            .orders
            .get_order(order.id, &order.customer_id)
            .await
            .map_err(HandlerError::from_status)?;
        match current.status {
            OrderStatus::Ready => {
                tracing::info!(order_id = %order.id, "Order already ready");
                return Ok(());
            }
            OrderStatus::Paid => {}
            OrderStatus::WaitingForPayment => {
                return Err(HandlerError::transient(format!(
                    "payment for order {} not applied yet",
                    order.id
                )));
            }
            status => {
                return Err(HandlerError::permanent(format!(
                    "order {} is {status}, can not cook",
                    order.id
                )));
            }
        }
        if current.payment_link != order.payment_link {
            return Err(HandlerError::permanent(format!(
                "order {} paid through a different payment link",
                order.id
            )));
        }

        self.cook(&order.id).await;

        self.orders
            .update_order(
                order.id,
                &order.customer_id,
                transition(|mut o| {
                    if o.status == OrderStatus::Ready {
                        return Ok(o);
                    }
                    o.mark_ready()?;
                    Ok(o)
                }),
            )
            .await
            .map_err(|e| {
                // Both participants consume the same broadcast; the order
                // side may not have applied the payment yet.
                if matches!(
                    e,
                    DomainError::Order(OrderError::NotPaid {
                        status: OrderStatus::WaitingForPayment,
                        ..
                    })
                ) {
                    HandlerError::transient(format!("payment not applied yet: {e}"))
                } else {
                    HandlerError::from_status(e)
                }
            })?;
        Ok(())
    }
}
