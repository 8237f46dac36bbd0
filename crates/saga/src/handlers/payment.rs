use std::sync::Arc;

use async_trait::async_trait;
use broker::{Envelope, HandlerError, MessageContext, MessageHandler};
use domain::{OrderStatus, transition};

use super::decode_order;
use crate::services::{OrderClient, PaymentLinkProvider};

/// Payment participant: turns `order.created` into a payment link and
/// moves the order to `waiting_for_payment`.
pub struct OrderCreatedHandler {
    provider: Arc<dyn PaymentLinkProvider>,
    orders: Arc<dyn OrderClient>,
}

impl OrderCreatedHandler {
    pub fn new(provider: Arc<dyn PaymentLinkProvider>, orders: Arc<dyn OrderClient>) -> Self {
        Self { provider, orders }
    }
}

#[async_trait]
impl MessageHandler for OrderCreatedHandler {
    fn name(&self) -> &'static str {
        "payment.order_created"
    }

    async fn handle(&self, _ctx: &MessageContext, envelope: &Envelope) -> Result<(), HandlerError> {
        let order = decode_order(envelope)?;

        // A redelivery after the link was stored has nothing left to do.
        let current = self
            .orders
            .get_order(order.id, &order.customer_id)
            .await
            .map_err(HandlerError::from_status)?;
        if current.status >= OrderStatus::WaitingForPayment {
            tracing::info!(order_id = %order.id, status = %current.status, "Payment link already issued");
            return Ok(());
        }

        let link = self
            .provider
            .create_payment_link(&order)
            .await
            .map_err(HandlerError::from_status)?;
        metrics::counter!("payment_links_created_total").increment(1);
        tracing::info!(order_id = %order.id, "Payment link created");

        let url = link.url;
        self.orders
            .update_order(
                order.id,
                &order.customer_id,
                transition(move |mut o| {
                    o.await_payment(url)?;
                    Ok(o)
                }),
            )
            .await
            .map_err(HandlerError::from_status)?;
        Ok(())
    }
}
