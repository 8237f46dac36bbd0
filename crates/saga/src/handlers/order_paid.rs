use std::sync::Arc;

use async_trait::async_trait;
use broker::{Envelope, HandlerError, MessageContext, MessageHandler};
use domain::transition;

use super::decode_order;
use crate::services::OrderClient;

/// Order participant: applies the broadcast `order.paid` to the stored order.
///
/// The payload is re-validated as paid rather than trusted because it came
/// over the bus; an order already past `waiting_for_payment` is left alone
/// so a redelivery is harmless.
pub struct OrderPaidHandler {
    orders: Arc<dyn OrderClient>,
}

impl OrderPaidHandler {
    pub fn new(orders: Arc<dyn OrderClient>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl MessageHandler for OrderPaidHandler {
    fn name(&self) -> &'static str {
        "order.order_paid"
    }

    async fn handle(&self, _ctx: &MessageContext, envelope: &Envelope) -> Result<(), HandlerError> {
        let confirmation = decode_order(envelope)?;
        confirmation.is_paid().map_err(HandlerError::from_status)?;

        let order_id = confirmation.id;
        let customer_id = confirmation.customer_id.clone();
        let updated = self
            .orders
            .update_order(
                order_id,
                &customer_id,
                transition(move |mut o| {
                    if !o.confirm_payment(&confirmation)? {
                        tracing::info!(order_id = %o.id, status = %o.status, "Payment already applied");
                    }
                    Ok(o)
                }),
            )
            .await
            .map_err(HandlerError::from_status)?;

        tracing::debug!(order_id = %updated.id, status = %updated.status, "Order paid");
        Ok(())
    }
}
