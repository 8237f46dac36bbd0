//! Payment-completed webhook of the payment participant.

use std::sync::Arc;

use broker::{Envelope, MessageBus};
use common::{OrderId, events::ORDER_PAID};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::services::CheckoutMetadata;
use crate::signature::WebhookVerifier;

/// Event type sent when a hosted checkout finishes.
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// Payment status of a settled checkout.
pub const PAYMENT_STATUS_PAID: &str = "paid";

/// Notification posted by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payment_status: String,
    #[serde(default)]
    pub metadata: Option<CheckoutMetadata>,
}

/// What the webhook did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// `order.paid` was broadcast for this order.
    Published { order_id: OrderId },
    /// Not a completed, paid checkout.
    Ignored,
}

/// Converts signed, paid checkouts into `order.paid` broadcasts.
pub struct PaymentWebhook {
    bus: Arc<dyn MessageBus>,
    verifier: WebhookVerifier,
}

impl PaymentWebhook {
    pub fn new(bus: Arc<dyn MessageBus>, verifier: WebhookVerifier) -> Self {
        Self { bus, verifier }
    }

    /// Handles a raw notification body and its signature header.
    ///
    /// Nothing in the body is looked at before the signature checks out.
    #[tracing::instrument(skip_all)]
    pub async fn handle(&self, payload: &[u8], signature: Option<&str>) -> Result<WebhookOutcome> {
        if let Err(e) = self.verifier.verify(payload, signature) {
            metrics::counter!("payment_webhooks_total", "outcome" => "rejected").increment(1);
            tracing::warn!(error = %e, "Rejected webhook");
            return Err(e);
        }
        let event: WebhookEvent = serde_json::from_slice(payload)?;
        self.dispatch(event).await
    }

    async fn dispatch(&self, event: WebhookEvent) -> Result<WebhookOutcome> {
        if event.kind != CHECKOUT_SESSION_COMPLETED {
            metrics::counter!("payment_webhooks_total", "outcome" => "ignored").increment(1);
            tracing::debug!(kind = %event.kind, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored);
        }
        if event.payment_status != PAYMENT_STATUS_PAID {
            metrics::counter!("payment_webhooks_total", "outcome" => "ignored").increment(1);
            tracing::info!(payment_status = %event.payment_status, "Checkout completed without payment");
            return Ok(WebhookOutcome::Ignored);
        }

        let metadata = event
            .metadata
            .ok_or_else(|| SagaError::InvalidWebhook("missing metadata".to_string()))?;
        let order = metadata.into_paid_order()?;

        let envelope = Envelope::fanout_json(ORDER_PAID, &order)?;
        self.bus.publish(envelope).await?;

        metrics::counter!("payment_webhooks_total", "outcome" => "published").increment(1);
        tracing::info!(order_id = %order.id, "Published order.paid");
        Ok(WebhookOutcome::Published { order_id: order.id })
    }
}
