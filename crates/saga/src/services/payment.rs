//! Payment link provider trait and in-memory implementation.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{CustomerId, Item, OrderId};
use domain::{Order, OrderStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SagaError};

/// Metadata attached to a checkout session and echoed back by the
/// payment-completed webhook.
///
/// Values are strings, as checkout providers only store string metadata;
/// `items` holds the JSON-encoded line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    #[serde(rename = "orderID")]
    pub order_id: String,
    #[serde(rename = "customerID")]
    pub customer_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "paymentLink", default)]
    pub payment_link: String,
    #[serde(default)]
    pub items: String,
}

impl CheckoutMetadata {
    /// Metadata for a checkout session of `order` reachable at `link`.
    pub fn for_order(order: &Order, link: &str) -> Result<Self> {
        Ok(Self {
            order_id: order.id.to_string(),
            customer_id: order.customer_id.to_string(),
            status: order.status.to_string(),
            payment_link: link.to_string(),
            items: serde_json::to_string(&order.items)?,
        })
    }

    /// Rebuilds the paid order announced on `order.paid`.
    ///
    /// The payment link must have survived the round trip.
    pub fn into_paid_order(self) -> Result<Order> {
        let id = OrderId::parse(&self.order_id)
            .map_err(|e| SagaError::InvalidWebhook(format!("bad orderID {:?}: {e}", self.order_id)))?;
        if self.customer_id.is_empty() {
            return Err(SagaError::InvalidWebhook("missing customerID".to_string()));
        }
        if self.payment_link.is_empty() {
            return Err(SagaError::InvalidWebhook("missing paymentLink".to_string()));
        }
        let items: Vec<Item> = if self.items.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&self.items)?
        };

        Ok(Order {
            id,
            customer_id: CustomerId::new(self.customer_id),
            status: OrderStatus::Paid,
            payment_link: Some(self.payment_link),
            items,
        })
    }
}

/// A checkout link together with the metadata stored on its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLink {
    pub url: String,
    pub metadata: CheckoutMetadata,
}

/// Creates hosted checkout links for orders.
#[async_trait]
pub trait PaymentLinkProvider: Send + Sync {
    async fn create_payment_link(&self, order: &Order) -> Result<PaymentLink>;
}

/// In-memory payment link provider for testing and local runs.
///
/// Links have the form `<base_url>/<session id>`. Created links are only
/// kept when built with [`with_recording`](Self::with_recording).
pub struct InMemoryPaymentLinkProvider {
    base_url: String,
    sessions: Option<Mutex<Vec<PaymentLink>>>,
    fail_on_create: AtomicBool,
}

impl InMemoryPaymentLinkProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            sessions: None,
            fail_on_create: AtomicBool::new(false),
        }
    }

    /// Keeps every created link for [`sessions`](Self::sessions).
    pub fn with_recording(mut self) -> Self {
        self.sessions = Some(Mutex::new(Vec::new()));
        self
    }

    /// Configures the provider to fail every link creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.fail_on_create.store(fail, Ordering::SeqCst);
    }

    /// Returns every link created so far; empty unless recording.
    pub fn sessions(&self) -> Vec<PaymentLink> {
        let Some(sessions) = &self.sessions else {
            return Vec::new();
        };
        sessions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Returns the link created for `order_id`, if any.
    pub fn session_for(&self, order_id: OrderId) -> Option<PaymentLink> {
        let order_id = order_id.to_string();
        self.sessions()
            .into_iter()
            .rev()
            .find(|s| s.metadata.order_id == order_id)
    }
}

impl Default for InMemoryPaymentLinkProvider {
    fn default() -> Self {
        Self::new("https://checkout.local/pay")
    }
}

#[async_trait]
impl PaymentLinkProvider for InMemoryPaymentLinkProvider {
    async fn create_payment_link(&self, order: &Order) -> Result<PaymentLink> {
        if self.fail_on_create.load(Ordering::SeqCst) {
            return Err(SagaError::PaymentProvider(
                "checkout provider unavailable".to_string(),
            ));
        }

        let url = format!("{}/cs_{}", self.base_url, Uuid::new_v4().simple());
        let link = PaymentLink {
            metadata: CheckoutMetadata::for_order(order, &url)?,
            url,
        };
        if let Some(sessions) = &self.sessions {
            match sessions.lock() {
                Ok(mut sessions) => sessions.push(link.clone()),
                Err(poisoned) => poisoned.into_inner().push(link.clone()),
            }
        }
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order::new_pending(
            CustomerId::new("cust-1"),
            vec![Item::new("sku-1", "Widget", 2, "price_1")],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn link_metadata_carries_the_link() {
        let provider = InMemoryPaymentLinkProvider::new("https://pay.example").with_recording();
        let order = order();
        let link = provider.create_payment_link(&order).await.unwrap();

        assert!(link.url.starts_with("https://pay.example/cs_"));
        assert_eq!(link.metadata.payment_link, link.url);
        assert_eq!(link.metadata.order_id, order.id.to_string());
        assert_eq!(provider.session_for(order.id), Some(link));
    }

    #[tokio::test]
    async fn fail_on_create() {
        let provider = InMemoryPaymentLinkProvider::default().with_recording();
        provider.set_fail_on_create(true);
        let err = provider.create_payment_link(&order()).await.unwrap_err();
        assert!(matches!(err, SagaError::PaymentProvider(_)));
        assert!(provider.sessions().is_empty());
    }

    #[tokio::test]
    async fn links_are_only_kept_when_recording() {
        let provider = InMemoryPaymentLinkProvider::default();
        let order = order();
        provider.create_payment_link(&order).await.unwrap();
        provider.create_payment_link(&order).await.unwrap();

        assert!(provider.sessions().is_empty());
        assert_eq!(provider.session_for(order.id), None);
    }

    #[test]
    fn metadata_round_trips_into_paid_order() {
        let order = order();
        let metadata = CheckoutMetadata::for_order(&order, "https://pay.example/cs_1").unwrap();
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["orderID"], order.id.to_string());
        assert_eq!(json["paymentLink"], "https://pay.example/cs_1");

        let paid = metadata.into_paid_order().unwrap();
        assert_eq!(paid.id, order.id);
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.payment_link.as_deref(), Some("https://pay.example/cs_1"));
        assert_eq!(paid.items, order.items);
    }

    #[test]
    fn metadata_without_link_is_rejected() {
        let mut metadata = CheckoutMetadata::for_order(&order(), "x").unwrap();
        metadata.payment_link.clear();
        let err = metadata.into_paid_order().unwrap_err();
        assert!(err.to_string().contains("paymentLink"));
    }
}
