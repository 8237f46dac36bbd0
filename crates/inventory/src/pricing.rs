use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{PriceReference, ProductId};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors raised by a pricing provider.
#[derive(Debug, Clone, Error)]
pub enum PricingError {
    #[error("no price configured for product {0}")]
    UnknownProduct(ProductId),

    #[error("pricing provider unavailable: {0}")]
    Unavailable(String),
}

/// External source of price references for products.
#[async_trait]
pub trait PricingProvider: Send + Sync {
    async fn get_price_reference(
        &self,
        product_id: &ProductId,
    ) -> std::result::Result<PriceReference, PricingError>;
}

/// In-memory pricing catalog.
///
/// Useful for tests and local runs; supports failure injection.
#[derive(Clone, Default)]
pub struct StaticPricingProvider {
    prices: Arc<RwLock<HashMap<ProductId, PriceReference>>>,
    fail_lookups: Arc<RwLock<bool>>,
}

impl StaticPricingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog from `(product, price reference)` pairs.
    pub async fn with_prices<I, P, R>(prices: I) -> Self
    where
        I: IntoIterator<Item = (P, R)>,
        P: Into<ProductId>,
        R: Into<PriceReference>,
    {
        let provider = Self::new();
        {
            let mut map = provider.prices.write().await;
            for (product_id, reference) in prices {
                map.insert(product_id.into(), reference.into());
            }
        }
        provider
    }

    pub async fn set_price(&self, product_id: impl Into<ProductId>, reference: impl Into<PriceReference>) {
        self.prices
            .write()
            .await
            .insert(product_id.into(), reference.into());
    }

    /// Makes every subsequent lookup fail as if the provider were down.
    pub async fn set_fail_lookups(&self, fail: bool) {
        *self.fail_lookups.write().await = fail;
    }
}

#[async_trait]
impl PricingProvider for StaticPricingProvider {
    async fn get_price_reference(
        &self,
        product_id: &ProductId,
    ) -> std::result::Result<PriceReference, PricingError> {
        if *self.fail_lookups.read().await {
            return Err(PricingError::Unavailable("simulated outage".to_string()));
        }

        self.prices
            .read()
            .await
            .get(product_id)
            .cloned()
            .ok_or_else(|| PricingError::UnknownProduct(product_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_configured_prices() {
        let provider = StaticPricingProvider::with_prices([("sku-1", "price_1")]).await;
        let reference = provider
            .get_price_reference(&ProductId::new("sku-1"))
            .await
            .unwrap();
        assert_eq!(reference.as_str(), "price_1");

        let err = provider
            .get_price_reference(&ProductId::new("sku-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::UnknownProduct(_)));
    }

    #[tokio::test]
    async fn failure_injection() {
        let provider = StaticPricingProvider::with_prices([("sku-1", "price_1")]).await;
        provider.set_fail_lookups(true).await;
        assert!(
            provider
                .get_price_reference(&ProductId::new("sku-1"))
                .await
                .is_err()
        );
    }
}
