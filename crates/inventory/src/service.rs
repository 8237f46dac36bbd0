use std::sync::Arc;

use common::{Item, ItemWithQuantity, ProductId};

use crate::{
    InventoryError, Result, engine::ReservationEngine, pricing::PricingProvider,
    store::InventoryStore,
};

/// The stock service's RPC surface.
pub struct StockService<S: InventoryStore, P: PricingProvider> {
    engine: Arc<ReservationEngine<S, P>>,
    pricing: Arc<P>,
}

impl<S, P> StockService<S, P>
where
    S: InventoryStore + 'static,
    P: PricingProvider,
{
    pub fn new(engine: Arc<ReservationEngine<S, P>>, pricing: Arc<P>) -> Self {
        Self { engine, pricing }
    }

    pub fn engine(&self) -> &Arc<ReservationEngine<S, P>> {
        &self.engine
    }

    /// Validates the requested lines and reserves them.
    ///
    /// Every line needs a product id and a strictly positive quantity.
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn check_stock_and_reserve(&self, items: &[ItemWithQuantity]) -> Result<Vec<Item>> {
        for item in items {
            if item.product_id.is_empty() {
                return Err(InventoryError::Validation(
                    "product id must not be empty".to_string(),
                ));
            }
            if item.quantity <= 0 {
                return Err(InventoryError::Validation(format!(
                    "quantity must be positive for product {}, got {}",
                    item.product_id, item.quantity
                )));
            }
        }
        self.engine.reserve(items).await
    }

    /// Resolves item details for the given products without reserving.
    ///
    /// Fails with `ProductsNotFound` listing every id without a stock record.
    #[tracing::instrument(skip(self))]
    pub async fn get_items(&self, product_ids: &[ProductId]) -> Result<Vec<Item>> {
        let records = self.engine.store().get_stock(product_ids).await?;

        let missing: Vec<ProductId> = product_ids
            .iter()
            .filter(|id| !records.iter().any(|r| &r.product_id == *id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(InventoryError::ProductsNotFound { missing });
        }

        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let price_reference = self
                .pricing
                .get_price_reference(&record.product_id)
                .await
                .map_err(|e| InventoryError::PricingLookup {
                    product_id: record.product_id.clone(),
                    reason: e.to_string(),
                })?;
            items.push(Item::new(
                record.product_id.clone(),
                record.product_id.as_str(),
                record.quantity,
                price_reference,
            ));
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::EngineConfig, memory::InMemoryInventoryStore, pricing::StaticPricingProvider,
    };

    async fn service() -> StockService<InMemoryInventoryStore, StaticPricingProvider> {
        let store = Arc::new(InMemoryInventoryStore::with_stock([("sku-1", 5), ("sku-2", 2)]).await);
        let pricing =
            Arc::new(StaticPricingProvider::with_prices([("sku-1", "p1"), ("sku-2", "p2")]).await);
        let engine = Arc::new(ReservationEngine::new(
            store,
            pricing.clone(),
            EngineConfig::default(),
        ));
        StockService::new(engine, pricing)
    }

    #[tokio::test]
    async fn zero_quantity_line_is_rejected() {
        let service = service().await;
        let err = service
            .check_stock_and_reserve(&[ItemWithQuantity::new("sku-1", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));
    }

    #[tokio::test]
    async fn reserve_decrements_stock() {
        let service = service().await;
        let items = service
            .check_stock_and_reserve(&[ItemWithQuantity::new("sku-1", 3)])
            .await
            .unwrap();
        assert_eq!(items[0].price_reference.as_str(), "p1");
        assert_eq!(
            service
                .engine()
                .store()
                .quantity(&ProductId::new("sku-1"))
                .await,
            Some(2)
        );
    }

    #[tokio::test]
    async fn get_items_reports_unknown_products() {
        let service = service().await;
        let err = service
            .get_items(&[ProductId::new("sku-1"), ProductId::new("ghost")])
            .await
            .unwrap_err();
        match err {
            InventoryError::ProductsNotFound { missing } => {
                assert_eq!(missing, vec![ProductId::new("ghost")]);
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_items_does_not_reserve() {
        let service = service().await;
        let items = service.get_items(&[ProductId::new("sku-2")]).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 2);
        assert_eq!(
            service
                .engine()
                .store()
                .quantity(&ProductId::new("sku-2"))
                .await,
            Some(2)
        );
    }
}
