use std::sync::Arc;

use async_trait::async_trait;
use common::{Item, ItemWithQuantity, StatusCode};
use domain::{DomainError, StockClient};
use inventory::{InventoryStore, PricingProvider, StockService};

/// Calls a stock service living in the same process.
///
/// Inventory errors cross the boundary as `DomainError::Stock` with their
/// status code, the way an RPC status would.
pub struct LocalStockClient<S: InventoryStore, P: PricingProvider> {
    service: Arc<StockService<S, P>>,
}

impl<S: InventoryStore, P: PricingProvider> LocalStockClient<S, P> {
    pub fn new(service: Arc<StockService<S, P>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S, P> StockClient for LocalStockClient<S, P>
where
    S: InventoryStore + 'static,
    P: PricingProvider + 'static,
{
    async fn check_stock_and_reserve(
        &self,
        items: &[ItemWithQuantity],
    ) -> domain::Result<Vec<Item>> {
        self.service
            .check_stock_and_reserve(items)
            .await
            .map_err(|e| DomainError::Stock {
                code: e.code(),
                message: e.to_string(),
            })
    }
}
