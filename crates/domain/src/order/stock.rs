use async_trait::async_trait;
use common::{Item, ItemWithQuantity};

use crate::error::Result;

/// The stock service as seen from the order service.
///
/// Failures come back as `DomainError::Stock` carrying the stock service's
/// status code, so retryability survives the hop.
#[async_trait]
pub trait StockClient: Send + Sync {
    /// Reserves the (already merged) lines and returns the priced items.
    async fn check_stock_and_reserve(&self, items: &[ItemWithQuantity]) -> Result<Vec<Item>>;
}
