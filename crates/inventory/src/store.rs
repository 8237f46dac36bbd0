use async_trait::async_trait;
use common::{ItemWithQuantity, ProductId};

use crate::{Result, StockRecord, VersionedDecrement};

/// Durable per-product stock table.
///
/// Stock rows are mutated only through the two decrement operations below,
/// each of which is all-or-nothing across its batch. All implementations
/// must be thread-safe (Send + Sync).
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Reads the stock records for the given products in one batch.
    ///
    /// Products without a record are simply absent from the result.
    async fn get_stock(&self, product_ids: &[ProductId]) -> Result<Vec<StockRecord>>;

    /// Decrements every requested line under exclusive row locks.
    ///
    /// The targeted rows are locked, availability is recomputed under the
    /// lock, and either every line is applied or none is. Fails with
    /// `InsufficientStock` when a line no longer fits. Versions are left
    /// untouched.
    async fn decrement_locked(&self, requests: &[ItemWithQuantity]) -> Result<()>;

    /// Applies conditional decrements atomically.
    ///
    /// Each row must still be at its expected version and hold enough
    /// stock; otherwise nothing is applied and `VersionConflict` is returned.
    /// Every applied row has its version incremented.
    async fn decrement_versioned(&self, updates: &[VersionedDecrement]) -> Result<()>;

    /// Sets the quantity of a product, creating the record if needed.
    async fn provision(&self, product_id: &ProductId, quantity: i32) -> Result<StockRecord>;
}
