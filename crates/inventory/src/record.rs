use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{ItemWithQuantity, ProductId, merge_items};
use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result, Shortfall};

/// A single inventory row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: ProductId,
    /// Never negative.
    pub quantity: i32,
    /// Bumped on every optimistic update.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    pub fn new(product_id: impl Into<ProductId>, quantity: i32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

/// A conditional decrement used by the optimistic strategy.
///
/// Applies only if the row is still at `expected_version` and holds at least
/// `quantity` units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedDecrement {
    pub product_id: ProductId,
    pub expected_version: i64,
    pub quantity: i32,
}

/// Compares requested quantities against the given records.
///
/// Duplicate lines are summed first. Products without a record count as zero
/// available. Fails with every shortfall at once so callers can report the
/// whole batch.
pub fn check_availability(records: &[StockRecord], requests: &[ItemWithQuantity]) -> Result<()> {
    let mut available: HashMap<&ProductId, i32> = HashMap::new();
    for record in records {
        let have = available.entry(&record.product_id).or_insert(0);
        *have = have.saturating_add(record.quantity);
    }

    let requests =
        merge_items(requests).map_err(|e| InventoryError::Validation(e.to_string()))?;
    let failed_on: Vec<Shortfall> = requests
        .into_iter()
        .filter_map(|req| {
            let have = available.get(&req.product_id).copied().unwrap_or(0);
            (req.quantity < 0 || req.quantity > have).then(|| Shortfall {
                product_id: req.product_id,
                requested: req.quantity,
                available: have,
            })
        })
        .collect();

    if failed_on.is_empty() {
        Ok(())
    } else {
        Err(InventoryError::InsufficientStock { failed_on })
    }
}
