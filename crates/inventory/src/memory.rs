use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{ItemWithQuantity, ProductId, merge_items};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    InventoryError, Result, StockRecord, VersionedDecrement, record::check_availability,
    store::InventoryStore,
};

/// In-memory inventory store for testing and single-process deployments.
///
/// Each row sits behind its own mutex so that, like `SELECT ... FOR UPDATE`,
/// only callers touching overlapping products contend. Row locks are always
/// taken in product-id order.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    rows: Arc<RwLock<HashMap<ProductId, Arc<Mutex<StockRecord>>>>>,
    write_latency: Option<Duration>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `(product, quantity)` rows.
    pub async fn with_stock<I, P>(stock: I) -> Self
    where
        I: IntoIterator<Item = (P, i32)>,
        P: Into<ProductId>,
    {
        let store = Self::new();
        {
            let mut rows = store.rows.write().await;
            for (product_id, quantity) in stock {
                let product_id = product_id.into();
                rows.insert(
                    product_id.clone(),
                    Arc::new(Mutex::new(StockRecord::new(product_id, quantity))),
                );
            }
        }
        store
    }

    /// Simulates write latency: the pessimistic path sleeps while holding its
    /// row locks and the optimistic path sleeps before validating versions.
    /// Widens race windows in concurrency tests.
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = Some(latency);
        self
    }

    /// Returns the current quantity of a product, if it exists.
    pub async fn quantity(&self, product_id: &ProductId) -> Option<i32> {
        let row = self.rows.read().await.get(product_id).cloned()?;
        let record = row.lock().await;
        Some(record.quantity)
    }

    /// Returns the full record of a product, if it exists.
    pub async fn record(&self, product_id: &ProductId) -> Option<StockRecord> {
        let row = self.rows.read().await.get(product_id).cloned()?;
        let record = row.lock().await;
        Some(record.clone())
    }

    /// Locks the rows for the given products in product-id order.
    ///
    /// Missing products are skipped.
    async fn lock_rows<'a, I>(&self, product_ids: I) -> Vec<OwnedMutexGuard<StockRecord>>
    where
        I: IntoIterator<Item = &'a ProductId>,
    {
        let ordered: BTreeSet<&ProductId> = product_ids.into_iter().collect();
        let handles: Vec<Arc<Mutex<StockRecord>>> = {
            let rows = self.rows.read().await;
            ordered
                .into_iter()
                .filter_map(|id| rows.get(id).cloned())
                .collect()
        };

        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        guards
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn get_stock(&self, product_ids: &[ProductId]) -> Result<Vec<StockRecord>> {
        let handles: Vec<Arc<Mutex<StockRecord>>> = {
            let rows = self.rows.read().await;
            product_ids
                .iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .filter_map(|id| rows.get(id).cloned())
                .collect()
        };

        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            records.push(handle.lock().await.clone());
        }
        Ok(records)
    }

    async fn decrement_locked(&self, requests: &[ItemWithQuantity]) -> Result<()> {
        let mut guards = self.lock_rows(requests.iter().map(|r| &r.product_id)).await;

        if let Some(latency) = self.write_latency {
            tokio::time::sleep(latency).await;
        }

        let snapshot: Vec<StockRecord> = guards.iter().map(|g| (**g).clone()).collect();
        check_availability(&snapshot, requests)?;

        let merged =
            merge_items(requests).map_err(|e| InventoryError::Validation(e.to_string()))?;
        let now = Utc::now();
        for guard in guards.iter_mut() {
            let Some(line) = merged.iter().find(|r| r.product_id == guard.product_id) else {
                continue;
            };
            // check_availability bounds every merged line by the row's quantity
            guard.quantity -= line.quantity;
            guard.updated_at = now;
        }
        Ok(())
    }

    async fn decrement_versioned(&self, updates: &[VersionedDecrement]) -> Result<()> {
        if let Some(latency) = self.write_latency {
            tokio::time::sleep(latency).await;
        }

        let mut guards = self.lock_rows(updates.iter().map(|u| &u.product_id)).await;

        for update in updates {
            let matched = guards.iter().any(|g| {
                g.product_id == update.product_id
                    && g.version == update.expected_version
                    && (0..=g.quantity).contains(&update.quantity)
            });
            if !matched {
                return Err(InventoryError::VersionConflict {
                    product_id: update.product_id.clone(),
                    expected_version: update.expected_version,
                });
            }
        }

        let now = Utc::now();
        for update in updates {
            if let Some(guard) = guards
                .iter_mut()
                .find(|g| g.product_id == update.product_id)
            {
                guard.quantity -= update.quantity;
                guard.version += 1;
                guard.updated_at = now;
            }
        }
        Ok(())
    }

    async fn provision(&self, product_id: &ProductId, quantity: i32) -> Result<StockRecord> {
        if quantity < 0 {
            return Err(InventoryError::Validation(format!(
                "cannot provision negative quantity {quantity} for {product_id}"
            )));
        }

        let existing = self.rows.read().await.get(product_id).cloned();
        match existing {
            Some(row) => {
                let mut record = row.lock().await;
                record.quantity = quantity;
                record.version += 1;
                record.updated_at = Utc::now();
                Ok(record.clone())
            }
            None => {
                let mut rows = self.rows.write().await;
                let row = rows.entry(product_id.clone()).or_insert_with(|| {
                    Arc::new(Mutex::new(StockRecord::new(product_id.clone(), quantity)))
                });
                let record = row.lock().await;
                Ok(record.clone())
            }
        }
    }
}
