//! Stock reservation strategies.
//!
//! Both strategies guarantee that concurrent reservations never drive a
//! quantity below zero and that a batch is applied completely or not at all.
//! They differ in how contention is handled: the pessimistic strategy waits
//! on row locks, the optimistic one retries compare-and-swap updates.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use common::{ItemWithQuantity, ProductId};

use crate::{
    InventoryError, Result, VersionedDecrement, record::check_availability, store::InventoryStore,
};

/// Applies a validated, merged reservation batch to the store.
#[async_trait]
pub trait ReservationStrategy: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    async fn apply(&self, items: &[ItemWithQuantity]) -> Result<()>;
}

/// Locks the targeted rows, rechecks availability, decrements.
pub struct PessimisticStrategy<S: InventoryStore> {
    store: Arc<S>,
}

impl<S: InventoryStore> PessimisticStrategy<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: InventoryStore + 'static> ReservationStrategy for PessimisticStrategy<S> {
    fn name(&self) -> &'static str {
        "pessimistic"
    }

    #[tracing::instrument(skip(self, items), fields(strategy = "pessimistic"))]
    async fn apply(&self, items: &[ItemWithQuantity]) -> Result<()> {
        self.store.decrement_locked(items).await
    }
}

/// Reads versions, checks availability, then applies version-guarded
/// decrements. Lost races are retried up to `max_attempts` times.
pub struct OptimisticStrategy<S: InventoryStore> {
    store: Arc<S>,
    max_attempts: u32,
}

impl<S: InventoryStore> OptimisticStrategy<S> {
    pub fn new(store: Arc<S>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl<S: InventoryStore + 'static> ReservationStrategy for OptimisticStrategy<S> {
    fn name(&self) -> &'static str {
        "optimistic"
    }

    #[tracing::instrument(skip(self, items), fields(strategy = "optimistic"))]
    async fn apply(&self, items: &[ItemWithQuantity]) -> Result<()> {
        let product_ids: Vec<ProductId> = items.iter().map(|i| i.product_id.clone()).collect();

        for attempt in 1..=self.max_attempts {
            let records = self.store.get_stock(&product_ids).await?;
            check_availability(&records, items)?;

            let updates: Vec<VersionedDecrement> = items
                .iter()
                .filter_map(|item| {
                    records
                        .iter()
                        .find(|r| r.product_id == item.product_id)
                        .map(|r| VersionedDecrement {
                            product_id: item.product_id.clone(),
                            expected_version: r.version,
                            quantity: item.quantity,
                        })
                })
                .collect();

            match self.store.decrement_versioned(&updates).await {
                Ok(()) => return Ok(()),
                Err(InventoryError::VersionConflict { product_id, .. }) => {
                    tracing::debug!(attempt, %product_id, "Optimistic reservation lost a race");
                    metrics::counter!("stock_version_conflicts_total").increment(1);
                }
                Err(e) => return Err(e),
            }
        }

        Err(InventoryError::Contention {
            attempts: self.max_attempts,
        })
    }
}

/// Which strategy the engine uses, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockingStrategy {
    #[default]
    Pessimistic,
    Optimistic,
}

impl LockingStrategy {
    /// Builds the strategy object over the given store.
    pub fn build<S: InventoryStore + 'static>(
        self,
        store: Arc<S>,
        optimistic_max_attempts: u32,
    ) -> Arc<dyn ReservationStrategy> {
        match self {
            LockingStrategy::Pessimistic => Arc::new(PessimisticStrategy::new(store)),
            LockingStrategy::Optimistic => {
                Arc::new(OptimisticStrategy::new(store, optimistic_max_attempts))
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockingStrategy::Pessimistic => "pessimistic",
            LockingStrategy::Optimistic => "optimistic",
        }
    }
}

impl FromStr for LockingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pessimistic" => Ok(LockingStrategy::Pessimistic),
            "optimistic" => Ok(LockingStrategy::Optimistic),
            other => Err(format!("unknown locking strategy: {other}")),
        }
    }
}

impl std::fmt::Display for LockingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
