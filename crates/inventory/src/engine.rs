use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Item, ItemWithQuantity, ProductId, merge_items};

use crate::{
    InventoryError, Result,
    lock::{AdvisoryLock, DEFAULT_LOCK_TTL, reservation_lock_key},
    pricing::PricingProvider,
    record::check_availability,
    store::InventoryStore,
    strategy::{LockingStrategy, ReservationStrategy},
};

/// Tuning knobs for the reservation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy: LockingStrategy,
    pub optimistic_max_attempts: u32,
    pub advisory_lock_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: LockingStrategy::Pessimistic,
            optimistic_max_attempts: 3,
            advisory_lock_ttl: DEFAULT_LOCK_TTL,
        }
    }
}

/// Checks and reserves stock for a batch of line items.
///
/// A reservation either decrements every requested product or leaves all of
/// them untouched, and concurrent reservations never oversell.
pub struct ReservationEngine<S: InventoryStore, P: PricingProvider> {
    store: Arc<S>,
    pricing: Arc<P>,
    strategy: Arc<dyn ReservationStrategy>,
    advisory_lock: Option<Arc<dyn AdvisoryLock>>,
    config: EngineConfig,
}

impl<S, P> ReservationEngine<S, P>
where
    S: InventoryStore + 'static,
    P: PricingProvider,
{
    pub fn new(store: Arc<S>, pricing: Arc<P>, config: EngineConfig) -> Self {
        let strategy = config
            .strategy
            .build(store.clone(), config.optimistic_max_attempts);
        Self {
            store,
            pricing,
            strategy,
            advisory_lock: None,
            config,
        }
    }

    /// Adds an advisory lock taken around every reservation.
    pub fn with_advisory_lock(mut self, lock: Arc<dyn AdvisoryLock>) -> Self {
        self.advisory_lock = Some(lock);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Reserves every line of `items`, returning the priced items.
    ///
    /// Duplicate product lines are merged before the stock check.
    #[tracing::instrument(skip(self, items), fields(strategy = self.strategy.name(), lines = items.len()))]
    pub async fn reserve(&self, items: &[ItemWithQuantity]) -> Result<Vec<Item>> {
        let started = Instant::now();
        let result = self.reserve_inner(items).await;

        let outcome = match &result {
            Ok(_) => "reserved",
            Err(InventoryError::InsufficientStock { .. }) => "insufficient",
            Err(InventoryError::Contention { .. }) => "contention",
            Err(_) => "error",
        };
        metrics::counter!(
            "stock_reservations_total",
            "strategy" => self.strategy.name(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!(
            "stock_reservation_duration_seconds",
            "strategy" => self.strategy.name()
        )
        .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(priced) => tracing::info!(lines = priced.len(), "Stock reserved"),
            Err(e) => tracing::warn!(error = %e, outcome, "Stock reservation rejected"),
        }
        result
    }

    async fn reserve_inner(&self, items: &[ItemWithQuantity]) -> Result<Vec<Item>> {
        if items.is_empty() {
            return Err(InventoryError::Validation(
                "must have at least one item".to_string(),
            ));
        }
        for item in items {
            item.validate()
                .map_err(|e| InventoryError::Validation(e.to_string()))?;
        }
        let merged =
            merge_items(items).map_err(|e| InventoryError::Validation(e.to_string()))?;

        let Some(lock) = &self.advisory_lock else {
            return self.price_and_apply(&merged).await;
        };

        let key = reservation_lock_key(&merged);
        let token = lock.acquire(&key, self.config.advisory_lock_ttl).await?;
        let result = self.price_and_apply(&merged).await;
        if let Err(e) = lock.release(&key, &token).await {
            tracing::warn!(key = %key, error = %e, "Failed to release advisory lock");
        }
        result
    }

    async fn price_and_apply(&self, merged: &[ItemWithQuantity]) -> Result<Vec<Item>> {
        let priced = self.resolve_prices(merged).await?;

        // Fast rejection before touching locks or versions.
        let product_ids: Vec<ProductId> = merged.iter().map(|i| i.product_id.clone()).collect();
        let records = self.store.get_stock(&product_ids).await?;
        check_availability(&records, merged)?;

        self.strategy.apply(merged).await?;
        Ok(priced)
    }

    async fn resolve_prices(&self, merged: &[ItemWithQuantity]) -> Result<Vec<Item>> {
        let mut priced = Vec::with_capacity(merged.len());
        for line in merged {
            let price_reference = self
                .pricing
                .get_price_reference(&line.product_id)
                .await
                .map_err(|e| InventoryError::PricingLookup {
                    product_id: line.product_id.clone(),
                    reason: e.to_string(),
                })?;
            priced.push(Item::new(
                line.product_id.clone(),
                line.product_id.as_str(),
                line.quantity,
                price_reference,
            ));
        }
        Ok(priced)
    }
}
