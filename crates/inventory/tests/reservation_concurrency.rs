//! Concurrency properties of the reservation engine.
//!
//! Every test runs against both locking strategies on a multi-threaded
//! runtime so reservations genuinely interleave.

use std::sync::Arc;
use std::time::Duration;

use common::{ItemWithQuantity, ProductId};
use inventory::{
    EngineConfig, InMemoryInventoryStore, InventoryError, LockingStrategy, ReservationEngine,
    StaticPricingProvider,
};

const STRATEGIES: [LockingStrategy; 2] = [LockingStrategy::Pessimistic, LockingStrategy::Optimistic];

async fn engine_with(
    store: InMemoryInventoryStore,
    products: &[&str],
    strategy: LockingStrategy,
    optimistic_max_attempts: u32,
) -> Arc<ReservationEngine<InMemoryInventoryStore, StaticPricingProvider>> {
    let pricing =
        StaticPricingProvider::with_prices(products.iter().map(|p| (*p, format!("price_{p}"))))
            .await;
    Arc::new(ReservationEngine::new(
        Arc::new(store),
        Arc::new(pricing),
        EngineConfig {
            strategy,
            optimistic_max_attempts,
            ..EngineConfig::default()
        },
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_oversell() {
    for strategy in STRATEGIES {
        let initial = 10;
        let store = InMemoryInventoryStore::with_stock([("sku-1", initial)])
            .await
            .with_write_latency(Duration::from_millis(2));
        // Enough attempts that optimistic losers eventually observe the shortfall.
        let engine = engine_with(store, &["sku-1"], strategy, 64).await;

        let mut handles = Vec::new();
        for i in 0..25 {
            let engine = engine.clone();
            let quantity = 1 + (i % 3);
            handles.push(tokio::spawn(async move {
                engine
                    .reserve(&[ItemWithQuantity::new("sku-1", quantity)])
                    .await
                    .map(|_| quantity)
            }));
        }

        let mut reserved = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(quantity) => reserved += quantity,
                Err(InventoryError::InsufficientStock { .. } | InventoryError::Contention { .. }) => {}
                Err(other) => panic!("unexpected error under {strategy}: {other}"),
            }
        }

        let remaining = engine
            .store()
            .quantity(&ProductId::new("sku-1"))
            .await
            .unwrap();
        assert!(reserved <= initial, "{strategy}: reserved {reserved} of {initial}");
        assert_eq!(remaining, initial - reserved, "{strategy}");
        assert!(remaining >= 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_of_two_racing_reservations_is_rejected() {
    for strategy in STRATEGIES {
        let store = InMemoryInventoryStore::with_stock([("sku-1", 5)])
            .await
            .with_write_latency(Duration::from_millis(20));
        let engine = engine_with(store, &["sku-1"], strategy, 8).await;

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.reserve(&[ItemWithQuantity::new("sku-1", 3)]).await })
        };
        let second = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.reserve(&[ItemWithQuantity::new("sku-1", 3)]).await })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let shortfalls = results
            .iter()
            .filter(|r| matches!(r, Err(InventoryError::InsufficientStock { .. })))
            .count();

        assert_eq!(successes, 1, "{strategy}");
        assert_eq!(shortfalls, 1, "{strategy}");
        assert_eq!(
            engine.store().quantity(&ProductId::new("sku-1")).await,
            Some(2),
            "{strategy}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_batch_leaves_every_product_untouched() {
    for strategy in STRATEGIES {
        let store = InMemoryInventoryStore::with_stock([("sku-1", 5), ("sku-2", 1)]).await;
        let engine = engine_with(store, &["sku-1", "sku-2"], strategy, 3).await;

        let err = engine
            .reserve(&[
                ItemWithQuantity::new("sku-1", 2),
                ItemWithQuantity::new("sku-2", 2),
            ])
            .await
            .unwrap_err();

        match err {
            InventoryError::InsufficientStock { failed_on } => {
                assert_eq!(failed_on.len(), 1);
                assert_eq!(failed_on[0].product_id, ProductId::new("sku-2"));
            }
            other => panic!("expected insufficient stock, got {other}"),
        }
        assert_eq!(engine.store().quantity(&ProductId::new("sku-1")).await, Some(5));
        assert_eq!(engine.store().quantity(&ProductId::new("sku-2")).await, Some(1));
    }
}

#[tokio::test]
async fn split_lines_behave_like_a_single_line() {
    for strategy in STRATEGIES {
        let split = {
            let store = InMemoryInventoryStore::with_stock([("sku-1", 10)]).await;
            let engine = engine_with(store, &["sku-1"], strategy, 3).await;
            let items = engine
                .reserve(&[
                    ItemWithQuantity::new("sku-1", 3),
                    ItemWithQuantity::new("sku-1", 4),
                ])
                .await
                .unwrap();
            (items, engine.store().quantity(&ProductId::new("sku-1")).await)
        };
        let single = {
            let store = InMemoryInventoryStore::with_stock([("sku-1", 10)]).await;
            let engine = engine_with(store, &["sku-1"], strategy, 3).await;
            let items = engine
                .reserve(&[ItemWithQuantity::new("sku-1", 7)])
                .await
                .unwrap();
            (items, engine.store().quantity(&ProductId::new("sku-1")).await)
        };

        assert_eq!(split, single, "{strategy}");
        assert_eq!(split.1, Some(3));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_multi_product_batches_do_not_deadlock() {
    let store = InMemoryInventoryStore::with_stock([("sku-a", 100), ("sku-b", 100)])
        .await
        .with_write_latency(Duration::from_millis(1));
    let engine = engine_with(store, &["sku-a", "sku-b"], LockingStrategy::Pessimistic, 3).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        // Alternate line order; row locks are still taken in id order.
        let batch = if i % 2 == 0 {
            vec![ItemWithQuantity::new("sku-a", 1), ItemWithQuantity::new("sku-b", 1)]
        } else {
            vec![ItemWithQuantity::new("sku-b", 1), ItemWithQuantity::new("sku-a", 1)]
        };
        handles.push(tokio::spawn(async move { engine.reserve(&batch).await }));
    }

    let all = tokio::time::timeout(Duration::from_secs(10), async {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    })
    .await;
    assert!(all.is_ok(), "reservations deadlocked");

    assert_eq!(engine.store().quantity(&ProductId::new("sku-a")).await, Some(80));
    assert_eq!(engine.store().quantity(&ProductId::new("sku-b")).await, Some(80));
}

#[tokio::test]
async fn duplicate_lines_summing_past_i32_are_rejected() {
    for strategy in STRATEGIES {
        let store = InMemoryInventoryStore::with_stock([("sku-1", 5)]).await;
        let engine = engine_with(store, &["sku-1"], strategy, 3).await;

        let err = engine
            .reserve(&[
                ItemWithQuantity::new("sku-1", i32::MAX),
                ItemWithQuantity::new("sku-1", i32::MAX),
            ])
            .await
            .unwrap_err();

        assert!(
            matches!(err, InventoryError::Validation(_)),
            "{strategy}: {err}"
        );
        let remaining = engine.store().quantity(&ProductId::new("sku-1")).await;
        assert_eq!(remaining, Some(5), "{strategy}");
    }
}
