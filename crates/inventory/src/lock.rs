use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::ItemWithQuantity;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{InventoryError, Result};

/// Default time-to-live of an advisory lock.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5 * 60);

/// Builds the advisory lock key for a reservation batch.
///
/// Product ids are sorted so the same set of products always yields the
/// same key regardless of request order.
pub fn reservation_lock_key(items: &[ItemWithQuantity]) -> String {
    let mut ids: Vec<&str> = items.iter().map(|i| i.product_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    format!("stock:check_and_reserve:items:{}", ids.join(","))
}

/// Short-lived named lock shared between stock service instances.
///
/// Keeps duplicate submissions of the same batch from doing redundant work.
/// It is not what keeps stock from going negative; the strategies are.
#[async_trait]
pub trait AdvisoryLock: Send + Sync {
    /// Takes the lock, returning a token that must be presented on release.
    ///
    /// Fails with `LockUnavailable` if the key is already held.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Releases the lock if it is still held with the given token.
    async fn release(&self, key: &str, token: &str) -> Result<()>;
}

/// In-process advisory lock with expiring entries.
#[derive(Clone, Default)]
pub struct InMemoryAdvisoryLock {
    held: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl InMemoryAdvisoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .await
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > Instant::now())
    }
}

#[async_trait]
impl AdvisoryLock for InMemoryAdvisoryLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<String> {
        let mut held = self.held.lock().await;
        let now = Instant::now();

        if let Some((_, expires_at)) = held.get(key)
            && *expires_at > now
        {
            return Err(InventoryError::LockUnavailable {
                key: key.to_string(),
                reason: "already held".to_string(),
            });
        }

        let token = Uuid::new_v4().to_string();
        held.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(token)
    }

    async fn release(&self, key: &str, token: &str) -> Result<()> {
        let mut held = self.held.lock().await;
        if held.get(key).is_some_and(|(owner, _)| owner == token) {
            held.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_order_independent() {
        let a = reservation_lock_key(&[
            ItemWithQuantity::new("sku-2", 1),
            ItemWithQuantity::new("sku-1", 1),
        ]);
        let b = reservation_lock_key(&[
            ItemWithQuantity::new("sku-1", 4),
            ItemWithQuantity::new("sku-2", 1),
        ]);
        assert_eq!(a, b);
        assert_eq!(a, "stock:check_and_reserve:items:sku-1,sku-2");
    }

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let lock = InMemoryAdvisoryLock::new();
        let token = lock.acquire("k", DEFAULT_LOCK_TTL).await.unwrap();

        let err = lock.acquire("k", DEFAULT_LOCK_TTL).await.unwrap_err();
        assert!(matches!(err, InventoryError::LockUnavailable { .. }));

        lock.release("k", "someone-else").await.unwrap();
        assert!(lock.is_held("k").await);

        lock.release("k", &token).await.unwrap();
        assert!(!lock.is_held("k").await);
        assert!(lock.acquire("k", DEFAULT_LOCK_TTL).await.is_ok());
    }

    #[tokio::test]
    async fn expired_lock_can_be_taken_over() {
        let lock = InMemoryAdvisoryLock::new();
        lock.acquire("k", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(lock.acquire("k", DEFAULT_LOCK_TTL).await.is_ok());
    }
}
