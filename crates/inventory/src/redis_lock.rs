//! Redis-backed advisory lock.
//!
//! `SET key token NX PX ttl` takes the lock; a compare-and-delete script
//! releases it so an expired holder cannot drop someone else's lock.

use std::time::Duration;

use async_trait::async_trait;
use redis::{Client, Script, aio::ConnectionManager};
use tracing::{debug, info};

use crate::{InventoryError, Result, lock::AdvisoryLock};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Advisory lock shared by every stock service instance pointed at the same Redis.
#[derive(Clone)]
pub struct RedisAdvisoryLock {
    conn: ConnectionManager,
}

impl RedisAdvisoryLock {
    /// Connects to Redis at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| unavailable(url, e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| unavailable(url, e))?;

        info!(url = %url, "Connected to Redis for advisory locks");
        Ok(Self { conn })
    }
}

fn unavailable(key: &str, err: redis::RedisError) -> InventoryError {
    InventoryError::LockUnavailable {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl AdvisoryLock for RedisAdvisoryLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<String> {
        let token = uuid::Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable(key, e))?;

        match reply {
            Some(_) => {
                debug!(key = %key, "Acquired advisory lock");
                Ok(token)
            }
            None => Err(InventoryError::LockUnavailable {
                key: key.to_string(),
                reason: "already held".to_string(),
            }),
        }
    }

    async fn release(&self, key: &str, token: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| unavailable(key, e))?;

        debug!(key = %key, removed, "Released advisory lock");
        Ok(())
    }
}
