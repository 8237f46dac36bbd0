//! Inventory store and stock reservation engine.
//!
//! The engine decrements stock for a batch of line items atomically and
//! never oversells under concurrent reservations, using either row locks
//! (pessimistic) or version-checked updates (optimistic).

pub mod engine;
pub mod error;
pub mod lock;
pub mod memory;
pub mod postgres;
pub mod pricing;
pub mod record;
#[cfg(feature = "redis")]
pub mod redis_lock;
pub mod service;
pub mod store;
pub mod strategy;

pub use engine::{EngineConfig, ReservationEngine};
pub use error::{InventoryError, Result, Shortfall};
pub use lock::{AdvisoryLock, DEFAULT_LOCK_TTL, InMemoryAdvisoryLock, reservation_lock_key};
pub use memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use pricing::{PricingError, PricingProvider, StaticPricingProvider};
pub use record::{StockRecord, VersionedDecrement, check_availability};
#[cfg(feature = "redis")]
pub use redis_lock::RedisAdvisoryLock;
pub use service::StockService;
pub use store::InventoryStore;
pub use strategy::{LockingStrategy, OptimisticStrategy, PessimisticStrategy, ReservationStrategy};
