//! Domain layer for the order fulfillment system.
//!
//! This crate provides:
//! - the `Order` aggregate and its `pending → waiting_for_payment → paid → ready` state machine
//! - the `OrderRepository` trait with in-memory and PostgreSQL implementations
//! - the `OrderService` behind `CreateOrder`, `GetOrder` and `UpdateOrder`

pub mod error;
pub mod order;

pub use error::{DomainError, Result};
pub use order::{
    InMemoryOrderRepository, Order, OrderError, OrderRepository, OrderService, OrderStatus,
    PostgresOrderRepository, StockClient, TransitionFn, ensure_forward, transition,
};
