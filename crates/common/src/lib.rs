//! Shared types for the order fulfillment services.
//!
//! Every service (order, stock, payment, kitchen) speaks in terms of the
//! identifiers and line items defined here, so they live in the one crate
//! all of them depend on.

pub mod events;
pub mod items;
pub mod status;
pub mod types;

pub use items::{Item, ItemError, ItemWithQuantity, PriceReference, merge_items};
pub use status::{Code, StatusCode};
pub use types::{CustomerId, OrderId, ProductId};
