//! Order aggregate, state machine and persistence.

mod aggregate;
mod memory;
mod postgres;
mod repository;
mod service;
mod state;
mod stock;

pub use aggregate::Order;
pub use memory::InMemoryOrderRepository;
pub use postgres::PostgresOrderRepository;
pub use repository::{OrderRepository, TransitionFn, ensure_forward, transition};
pub use service::OrderService;
pub use state::OrderStatus;
pub use stock::StockClient;

use common::{Code, ItemError, OrderId, StatusCode};
use thiserror::Error;

/// Business rule violations raised by the order aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Customer ID is required.
    #[error("Customer ID is required")]
    CustomerIdRequired,

    /// Order has no items.
    #[error("Order must have at least one item")]
    NoItems,

    /// A line item failed validation.
    #[error("Invalid item: {0}")]
    InvalidItem(#[from] ItemError),

    /// The requested status does not directly follow the current one.
    #[error("Invalid state transition: cannot transit from '{from}' to '{to}'")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The order has not been paid.
    #[error("Order {order_id} is not paid (status = {status})")]
    NotPaid {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// A payment link must be a non-empty URL.
    #[error("Cannot update empty payment link")]
    EmptyPaymentLink,

    /// A confirmation payload refers to a different order.
    #[error("Payment confirmation for order {got} applied to order {expected}")]
    OrderMismatch { expected: OrderId, got: OrderId },

    /// A confirmation names a payment link other than the one issued.
    #[error("Payment confirmation for order {order_id} does not match its payment link")]
    PaymentLinkMismatch { order_id: OrderId },
}

impl StatusCode for OrderError {
    fn code(&self) -> Code {
        match self {
            OrderError::CustomerIdRequired
            | OrderError::NoItems
            | OrderError::InvalidItem(_)
            | OrderError::EmptyPaymentLink
            | OrderError::OrderMismatch { .. } => Code::InvalidArgument,
            OrderError::InvalidTransition { .. }
            | OrderError::NotPaid { .. }
            | OrderError::PaymentLinkMismatch { .. } => Code::FailedPrecondition,
        }
    }
}
