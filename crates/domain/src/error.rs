//! Domain error types.

use broker::BusError;
use common::{Code, OrderId, StatusCode};
use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A business rule of the order aggregate was violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// No order with this ID belongs to the customer.
    #[error("Order not found: {order_id}")]
    NotFound { order_id: OrderId },

    /// The stock service rejected or failed the reservation.
    #[error("Stock service error ({code}): {message}")]
    Stock { code: Code, message: String },

    /// The `order.created` event could not be published.
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The order store is unavailable or returned unreadable data.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StatusCode for DomainError {
    fn code(&self) -> Code {
        match self {
            DomainError::Order(e) => e.code(),
            DomainError::NotFound { .. } => Code::NotFound,
            DomainError::Stock { code, .. } => *code,
            DomainError::Bus(e) => e.code(),
            DomainError::Database(_) | DomainError::Storage(_) => Code::Unavailable,
            DomainError::Serialization(_) => Code::Internal,
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
