//! Saga error types.

use broker::BusError;
use common::{Code, StatusCode};
use domain::DomainError;
use thiserror::Error;

/// Errors that can occur in a saga participant.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The payment link provider failed.
    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    /// A webhook notification is malformed or incomplete.
    #[error("Invalid webhook: {0}")]
    InvalidWebhook(String),

    /// A webhook notification is not signed by the payment provider.
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// Order service error.
    #[error("Order service error: {0}")]
    Domain(#[from] DomainError),

    /// Event bus error.
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StatusCode for SagaError {
    fn code(&self) -> Code {
        match self {
            SagaError::PaymentProvider(_) => Code::Unavailable,
            SagaError::InvalidWebhook(_)
            | SagaError::InvalidSignature(_)
            | SagaError::Serialization(_) => Code::InvalidArgument,
            SagaError::Domain(e) => e.code(),
            SagaError::Bus(e) => e.code(),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
