//! Event bus error types.

use common::{Code, StatusCode};
use thiserror::Error;

/// Errors that can occur when publishing or consuming messages.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A message could not be published.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A queue could not be declared, bound or consumed.
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// A delivery could not be acknowledged.
    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    /// The delivery stream ended.
    #[error("Delivery stream closed for queue {0}")]
    Closed(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StatusCode for BusError {
    fn code(&self) -> Code {
        match self {
            BusError::Serialization(_) => Code::InvalidArgument,
            BusError::Connection(_)
            | BusError::Publish(_)
            | BusError::Subscribe(_)
            | BusError::Ack(_)
            | BusError::Closed(_) => Code::Unavailable,
        }
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Failure reported by a message handler.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Retrying cannot help: the payload is malformed or the business state
    /// rejects it. The message is quarantined immediately.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// A downstream dependency failed; the message is retried with backoff.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl HandlerError {
    pub fn permanent(reason: impl ToString) -> Self {
        HandlerError::Permanent(reason.to_string())
    }

    pub fn transient(reason: impl ToString) -> Self {
        HandlerError::Transient(reason.to_string())
    }

    /// Classifies any status-coded error by its retryability.
    pub fn from_status<E: StatusCode + std::fmt::Display>(err: E) -> Self {
        if err.is_retryable() {
            HandlerError::Transient(err.to_string())
        } else {
            HandlerError::Permanent(err.to_string())
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_are_classified_by_retryability() {
        let transient = HandlerError::from_status(BusError::Publish("down".into()));
        assert!(!transient.is_permanent());

        let bad_json = serde_json::from_str::<u32>("nope").unwrap_err();
        let permanent = HandlerError::from_status(BusError::from(bad_json));
        assert!(permanent.is_permanent());
    }
}
