//! Stable status codes for errors crossing a service boundary.
//!
//! Every error type returned over RPC or HTTP maps onto one of these codes,
//! mirroring the standard RPC status vocabulary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    /// Malformed or empty caller input.
    InvalidArgument,

    /// The addressed entity does not exist.
    NotFound,

    /// Business rejection: the system state does not allow the request.
    FailedPrecondition,

    /// Lost a concurrency race; the whole request may be retried.
    Aborted,

    /// A dependency (broker, database, peer, pricing) is unreachable.
    Unavailable,

    /// Unexpected fault.
    Internal,
}

impl Code {
    /// Returns true if the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Code::Aborted | Code::Unavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Code::InvalidArgument => "invalid_argument",
            Code::NotFound => "not_found",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::Unavailable => "unavailable",
            Code::Internal => "internal",
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Implemented by every error type that can be reported to a remote caller.
pub trait StatusCode {
    fn code(&self) -> Code;

    fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}
