//! Order state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► WaitingForPayment ──► Paid ──► Ready
/// ```
///
/// Transitions are one-directional; no state is ever revisited.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Stock reserved, order persisted.
    #[default]
    Pending,

    /// A payment link was generated for the customer.
    WaitingForPayment,

    /// The payment provider confirmed the payment.
    Paid,

    /// The kitchen finished preparing the order (terminal state).
    Ready,
}

impl OrderStatus {
    /// The only status reachable from this one, if any.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::WaitingForPayment),
            OrderStatus::WaitingForPayment => Some(OrderStatus::Paid),
            OrderStatus::Paid => Some(OrderStatus::Ready),
            OrderStatus::Ready => None,
        }
    }

    /// Returns true if `to` directly follows this status.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        self.next() == Some(to)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::WaitingForPayment => "waiting_for_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Ready => "ready",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "waiting_for_payment" => Ok(OrderStatus::WaitingForPayment),
            "paid" => Ok(OrderStatus::Paid),
            "ready" => Ok(OrderStatus::Ready),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}
