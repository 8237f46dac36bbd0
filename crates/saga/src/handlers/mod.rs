//! Message handlers of the saga participants.

mod kitchen;
mod order_paid;
mod payment;

pub use kitchen::KitchenHandler;
pub use order_paid::OrderPaidHandler;
pub use payment::OrderCreatedHandler;

use broker::{Envelope, HandlerError};
use domain::Order;

/// Decodes an order payload; a body that is not an order can never succeed.
fn decode_order(envelope: &Envelope) -> Result<Order, HandlerError> {
    envelope
        .decode::<Order>()
        .map_err(|e| HandlerError::permanent(format!("malformed order payload: {e}")))
}
