//! Collaborators the participants call: peer RPC clients and the payment
//! link provider, each a trait with an in-process implementation.

pub mod order;
pub mod payment;
pub mod stock;

pub use order::{LocalOrderClient, OrderClient};
pub use payment::{CheckoutMetadata, InMemoryPaymentLinkProvider, PaymentLink, PaymentLinkProvider};
pub use stock::LocalStockClient;
