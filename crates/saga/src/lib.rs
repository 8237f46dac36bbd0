//! Choreography participants of the order fulfillment saga.
//!
//! There is no orchestrator. Each service reacts to the events it consumes:
//! 1. Payment consumes `order.created`, creates a payment link and moves the
//!    order to `waiting_for_payment`
//! 2. The payment webhook broadcasts `order.paid` once checkout is paid
//! 3. Order consumes `order.paid` and moves the order to `paid`
//! 4. Kitchen consumes `order.paid`, cooks, and moves the order to `ready`
//!
//! Failures are retried and dead-lettered by the broker's retry coordinator.

pub mod error;
pub mod handlers;
pub mod participants;
pub mod services;
pub mod signature;
pub mod webhook;

pub use error::{Result, SagaError};
pub use handlers::{KitchenHandler, OrderCreatedHandler, OrderPaidHandler};
pub use participants::{SagaHandlers, spawn_consumers};
pub use services::{
    CheckoutMetadata, InMemoryPaymentLinkProvider, LocalOrderClient, LocalStockClient,
    OrderClient, PaymentLink, PaymentLinkProvider,
};
pub use signature::{SIGNATURE_HEADER, WebhookVerifier};
pub use webhook::{PaymentWebhook, WebhookEvent, WebhookOutcome};
