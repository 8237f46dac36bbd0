//! Event bus for the order saga.
//!
//! Provides the message envelope and headers, W3C trace-context
//! propagation, the `MessageBus` trait with in-memory and AMQP backends,
//! the retry/dead-letter coordinator, and the consumer loop.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod bus;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod memory;
pub mod retry;
pub mod topology;
pub mod trace;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBus;
pub use bus::{Acker, Delivery, DeliveryStream, MessageBus, Subscription};
pub use consumer::{Consumer, Logged, MessageContext, MessageHandler, Metered, decorate};
pub use envelope::{Envelope, RoutingMode};
pub use error::{BusError, HandlerError, Result};
pub use headers::{HeaderValue, Headers};
pub use memory::{BusStats, InMemoryBus};
pub use retry::{RetryCoordinator, RetryOutcome, RetryPolicy};
