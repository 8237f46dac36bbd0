use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::{Result, envelope::Envelope};

/// Where a consumer reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    /// The durable queue fed by the direct exchange of the same name.
    Direct(String),
    /// A private, auto-deleted queue bound to a fanout exchange.
    Fanout(String),
    /// A named durable queue bound to a fanout exchange. Consumers sharing
    /// the queue compete for each broadcast copy.
    Shared { exchange: String, queue: String },
    /// An existing durable queue, such as the dead-letter queue.
    Queue(String),
}

impl Subscription {
    pub fn name(&self) -> &str {
        match self {
            Subscription::Direct(name) | Subscription::Fanout(name) | Subscription::Queue(name) => {
                name
            }
            Subscription::Shared { queue, .. } => queue,
        }
    }
}

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A received message awaiting acknowledgement.
pub struct Delivery {
    pub envelope: Envelope,
    /// Queue the message was read from.
    pub queue: String,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(envelope: Envelope, queue: impl Into<String>, acker: Box<dyn Acker>) -> Self {
        Self {
            envelope,
            queue: queue.into(),
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    /// Rejects the delivery; with `requeue` false the broker drops it.
    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}

/// Lazy, unbounded sequence of deliveries.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Publish/consume primitives over a message broker.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a message.
    ///
    /// Direct messages declare and bind their destination queue first.
    /// Messages are persistent.
    async fn publish(&self, envelope: Envelope) -> Result<()>;

    /// Starts consuming from `subscription`.
    ///
    /// Every delivery must be acked or nacked; unsettled deliveries are
    /// redelivered by the broker after the consumer goes away.
    async fn consume(&self, subscription: Subscription) -> Result<DeliveryStream>;
}
