use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use uuid::Uuid;

use crate::{
    BusError, Result,
    bus::{Acker, Delivery, DeliveryStream, MessageBus, Subscription},
    envelope::{Envelope, RoutingMode},
    topology, trace,
};

struct QueueState {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Envelope>>>,
}

impl QueueState {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
        }
    }
}

#[derive(Default)]
struct Broker {
    queues: HashMap<String, QueueState>,
    /// (exchange, routing key, queue)
    bindings: Vec<(String, String, String)>,
    fanout_exchanges: Vec<String>,
    /// `None` unless the bus was built with `recording`.
    published: Option<Vec<Envelope>>,
}

impl Broker {
    fn declare_queue(&mut self, name: &str) {
        self.queues
            .entry(name.to_string())
            .or_insert_with(QueueState::new);
    }

    fn bind(&mut self, queue: &str, exchange: &str, routing_key: &str) {
        let binding = (
            exchange.to_string(),
            routing_key.to_string(),
            queue.to_string(),
        );
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
    }

    fn delete_queue(&mut self, name: &str) {
        self.queues.remove(name);
        self.bindings.retain(|(_, _, queue)| queue != name);
    }

    fn targets(&self, envelope: &Envelope) -> Vec<String> {
        if envelope.exchange.is_empty() {
            return vec![envelope.routing_key.clone()];
        }
        let fanout = self.fanout_exchanges.contains(&envelope.exchange);
        self.bindings
            .iter()
            .filter(|(exchange, key, _)| {
                exchange == &envelope.exchange && (fanout || key == &envelope.routing_key)
            })
            .map(|(_, _, queue)| queue.clone())
            .collect()
    }
}

fn lock_broker(broker: &Mutex<Broker>) -> std::sync::MutexGuard<'_, Broker> {
    // A poisoned lock only means another test thread panicked mid-update.
    broker
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Deletes a consumer's private queue and its binding when the consumer's
/// stream is dropped, as an auto-delete queue would be.
struct PrivateQueue {
    broker: Arc<Mutex<Broker>>,
    queue: String,
}

impl Drop for PrivateQueue {
    fn drop(&mut self) {
        lock_broker(&self.broker).delete_queue(&self.queue);
    }
}

/// Counters of how deliveries were settled.
#[derive(Debug, Default)]
pub struct BusStats {
    acked: AtomicU64,
    nacked: AtomicU64,
}

impl BusStats {
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn nacked(&self) -> u64 {
        self.nacked.load(Ordering::SeqCst)
    }
}

/// In-process message bus with broker-like routing.
///
/// Models direct, fanout and default-exchange routing, per-queue
/// competing consumers, and ack/nack with optional requeue. Suitable for
/// tests and single-process deployments.
#[derive(Clone)]
pub struct InMemoryBus {
    broker: Arc<Mutex<Broker>>,
    stats: Arc<BusStats>,
    fail_on_publish: Arc<AtomicBool>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// Creates a bus with the shared exchanges and dead-letter queues declared.
    pub fn new() -> Self {
        let mut broker = Broker::default();
        for exchange in topology::EXCHANGES {
            if exchange.kind == RoutingMode::Fanout {
                broker.fanout_exchanges.push(exchange.name.to_string());
            }
        }
        for queue in topology::QUEUES {
            broker.declare_queue(queue);
        }
        for binding in topology::BINDINGS {
            broker.bind(binding.queue, binding.exchange, binding.routing_key);
        }

        Self {
            broker: Arc::new(Mutex::new(broker)),
            stats: Arc::new(BusStats::default()),
            fail_on_publish: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a bus that also keeps a copy of every published message,
    /// readable through `published`.
    pub fn recording() -> Self {
        let bus = Self::new();
        bus.lock().published = Some(Vec::new());
        bus
    }

    /// Makes every subsequent publish fail as if the broker were down.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    /// Every message successfully published so far, in order. Always empty
    /// unless the bus was built with `recording`.
    pub fn published(&self) -> Vec<Envelope> {
        self.lock().published.clone().unwrap_or_default()
    }

    /// Removes and returns the messages waiting in `queue`.
    ///
    /// Only meaningful for queues without an active consumer.
    pub async fn drain(&self, queue: &str) -> Vec<Envelope> {
        let rx = match self.lock().queues.get(queue) {
            Some(state) => state.rx.clone(),
            None => return Vec::new(),
        };
        let mut rx = rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            drained.push(envelope);
        }
        drained
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Broker> {
        lock_broker(&self.broker)
    }
}

struct InMemoryAcker {
    envelope: Envelope,
    queue_tx: mpsc::UnboundedSender<Envelope>,
    stats: Arc<BusStats>,
    settled: AtomicBool,
}

impl InMemoryAcker {
    fn settle(&self) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BusError::Ack("delivery already settled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Acker for InMemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settle()?;
        self.stats.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.settle()?;
        self.stats.nacked.fetch_add(1, Ordering::SeqCst);
        if requeue {
            self.queue_tx
                .send(self.envelope.clone())
                .map_err(|_| BusError::Ack("queue deleted".to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, mut envelope: Envelope) -> Result<()> {
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BusError::Publish("simulated broker outage".to_string()));
        }
        trace::inject_current(&mut envelope.headers);

        let mut broker = self.lock();
        if envelope.routing == RoutingMode::Direct && !envelope.exchange.is_empty() {
            broker.declare_queue(&envelope.routing_key);
            broker.bind(&envelope.routing_key, &envelope.exchange, &envelope.routing_key);
        }

        let targets = broker.targets(&envelope);
        if targets.is_empty() {
            tracing::debug!(
                exchange = %envelope.exchange,
                routing_key = %envelope.routing_key,
                "Message unroutable, dropped"
            );
        }
        for queue in targets {
            if let Some(state) = broker.queues.get(&queue) {
                let _ = state.tx.send(envelope.clone());
            }
        }
        metrics::counter!("bus_published_total", "mode" => envelope.routing.as_str()).increment(1);
        if let Some(published) = broker.published.as_mut() {
            published.push(envelope);
        }
        Ok(())
    }

    async fn consume(&self, subscription: Subscription) -> Result<DeliveryStream> {
        let (queue, rx, tx, private) = {
            let mut broker = self.lock();
            let queue = match &subscription {
                Subscription::Direct(name) => {
                    broker.declare_queue(name);
                    broker.bind(name, name, name);
                    name.clone()
                }
                Subscription::Fanout(exchange) => {
                    let queue = format!("amq.gen-{}", Uuid::new_v4().simple());
                    broker.declare_queue(&queue);
                    broker.bind(&queue, exchange, "");
                    queue
                }
                Subscription::Shared { exchange, queue } => {
                    broker.declare_queue(queue);
                    broker.bind(queue, exchange, "");
                    queue.clone()
                }
                Subscription::Queue(name) => {
                    broker.declare_queue(name);
                    name.clone()
                }
            };
            let state = broker
                .queues
                .get(&queue)
                .ok_or_else(|| BusError::Subscribe(format!("queue {queue} vanished")))?;
            let private = matches!(subscription, Subscription::Fanout(_)).then(|| PrivateQueue {
                broker: self.broker.clone(),
                queue: queue.clone(),
            });
            (queue, state.rx.clone(), state.tx.clone(), private)
        };

        let stats = self.stats.clone();
        let stream = futures_util::stream::unfold((rx, private), move |(rx, private)| {
            let queue = queue.clone();
            let tx = tx.clone();
            let stats = stats.clone();
            async move {
                let envelope = rx.lock().await.recv().await?;
                let acker = InMemoryAcker {
                    envelope: envelope.clone(),
                    queue_tx: tx,
                    stats,
                    settled: AtomicBool::new(false),
                };
                let delivery = Delivery::new(envelope, queue, Box::new(acker));
                Some((Ok(delivery), (rx, private)))
            }
        });

        Ok(stream.boxed())
    }
}
