//! Consumer loop and handler middleware.
//!
//! A `Consumer` reads one subscription and hands every delivery to its own
//! task, so a slow handler or a retry backoff never stalls the loop. The
//! handler's outcome decides how the delivery is settled:
//!
//! - success: ack
//! - transient failure or panic: nack, then re-publish via the coordinator
//! - permanent failure: nack, then quarantine in the dead-letter queue

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::Instrument;

use crate::{
    Result,
    bus::{Delivery, MessageBus, Subscription},
    envelope::Envelope,
    error::HandlerError,
    retry::{RetryCoordinator, RetryOutcome},
    trace,
};

/// Per-delivery information handed to a handler.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub queue: String,
    pub retry_count: i64,
}

/// Processes one message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Stable name for logs and metric labels.
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        ctx: &MessageContext,
        envelope: &Envelope,
    ) -> std::result::Result<(), HandlerError>;
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn handle(
        &self,
        ctx: &MessageContext,
        envelope: &Envelope,
    ) -> std::result::Result<(), HandlerError> {
        (**self).handle(ctx, envelope).await
    }
}

/// Logs the start, outcome and cost of every handled message.
pub struct Logged<H> {
    inner: H,
}

impl<H: MessageHandler> Logged<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: MessageHandler> MessageHandler for Logged<H> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn handle(
        &self,
        ctx: &MessageContext,
        envelope: &Envelope,
    ) -> std::result::Result<(), HandlerError> {
        let started = Instant::now();
        tracing::debug!(
            handler = self.name(),
            body = %String::from_utf8_lossy(&envelope.body),
            "Handling message"
        );

        let result = self.inner.handle(ctx, envelope).await;
        let cost_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => tracing::info!(handler = self.name(), cost_ms, "Message handled"),
            Err(e) => tracing::warn!(handler = self.name(), cost_ms, error = %e, "Message handling failed"),
        }
        result
    }
}

/// Records a success/failure counter and a latency histogram per handler.
pub struct Metered<H> {
    inner: H,
}

impl<H: MessageHandler> Metered<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: MessageHandler> MessageHandler for Metered<H> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn handle(
        &self,
        ctx: &MessageContext,
        envelope: &Envelope,
    ) -> std::result::Result<(), HandlerError> {
        let started = Instant::now();
        let result = self.inner.handle(ctx, envelope).await;

        let outcome = match &result {
            Ok(()) => "success",
            Err(HandlerError::Transient(_)) => "transient_failure",
            Err(HandlerError::Permanent(_)) => "permanent_failure",
        };
        metrics::counter!("bus_handled_total", "handler" => self.name(), "outcome" => outcome)
            .increment(1);
        metrics::histogram!("bus_handler_duration_seconds", "handler" => self.name())
            .record(started.elapsed().as_secs_f64());
        result
    }
}

/// Wraps a handler in the standard middleware stack.
pub fn decorate<H: MessageHandler + 'static>(handler: H) -> Arc<dyn MessageHandler> {
    Arc::new(Logged::new(Metered::new(handler)))
}

/// Long-lived consumption loop for one subscription.
pub struct Consumer {
    bus: Arc<dyn MessageBus>,
    subscription: Subscription,
    handler: Arc<dyn MessageHandler>,
    coordinator: Arc<RetryCoordinator>,
}

impl Consumer {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        subscription: Subscription,
        handler: Arc<dyn MessageHandler>,
        coordinator: Arc<RetryCoordinator>,
    ) -> Self {
        Self {
            bus,
            subscription,
            handler,
            coordinator,
        }
    }

    /// Consumes until the stream ends or `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut deliveries = self.bus.consume(self.subscription.clone()).await?;
        tracing::info!(
            subscription = %self.subscription.name(),
            handler = self.handler.name(),
            "Consumer started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = deliveries.next() => {
                    match next {
                        Some(Ok(delivery)) => {
                            let handler = self.handler.clone();
                            let coordinator = self.coordinator.clone();
                            tokio::spawn(process(handler, coordinator, delivery));
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "Delivery error, stopping consumer");
                            return Err(e);
                        }
                        None => break,
                    }
                }
            }
        }

        tracing::info!(subscription = %self.subscription.name(), "Consumer stopped");
        Ok(())
    }
}

/// Runs the handler for one delivery and settles it.
async fn process(
    handler: Arc<dyn MessageHandler>,
    coordinator: Arc<RetryCoordinator>,
    delivery: Delivery,
) {
    let ctx = MessageContext {
        queue: delivery.queue.clone(),
        retry_count: delivery.envelope.retry_count(),
    };
    let span = tracing::info_span!(
        "bus.consume",
        queue = %ctx.queue,
        handler = handler.name(),
        retry_count = ctx.retry_count,
    );
    trace::set_parent(&span, &delivery.envelope.headers);

    async move {
        // A panicking handler surfaces as a JoinError instead of killing the loop.
        let result = {
            let handler = handler.clone();
            let ctx = ctx.clone();
            let envelope = delivery.envelope.clone();
            tokio::spawn(async move { handler.handle(&ctx, &envelope).await }.in_current_span())
                .await
        };
        let result = result.unwrap_or_else(|join_err| {
            Err(HandlerError::transient(format!("handler panicked: {join_err}")))
        });

        let outcome = match &result {
            Ok(()) => "ack",
            Err(e) if e.is_permanent() => "quarantined",
            Err(_) => "retried",
        };
        metrics::counter!("bus_consumed_total", "queue" => ctx.queue.clone(), "outcome" => outcome)
            .increment(1);

        match result {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    tracing::error!(error = %e, "Failed to ack message");
                }
            }
            Err(err) => {
                if let Err(e) = delivery.nack(false).await {
                    tracing::error!(error = %e, "Failed to nack message");
                }
                let escalation = if err.is_permanent() {
                    coordinator.quarantine(&delivery, &err.to_string()).await.map(|_| None)
                } else {
                    coordinator.handle_retry(&delivery).await.map(Some)
                };
                match escalation {
                    Ok(Some(RetryOutcome::DeadLettered { attempt })) => {
                        tracing::warn!(attempt, error = %err, "Message dead-lettered");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Failed to escalate message"),
                }
            }
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn handle(
            &self,
            _ctx: &MessageContext,
            envelope: &Envelope,
        ) -> std::result::Result<(), HandlerError> {
            if envelope.body == b"bad" {
                Err(HandlerError::permanent("bad body"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn middleware_preserves_name_and_result() {
        let handler = decorate(Echo);
        let ctx = MessageContext {
            queue: "q".into(),
            retry_count: 0,
        };
        assert_eq!(handler.name(), "echo");
        assert!(handler.handle(&ctx, &Envelope::to_queue("q", b"ok".to_vec())).await.is_ok());
        assert!(
            handler
                .handle(&ctx, &Envelope::to_queue("q", b"bad".to_vec()))
                .await
                .unwrap_err()
                .is_permanent()
        );
    }

    #[tokio::test]
    async fn consumer_stops_on_shutdown_signal() {
        let bus = Arc::new(InMemoryBus::new());
        let coordinator = Arc::new(RetryCoordinator::new(bus.clone(), Default::default()));
        let consumer = Consumer::new(
            bus.clone(),
            Subscription::Direct("q".into()),
            decorate(Echo),
            coordinator,
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(consumer.run(rx));
        tx.send(true).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("consumer did not stop");
        assert!(result.unwrap().is_ok());
    }

    struct Panics(AtomicUsize);

    #[async_trait]
    impl MessageHandler for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        async fn handle(
            &self,
            _ctx: &MessageContext,
            _envelope: &Envelope,
        ) -> std::result::Result<(), HandlerError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("boom");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn panicking_handler_is_retried_not_fatal() {
        let bus = Arc::new(InMemoryBus::new());
        let coordinator = Arc::new(RetryCoordinator::new(
            bus.clone(),
            crate::RetryPolicy {
                max_retry: 3,
                base_delay: std::time::Duration::from_millis(1),
            },
        ));
        let handler = Arc::new(Panics(AtomicUsize::new(0)));
        let consumer = Consumer::new(
            bus.clone(),
            Subscription::Direct("q".into()),
            handler.clone(),
            coordinator,
        );
        let (_tx, rx) = watch::channel(false);
        tokio::spawn(consumer.run(rx));

        bus.publish(Envelope::direct("q", b"{}".to_vec())).await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while bus.stats().acked() < 1 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("retried message was never acked");

        assert_eq!(handler.0.load(Ordering::SeqCst), 2);
        assert_eq!(bus.stats().nacked(), 1);
    }
}
