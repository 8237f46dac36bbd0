//! End-to-end retry and dead-letter behaviour of the consumer loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use broker::{
    Consumer, Envelope, HandlerError, InMemoryBus, MessageBus, MessageContext, MessageHandler,
    RetryCoordinator, RetryPolicy, Subscription, decorate, trace::TRACEPARENT_HEADER,
};
use common::events::{DEAD_LETTER_QUEUE, ORDER_CREATED, ORDER_PAID};
use tokio::sync::watch;

const MAX_RETRY: i64 = 3;

const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
const PARENT_SPAN_ID: &str = "00f067aa0ba902b7";

/// Consumers run on worker threads, so the OTel-aware subscriber has to be
/// the global one.
#[cfg(feature = "otel")]
fn install_tracing() {
    use std::sync::Once;
    use tracing_subscriber::layer::SubscriberExt;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let subscriber =
            tracing_subscriber::registry().with(broker::trace::otel_layer("retry-escalation"));
        tracing::subscriber::set_global_default(subscriber)
            .expect("failed to install tracing subscriber");
    });
}

fn traced(mut envelope: Envelope) -> Envelope {
    envelope.headers.insert(
        TRACEPARENT_HEADER,
        format!("00-{TRACE_ID}-{PARENT_SPAN_ID}-01"),
    );
    envelope
}

fn trace_id_of(envelope: &Envelope) -> Option<&str> {
    envelope
        .headers
        .get_str(TRACEPARENT_HEADER)
        .and_then(|value| value.split('-').nth(1))
}

/// Fails its first `failures` calls, then succeeds.
struct Flaky {
    failures: i64,
    calls: AtomicI64,
    successes: AtomicI64,
}

impl Flaky {
    fn new(failures: i64) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicI64::new(0),
            successes: AtomicI64::new(0),
        })
    }
}

#[async_trait]
impl MessageHandler for Flaky {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn handle(&self, _ctx: &MessageContext, _envelope: &Envelope) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(HandlerError::transient(format!("downstream down (call {call})")));
        }
        self.successes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn start_consumer(
    bus: &Arc<InMemoryBus>,
    subscription: Subscription,
    handler: Arc<dyn MessageHandler>,
) -> watch::Sender<bool> {
    let coordinator = Arc::new(RetryCoordinator::new(
        bus.clone(),
        RetryPolicy {
            max_retry: MAX_RETRY,
            base_delay: Duration::from_millis(5),
        },
    ));
    let consumer = Consumer::new(bus.clone(), subscription, handler, coordinator);
    let (tx, rx) = watch::channel(false);
    tokio::spawn(consumer.run(rx));
    tx
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn succeeds_on_last_allowed_attempt() {
    let bus = Arc::new(InMemoryBus::new());
    let handler = Flaky::new(MAX_RETRY - 1);
    let _shutdown = start_consumer(
        &bus,
        Subscription::Direct(ORDER_CREATED.into()),
        decorate(handler.clone()),
    );

    bus.publish(Envelope::direct(ORDER_CREATED, b"{}".to_vec()))
        .await
        .unwrap();

    wait_until("success", || handler.successes.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(handler.calls.load(Ordering::SeqCst), MAX_RETRY);
    assert!(bus.drain(DEAD_LETTER_QUEUE).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_message_is_dead_lettered_and_not_redelivered() {
    #[cfg(feature = "otel")]
    install_tracing();
    let bus = Arc::new(InMemoryBus::recording());
    let handler = Flaky::new(i64::MAX);
    let _shutdown = start_consumer(
        &bus,
        Subscription::Direct(ORDER_CREATED.into()),
        decorate(handler.clone()),
    );

    bus.publish(traced(Envelope::direct(ORDER_CREATED, b"{\"id\":1}".to_vec())))
        .await
        .unwrap();

    wait_until("dead letter", || {
        bus.published()
            .iter()
            .any(|e| e.routing_key == DEAD_LETTER_QUEUE)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(handler.calls.load(Ordering::SeqCst), MAX_RETRY);
    assert_eq!(handler.successes.load(Ordering::SeqCst), 0);

    let dead = bus.drain(DEAD_LETTER_QUEUE).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].body, b"{\"id\":1}");
    assert_eq!(dead[0].retry_count(), MAX_RETRY);
    // every hop stays on the publisher's trace
    assert_eq!(trace_id_of(&dead[0]), Some(TRACE_ID));
    // every attempt was nacked, none acked
    assert_eq!(bus.stats().nacked(), MAX_RETRY as u64);
    assert_eq!(bus.stats().acked(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn permanent_failure_skips_retries() {
    struct Rejects;

    #[async_trait]
    impl MessageHandler for Rejects {
        fn name(&self) -> &'static str {
            "rejects"
        }

        async fn handle(&self, _ctx: &MessageContext, _envelope: &Envelope) -> Result<(), HandlerError> {
            Err(HandlerError::permanent("order not paid"))
        }
    }

    let bus = Arc::new(InMemoryBus::recording());
    let _shutdown = start_consumer(&bus, Subscription::Direct(ORDER_CREATED.into()), decorate(Rejects));

    bus.publish(Envelope::direct(ORDER_CREATED, b"{}".to_vec()))
        .await
        .unwrap();

    wait_until("quarantine", || {
        bus.published()
            .iter()
            .any(|e| e.routing_key == DEAD_LETTER_QUEUE)
    })
    .await;

    let dead = bus.drain(DEAD_LETTER_QUEUE).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_count(), 0);
    assert_eq!(bus.stats().nacked(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_retry_stays_on_the_failing_consumer() {
    let bus = Arc::new(InMemoryBus::new());
    let flaky = Flaky::new(1);
    let steady = Flaky::new(0);
    let _a = start_consumer(&bus, Subscription::Fanout(ORDER_PAID.into()), decorate(flaky.clone()));
    let _b = start_consumer(&bus, Subscription::Fanout(ORDER_PAID.into()), decorate(steady.clone()));
    // let both consumers bind before publishing
    tokio::time::sleep(Duration::from_millis(20)).await;

    bus.publish(Envelope::fanout(ORDER_PAID, b"{}".to_vec()))
        .await
        .unwrap();

    wait_until("flaky recovery", || flaky.successes.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    assert_eq!(steady.calls.load(Ordering::SeqCst), 1);
}

#[cfg(feature = "otel")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_runs_in_a_child_of_the_publisher_span() {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    /// Records the trace and span ids the handler runs under.
    struct Captures(std::sync::Mutex<Option<(String, String)>>);

    #[async_trait]
    impl MessageHandler for Captures {
        fn name(&self) -> &'static str {
            "captures"
        }

        async fn handle(&self, ctx: &MessageContext, _envelope: &Envelope) -> Result<(), HandlerError> {
            assert_eq!(ctx.queue, ORDER_CREATED);
            let cx = tracing::Span::current().context();
            let span = cx.span();
            let ids = span.span_context();
            *self.0.lock().unwrap() = Some((ids.trace_id().to_string(), ids.span_id().to_string()));
            Ok(())
        }
    }

    install_tracing();
    let bus = Arc::new(InMemoryBus::new());
    let captures = Arc::new(Captures(std::sync::Mutex::new(None)));
    let _shutdown = start_consumer(
        &bus,
        Subscription::Direct(ORDER_CREATED.into()),
        captures.clone(),
    );

    bus.publish(traced(Envelope::direct(ORDER_CREATED, b"{}".to_vec())))
        .await
        .unwrap();
    wait_until("ack", || bus.stats().acked() == 1).await;

    let (trace_id, span_id) = captures.0.lock().unwrap().clone().unwrap();
    assert_eq!(trace_id, TRACE_ID);
    assert_ne!(span_id, PARENT_SPAN_ID);
}
