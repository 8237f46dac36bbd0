//! Bounded retry with linear backoff, then quarantine.

use std::sync::Arc;
use std::time::Duration;

use common::events::DEAD_LETTER_QUEUE;

use crate::{
    Result,
    bus::{Delivery, MessageBus},
    envelope::Envelope,
};

/// How many times a failing message is re-published, and how long to wait.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempt count at which a message is dead-lettered instead of retried.
    pub max_retry: i64,
    /// Delay unit; attempt `n` waits `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: i64) -> Duration {
        self.base_delay * attempt.max(0) as u32
    }
}

/// What happened to a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Retried { attempt: i64 },
    DeadLettered { attempt: i64 },
}

/// Re-publishes failed messages with an incremented retry count, or moves
/// them to the dead-letter queue once the budget is spent.
///
/// Every consumer failure path goes through here; consumers never loop on
/// their own.
pub struct RetryCoordinator {
    bus: Arc<dyn MessageBus>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(bus: Arc<dyn MessageBus>, policy: RetryPolicy) -> Self {
        Self { bus, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Schedules another attempt for a failed delivery.
    ///
    /// The retry goes back to the queue the delivery came from, so a retry
    /// of a broadcast message is not re-broadcast to consumers that already
    /// handled it. Sleeps for the backoff delay before re-publishing; run it
    /// on the delivery's own task.
    #[tracing::instrument(skip(self, delivery), fields(queue = %delivery.queue))]
    pub async fn handle_retry(&self, delivery: &Delivery) -> Result<RetryOutcome> {
        let mut headers = delivery.envelope.headers.clone();
        let attempt = headers.retry_count() + 1;
        headers.set_retry_count(attempt);

        if attempt >= self.policy.max_retry {
            self.dead_letter(&delivery.envelope, headers).await?;
            tracing::warn!(attempt, "Retry budget exhausted, moved message to dead-letter queue");
            return Ok(RetryOutcome::DeadLettered { attempt });
        }

        let delay = self.policy.delay_for(attempt);
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Retrying message");
        tokio::time::sleep(delay).await;

        let mut retry = Envelope::to_queue(delivery.queue.clone(), delivery.envelope.body.clone())
            .with_headers(headers);
        retry.content_type = delivery.envelope.content_type.clone();
        self.bus.publish(retry).await?;

        metrics::counter!("bus_retries_total", "queue" => delivery.queue.clone()).increment(1);
        Ok(RetryOutcome::Retried { attempt })
    }

    /// Moves a delivery straight to the dead-letter queue without retrying.
    #[tracing::instrument(skip(self, delivery), fields(queue = %delivery.queue))]
    pub async fn quarantine(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        let mut headers = delivery.envelope.headers.clone();
        headers.insert("x-dead-letter-reason", reason);
        headers.insert("x-original-queue", delivery.queue.clone());
        self.dead_letter(&delivery.envelope, headers).await?;
        tracing::warn!(reason, "Quarantined message");
        Ok(())
    }

    async fn dead_letter(&self, original: &Envelope, headers: crate::Headers) -> Result<()> {
        let mut dead = Envelope::to_queue(DEAD_LETTER_QUEUE, original.body.clone()).with_headers(headers);
        dead.content_type = original.content_type.clone();
        self.bus.publish(dead).await?;
        metrics::counter!("bus_dead_lettered_total").increment(1);
        Ok(())
    }
}
