//! AMQP (RabbitMQ) message bus.
//!
//! Connections are pooled with deadpool; every publish and every consumer
//! gets its own channel.

use std::collections::BTreeMap;

use async_trait::async_trait;
use deadpool_lapin::{Manager, Pool, PoolError};
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, ExchangeKind,
    acker::Acker as LapinAcker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, ShortString},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    BusError, Result,
    bus::{Acker, Delivery, DeliveryStream, MessageBus, Subscription},
    envelope::{Envelope, RoutingMode},
    headers::{HeaderValue, Headers},
    topology, trace,
};

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

/// RabbitMQ-backed message bus.
#[derive(Clone)]
pub struct AmqpBus {
    pool: Pool,
}

impl AmqpBus {
    /// Connects to `url` and declares the shared exchanges and dead-letter queues.
    pub async fn connect(url: &str) -> Result<Self> {
        let manager = Manager::new(url.to_string(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        let bus = Self { pool };
        bus.declare_topology().await?;
        info!(url = %url, "Connected to AMQP");
        Ok(bus)
    }

    async fn channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
    }

    async fn declare_topology(&self) -> Result<()> {
        let channel = self.channel().await?;

        for exchange in topology::EXCHANGES {
            let kind = match exchange.kind {
                RoutingMode::Direct => ExchangeKind::Direct,
                RoutingMode::Fanout => ExchangeKind::Fanout,
            };
            channel
                .exchange_declare(
                    exchange.name,
                    kind,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    BusError::Connection(format!(
                        "Failed to declare exchange {}: {}",
                        exchange.name, e
                    ))
                })?;
        }

        for queue in topology::QUEUES {
            declare_durable_queue(&channel, queue).await?;
        }

        for binding in topology::BINDINGS {
            bind(&channel, binding.queue, binding.exchange, binding.routing_key).await?;
        }
        Ok(())
    }
}

async fn declare_durable_queue(channel: &Channel, queue: &str) -> Result<String> {
    let declared = channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::Subscribe(format!("Failed to declare queue {queue}: {e}")))?;
    Ok(declared.name().as_str().to_string())
}

async fn bind(channel: &Channel, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
    channel
        .queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| {
            BusError::Subscribe(format!("Failed to bind {queue} to {exchange}: {e}"))
        })
}

fn to_field_table(headers: &Headers) -> FieldTable {
    let mut table = BTreeMap::new();
    for (key, value) in headers.iter() {
        let value = match value {
            HeaderValue::Int(n) => AMQPValue::LongLongInt(*n),
            HeaderValue::Str(s) => AMQPValue::LongString(s.clone().into()),
        };
        table.insert(ShortString::from(key.clone()), value);
    }
    FieldTable::from(table)
}

fn from_field_table(table: Option<&FieldTable>) -> Headers {
    let Some(table) = table else {
        return Headers::new();
    };
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AMQPValue::LongLongInt(n) => HeaderValue::Int(*n),
                AMQPValue::LongInt(n) => HeaderValue::Int(i64::from(*n)),
                AMQPValue::ShortInt(n) => HeaderValue::Int(i64::from(*n)),
                AMQPValue::LongUInt(n) => HeaderValue::Int(i64::from(*n)),
                AMQPValue::LongString(s) => {
                    HeaderValue::Str(String::from_utf8_lossy(s.as_bytes()).into_owned())
                }
                AMQPValue::ShortString(s) => HeaderValue::Str(s.as_str().to_string()),
                _ => return None,
            };
            Some((key.as_str().to_string(), value))
        })
        .collect()
}

struct AmqpAcker(LapinAcker);

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }
}

#[async_trait]
impl MessageBus for AmqpBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(destination = %envelope.destination(), mode = envelope.routing.as_str()))]
    async fn publish(&self, mut envelope: Envelope) -> Result<()> {
        trace::inject_current(&mut envelope.headers);
        let channel = self.channel().await?;

        if envelope.routing == RoutingMode::Direct && !envelope.exchange.is_empty() {
            declare_durable_queue(&channel, &envelope.routing_key).await?;
            bind(
                &channel,
                &envelope.routing_key,
                &envelope.exchange,
                &envelope.routing_key,
            )
            .await?;
        }

        let properties = BasicProperties::default()
            .with_content_type(envelope.content_type.clone().into())
            .with_delivery_mode(PERSISTENT)
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_headers(to_field_table(&envelope.headers));

        let confirm = channel
            .basic_publish(
                &envelope.exchange,
                &envelope.routing_key,
                BasicPublishOptions::default(),
                &envelope.body,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?;
        confirm
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        metrics::counter!("bus_published_total", "mode" => envelope.routing.as_str()).increment(1);
        debug!(
            exchange = %envelope.exchange,
            routing_key = %envelope.routing_key,
            "Published message"
        );
        Ok(())
    }

    async fn consume(&self, subscription: Subscription) -> Result<DeliveryStream> {
        let channel = self.channel().await?;

        let queue = match &subscription {
            Subscription::Direct(name) => {
                let queue = declare_durable_queue(&channel, name).await?;
                bind(&channel, &queue, name, name).await?;
                queue
            }
            Subscription::Fanout(exchange) => {
                let declared = channel
                    .queue_declare(
                        "",
                        QueueDeclareOptions {
                            durable: true,
                            auto_delete: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        BusError::Subscribe(format!("Failed to declare private queue: {e}"))
                    })?;
                let queue = declared.name().as_str().to_string();
                bind(&channel, &queue, exchange, "").await?;
                queue
            }
            Subscription::Shared { exchange, queue } => {
                let queue = declare_durable_queue(&channel, queue).await?;
                bind(&channel, &queue, exchange, "").await?;
                queue
            }
            Subscription::Queue(name) => declare_durable_queue(&channel, name).await?,
        };

        let consumer = channel
            .basic_consume(
                &queue,
                &format!("{}-{}", subscription.name(), Uuid::new_v4().simple()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))?;

        info!(queue = %queue, "Consuming");

        let stream = consumer.map(move |delivery| {
            // The channel must outlive the consumer stream.
            let _channel = &channel;
            let delivery = delivery.map_err(|e| BusError::Closed(format!("{queue}: {e}")))?;
            let routing = if delivery.routing_key.as_str().is_empty() {
                RoutingMode::Fanout
            } else {
                RoutingMode::Direct
            };
            let envelope = Envelope {
                exchange: delivery.exchange.as_str().to_string(),
                routing_key: delivery.routing_key.as_str().to_string(),
                routing,
                content_type: delivery
                    .properties
                    .content_type()
                    .as_ref()
                    .map(|ct| ct.as_str().to_string())
                    .unwrap_or_default(),
                headers: from_field_table(delivery.properties.headers().as_ref()),
                body: delivery.data,
            };
            Ok(Delivery::new(
                envelope,
                queue.clone(),
                Box::new(AmqpAcker(delivery.acker)),
            ))
        });

        Ok(stream.boxed())
    }
}
