use common::events::JSON_CONTENT_TYPE;
use serde::{Serialize, de::DeserializeOwned};

use crate::{Result, headers::Headers};

/// How a message reaches its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Point-to-point: the destination queue is declared and bound at
    /// publish time and exactly one consumer receives each message.
    Direct,
    /// Broadcast: every queue bound to the exchange gets a copy.
    Fanout,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Direct => "direct",
            RoutingMode::Fanout => "fanout",
        }
    }
}

/// Unit of transport on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Exchange the message is published to; empty means the broker's
    /// default exchange, which routes straight to the queue named by
    /// `routing_key`.
    pub exchange: String,
    /// Queue name for direct routing, empty for fanout.
    pub routing_key: String,
    pub routing: RoutingMode,
    pub content_type: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Envelope {
    /// Direct message to the queue of the same name as the exchange.
    pub fn direct(destination: impl Into<String>, body: Vec<u8>) -> Self {
        let destination = destination.into();
        Self {
            exchange: destination.clone(),
            routing_key: destination,
            routing: RoutingMode::Direct,
            content_type: JSON_CONTENT_TYPE.to_string(),
            headers: Headers::new(),
            body,
        }
    }

    /// Broadcast message on a fanout exchange.
    pub fn fanout(exchange: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: String::new(),
            routing: RoutingMode::Fanout,
            content_type: JSON_CONTENT_TYPE.to_string(),
            headers: Headers::new(),
            body,
        }
    }

    /// Message addressed to a single queue through the default exchange.
    pub fn to_queue(queue: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            exchange: String::new(),
            routing_key: queue.into(),
            routing: RoutingMode::Direct,
            content_type: JSON_CONTENT_TYPE.to_string(),
            headers: Headers::new(),
            body,
        }
    }

    /// Serializes `payload` as JSON into a direct message.
    pub fn direct_json<T: Serialize>(destination: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self::direct(destination, serde_json::to_vec(payload)?))
    }

    /// Serializes `payload` as JSON into a fanout message.
    pub fn fanout_json<T: Serialize>(exchange: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self::fanout(exchange, serde_json::to_vec(payload)?))
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Where the message is headed, for logs and metric labels.
    pub fn destination(&self) -> &str {
        match self.routing {
            RoutingMode::Fanout => &self.exchange,
            RoutingMode::Direct => &self.routing_key,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn retry_count(&self) -> i64 {
        self.headers.retry_count()
    }
}
