//! Exchanges, queues and bindings every participant expects to exist.

use common::events::{
    DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE, DEAD_LETTER_SHARED_QUEUE, ORDER_CREATED, ORDER_PAID,
};

use crate::envelope::RoutingMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: &'static str,
    pub kind: RoutingMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSpec {
    pub queue: &'static str,
    pub exchange: &'static str,
    pub routing_key: &'static str,
}

/// Durable exchanges declared on connect.
pub const EXCHANGES: &[ExchangeSpec] = &[
    ExchangeSpec {
        name: ORDER_CREATED,
        kind: RoutingMode::Direct,
    },
    ExchangeSpec {
        name: ORDER_PAID,
        kind: RoutingMode::Fanout,
    },
    ExchangeSpec {
        name: DEAD_LETTER_EXCHANGE,
        kind: RoutingMode::Fanout,
    },
];

/// Durable queues declared on connect.
pub const QUEUES: &[&str] = &[DEAD_LETTER_SHARED_QUEUE, DEAD_LETTER_QUEUE];

pub const BINDINGS: &[BindingSpec] = &[BindingSpec {
    queue: DEAD_LETTER_SHARED_QUEUE,
    exchange: DEAD_LETTER_EXCHANGE,
    routing_key: "",
}];
