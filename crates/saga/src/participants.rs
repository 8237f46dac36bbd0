//! Who consumes and produces what in the choreography.
//!
//! There is no central coordinator: each service reacts to the events it
//! understands. The manifest below is the single list of those reactions;
//! `spawn_consumers` wires it to a bus and the tests use it to check that
//! every consumed event has a producer.

use std::sync::Arc;

use broker::{Consumer, MessageBus, MessageHandler, RetryCoordinator, Subscription, decorate};
use common::events::{ORDER_CREATED, ORDER_PAID};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How a participant is attached to an event's exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// The durable queue of a direct exchange.
    Direct,
    /// A named queue on a fanout exchange, shared by all replicas.
    Shared(&'static str),
    /// A private queue per consumer on a fanout exchange.
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumes {
    pub event: &'static str,
    pub binding: Binding,
}

impl Consumes {
    pub fn subscription(&self) -> Subscription {
        match self.binding {
            Binding::Direct => Subscription::Direct(self.event.to_string()),
            Binding::Shared(queue) => Subscription::Shared {
                exchange: self.event.to_string(),
                queue: queue.to_string(),
            },
            Binding::Private => Subscription::Fanout(self.event.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Produces {
    Event(&'static str),
    /// A synchronous call into another service, `Service.Method`.
    Rpc(&'static str),
}

#[derive(Debug)]
pub struct Participant {
    pub service: &'static str,
    pub consumes: &'static [Consumes],
    pub produces: &'static [Produces],
}

pub const ORDER: Participant = Participant {
    service: "order",
    consumes: &[Consumes {
        event: ORDER_PAID,
        binding: Binding::Shared(ORDER_PAID),
    }],
    produces: &[
        Produces::Rpc("stock.CheckStockAndReserve"),
        Produces::Event(ORDER_CREATED),
    ],
};

pub const STOCK: Participant = Participant {
    service: "stock",
    consumes: &[],
    produces: &[],
};

pub const PAYMENT: Participant = Participant {
    service: "payment",
    consumes: &[Consumes {
        event: ORDER_CREATED,
        binding: Binding::Direct,
    }],
    produces: &[Produces::Rpc("order.UpdateOrder"), Produces::Event(ORDER_PAID)],
};

pub const KITCHEN: Participant = Participant {
    service: "kitchen",
    consumes: &[Consumes {
        event: ORDER_PAID,
        binding: Binding::Private,
    }],
    produces: &[Produces::Rpc("order.UpdateOrder")],
};

pub const ALL: [&Participant; 4] = [&ORDER, &STOCK, &PAYMENT, &KITCHEN];

/// The message handlers of the participants that consume events.
pub struct SagaHandlers {
    pub order: Arc<dyn MessageHandler>,
    pub payment: Arc<dyn MessageHandler>,
    pub kitchen: Arc<dyn MessageHandler>,
}

/// Starts one consumer loop per manifest entry, each handler wrapped in the
/// logging and metrics middleware.
///
/// Every loop stops when `shutdown` flips to true.
pub fn spawn_consumers(
    bus: Arc<dyn MessageBus>,
    coordinator: Arc<RetryCoordinator>,
    handlers: SagaHandlers,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<broker::Result<()>>> {
    let wiring = [
        (&ORDER, handlers.order),
        (&PAYMENT, handlers.payment),
        (&KITCHEN, handlers.kitchen),
    ];

    let mut tasks = Vec::new();
    for (participant, handler) in wiring {
        let handler = decorate(handler);
        for consumes in participant.consumes {
            tracing::info!(
                service = participant.service,
                event = consumes.event,
                handler = handler.name(),
                "Starting consumer"
            );
            let consumer = Consumer::new(
                bus.clone(),
                consumes.subscription(),
                handler.clone(),
                coordinator.clone(),
            );
            tasks.push(tokio::spawn(consumer.run(shutdown.clone())));
        }
    }
    tasks
}
