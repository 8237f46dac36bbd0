//! Names shared by every participant of the order saga.

/// Direct exchange and queue carrying freshly created orders to payment.
pub const ORDER_CREATED: &str = "order.created";

/// Fanout exchange broadcasting confirmed payments to order and kitchen.
pub const ORDER_PAID: &str = "order.paid";

/// Fanout exchange receiving dead-lettered messages.
pub const DEAD_LETTER_EXCHANGE: &str = "dlx";

/// Queue bound to the dead-letter exchange.
pub const DEAD_LETTER_SHARED_QUEUE: &str = "share_mq";

/// Quarantine queue for messages that exhausted their retry budget.
pub const DEAD_LETTER_QUEUE: &str = "dlq";

/// Header carrying the number of times a message has been retried.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Content type of every message body on the bus.
pub const JSON_CONTENT_TYPE: &str = "application/json";
