//! Messaging for the inventory service.
//!
//! Events travel through a topic exchange: publishers tag each message with
//! a routing key such as `inventory.stock_reserved`, and queues receive the
//! messages whose key matches one of their binding patterns.
//!
//! Delivery is at-least-once in both directions:
//! - [`EventPublisher`] waits for a broker confirmation and retries with
//!   exponential backoff until the attempt ceiling is reached
//! - consumers acknowledge each [`Delivery`] explicitly, and a negative
//!   acknowledgment either requeues it or sends it to a dead-letter queue

pub mod broker;
pub mod envelope;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod publisher;
pub mod retry;

pub use broker::{
    Acknowledger, Broker, Confirmation, Delivery, OutboundMessage, QueueSpec, Subscription,
    topic_matches,
};
pub use envelope::{EVENT_VERSION, EXCHANGE_NAME, EventEnvelope};
pub use error::{BrokerError, PublishError};
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use memory::{DeliveryStats, InMemoryBroker};
pub use publisher::EventPublisher;
pub use retry::RetryPolicy;
