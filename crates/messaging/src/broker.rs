use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use crate::BrokerError;

/// A message handed to the broker for publishing.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub routing_key: String,
    pub message_id: String,
    pub body: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

/// The broker's answer to a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The broker took responsibility for the message.
    Ack,
    /// The broker refused the message.
    Nack,
}

/// A durable queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    /// Topic patterns bound to the exchange.
    pub bindings: Vec<String>,
    /// Queue receiving messages that are negatively acknowledged without requeue.
    pub dead_letter: Option<String>,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: Vec::new(),
            dead_letter: None,
        }
    }

    pub fn bind(mut self, pattern: impl Into<String>) -> Self {
        self.bindings.push(pattern.into());
        self
    }

    pub fn with_dead_letter(mut self, queue: impl Into<String>) -> Self {
        self.dead_letter = Some(queue.into());
        self
    }

    /// Whether any binding of this queue matches `routing_key`.
    pub fn accepts(&self, routing_key: &str) -> bool {
        self.bindings
            .iter()
            .any(|pattern| topic_matches(pattern, routing_key))
    }
}

/// Settles deliveries on behalf of a broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery: Delivery) -> Result<(), BrokerError>;

    async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), BrokerError>;
}

/// A message received from a queue.
///
/// Every delivery must be settled exactly once with [`Delivery::ack`] or
/// [`Delivery::nack`]; both consume it.
pub struct Delivery {
    pub routing_key: String,
    pub message_id: String,
    pub body: Vec<u8>,
    pub headers: BTreeMap<String, String>,
    /// 1 on first delivery, incremented on every requeue.
    pub delivery_count: u32,
    acknowledger: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        routing_key: impl Into<String>,
        message_id: impl Into<String>,
        body: Vec<u8>,
        headers: BTreeMap<String, String>,
        delivery_count: u32,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            message_id: message_id.into(),
            body,
            headers,
            delivery_count,
            acknowledger,
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        let acknowledger = Arc::clone(&self.acknowledger);
        acknowledger.ack(self).await
    }

    /// Negatively acknowledges the delivery.
    ///
    /// With `requeue` the message is delivered again; without it the message
    /// goes to the queue's dead-letter queue, or is dropped if there is none.
    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        let acknowledger = Arc::clone(&self.acknowledger);
        acknowledger.nack(self, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("message_id", &self.message_id)
            .field("body_len", &self.body.len())
            .field("delivery_count", &self.delivery_count)
            .finish()
    }
}

/// A stream of deliveries from one queue. Ends when the broker closes.
pub struct Subscription {
    queue: String,
    deliveries: Pin<Box<dyn Stream<Item = Delivery> + Send>>,
}

impl Subscription {
    pub fn new(
        queue: impl Into<String>,
        deliveries: impl Stream<Item = Delivery> + Send + 'static,
    ) -> Self {
        Self {
            queue: queue.into(),
            deliveries: Box::pin(deliveries),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub async fn next(&mut self) -> Option<Delivery> {
        self.deliveries.next().await
    }
}

/// A connection to a topic-exchange message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes a message and waits for the broker's confirmation.
    async fn publish(&self, message: OutboundMessage) -> Result<Confirmation, BrokerError>;

    /// Declares a durable queue, binds it and starts consuming from it.
    async fn subscribe(&self, queue: QueueSpec) -> Result<Subscription, BrokerError>;

    fn is_connected(&self) -> bool;

    /// Closes the connection. Open subscriptions end.
    async fn close(&self);
}

/// Matches a routing key against a topic binding pattern.
///
/// Words are separated by `.`; `*` matches exactly one word and `#` matches
/// zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    words_match(&pattern, &key)
}

fn words_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| words_match(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && words_match(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && words_match(rest, &key[1..]),
    }
}
