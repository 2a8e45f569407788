//! Kafka-compatible broker adapter.
//!
//! Routing keys map one-to-one to topics and a queue maps to a consumer
//! group. Binding patterns with wildcards become regex subscriptions.
//!
//! Settlement follows the queue semantics of [`crate::Broker`]:
//! - ack commits the message offset
//! - requeue produces a copy to the same topic with an incremented
//!   `x-delivery-count` header, then commits
//! - discard produces the message to the dead-letter topic, then commits

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::{
    Acknowledger, Broker, BrokerError, Confirmation, Delivery, OutboundMessage, QueueSpec,
    Subscription,
};

const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";
const MESSAGE_ID_HEADER: &str = "message_id";

/// Broker backed by Kafka or Redpanda.
pub struct KafkaBroker {
    brokers: String,
    producer: FutureProducer,
    connected: Arc<AtomicBool>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl KafkaBroker {
    /// Connects a producer to `brokers` (comma-separated `host:port` list).
    pub fn connect(brokers: impl Into<String>) -> Result<Self, BrokerError> {
        let brokers = brokers.into();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| BrokerError::Transport(format!("Failed to create producer: {e}")))?;

        tracing::info!(brokers = %brokers, "Kafka producer created");

        Ok(Self {
            brokers,
            producer,
            connected: Arc::new(AtomicBool::new(true)),
            consumers: Mutex::new(Vec::new()),
        })
    }
}

fn record_headers(message: &OutboundMessage, delivery_count: Option<u32>) -> OwnedHeaders {
    let mut headers = OwnedHeaders::new().insert(Header {
        key: MESSAGE_ID_HEADER,
        value: Some(message.message_id.as_str()),
    });
    for (key, value) in &message.headers {
        if key == MESSAGE_ID_HEADER || key == DELIVERY_COUNT_HEADER {
            continue;
        }
        headers = headers.insert(Header {
            key: key.as_str(),
            value: Some(value.as_str()),
        });
    }
    if let Some(count) = delivery_count {
        let count = count.to_string();
        headers = headers.insert(Header {
            key: DELIVERY_COUNT_HEADER,
            value: Some(count.as_str()),
        });
    }
    headers
}

async fn produce(
    producer: &FutureProducer,
    topic: &str,
    message: &OutboundMessage,
    delivery_count: Option<u32>,
) -> Result<(), BrokerError> {
    let record = FutureRecord::to(topic)
        .key(&message.message_id)
        .payload(&message.body)
        .headers(record_headers(message, delivery_count));

    producer
        .send(record, Timeout::Never)
        .await
        .map(|_| ())
        .map_err(|(e, _)| BrokerError::Transport(e.to_string()))
}

/// Turns a topic binding pattern into a Kafka subscription.
fn subscription_pattern(binding: &str) -> String {
    if !binding.split('.').any(|word| word == "*" || word == "#") {
        return binding.to_string();
    }

    let words: Vec<String> = binding
        .split('.')
        .map(|word| match word {
            "*" => "[^.]+".to_string(),
            "#" => ".*".to_string(),
            literal => literal.replace('-', "\\-"),
        })
        .collect();
    format!("^{}$", words.join("\\."))
}

fn delivery_from(
    message: &BorrowedMessage<'_>,
    acknowledger: Arc<dyn Acknowledger>,
) -> Delivery {
    let mut headers = BTreeMap::new();
    if let Some(borrowed) = message.headers() {
        for header in borrowed.iter() {
            if let Some(value) = header.value {
                headers.insert(
                    header.key.to_string(),
                    String::from_utf8_lossy(value).into_owned(),
                );
            }
        }
    }

    let delivery_count = headers
        .get(DELIVERY_COUNT_HEADER)
        .and_then(|count| count.parse().ok())
        .unwrap_or(1);
    let message_id = headers.get(MESSAGE_ID_HEADER).cloned().unwrap_or_else(|| {
        format!(
            "{}-{}-{}",
            message.topic(),
            message.partition(),
            message.offset()
        )
    });

    Delivery::new(
        message.topic(),
        message_id,
        message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
        delivery_count,
        acknowledger,
    )
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<Confirmation, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::ConnectionClosed);
        }
        produce(&self.producer, &message.routing_key, &message, None).await?;
        Ok(Confirmation::Ack)
    }

    async fn subscribe(&self, queue: QueueSpec) -> Result<Subscription, BrokerError> {
        let subscription_error = |reason: String| BrokerError::Subscription {
            queue: queue.name.clone(),
            reason,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &queue.name)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| subscription_error(e.to_string()))?;

        let patterns: Vec<String> = queue
            .bindings
            .iter()
            .map(|binding| subscription_pattern(binding))
            .collect();
        let pattern_refs: Vec<&str> = patterns.iter().map(String::as_str).collect();
        consumer
            .subscribe(&pattern_refs)
            .map_err(|e| subscription_error(e.to_string()))?;

        tracing::info!(queue = %queue.name, topics = ?patterns, "Kafka consumer subscribed");

        let consumer = Arc::new(consumer);
        let producer = self.producer.clone();
        let connected = Arc::clone(&self.connected);
        let dead_letter = queue.dead_letter.clone();
        let queue_name = queue.name.clone();
        let (tx, rx) = mpsc::channel(1);

        let task = tokio::spawn(async move {
            let mut messages = consumer.stream();
            while let Some(result) = messages.next().await {
                let delivery = match result {
                    Ok(message) => {
                        let acknowledger = Arc::new(KafkaAcknowledger {
                            consumer: Arc::clone(&consumer),
                            producer: producer.clone(),
                            connected: Arc::clone(&connected),
                            topic: message.topic().to_string(),
                            partition: message.partition(),
                            offset: message.offset(),
                            dead_letter: dead_letter.clone(),
                        });
                        delivery_from(&message, acknowledger)
                    }
                    Err(e) => {
                        tracing::error!(queue = %queue_name, error = %e, "Kafka receive error");
                        continue;
                    }
                };

                if tx.send(delivery).await.is_err() {
                    tracing::debug!(queue = %queue_name, "Subscriber dropped, stopping consumer");
                    break;
                }
            }
        });
        self.consumers.lock().await.push(task);

        let deliveries = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(Subscription::new(queue.name, deliveries))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for task in self.consumers.lock().await.drain(..) {
            task.abort();
        }

        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || {
            producer.flush(Timeout::After(Duration::from_secs(5)))
        })
        .await;
        match flushed {
            Ok(Ok(())) => tracing::info!("Kafka producer flushed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Kafka producer flush failed"),
            Err(e) => tracing::warn!(error = %e, "Kafka producer flush task failed"),
        }
    }
}

struct KafkaAcknowledger {
    consumer: Arc<StreamConsumer>,
    producer: FutureProducer,
    connected: Arc<AtomicBool>,
    topic: String,
    partition: i32,
    offset: i64,
    dead_letter: Option<String>,
}

impl KafkaAcknowledger {
    fn commit(&self) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(|e| BrokerError::Acknowledgment(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BrokerError::Acknowledgment(e.to_string()))
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }
}

#[async_trait]
impl Acknowledger for KafkaAcknowledger {
    async fn ack(&self, _delivery: Delivery) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        self.commit()
    }

    async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), BrokerError> {
        self.ensure_connected()?;

        let message = OutboundMessage {
            routing_key: delivery.routing_key,
            message_id: delivery.message_id,
            body: delivery.body,
            headers: delivery.headers,
        };

        if requeue {
            produce(
                &self.producer,
                &self.topic,
                &message,
                Some(delivery.delivery_count + 1),
            )
            .await?;
        } else if let Some(dead_letter) = &self.dead_letter {
            produce(&self.producer, dead_letter, &message, None).await?;
        }

        self.commit()
    }
}
