use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::{
    Acknowledger, Broker, BrokerError, Confirmation, Delivery, OutboundMessage, QueueSpec,
    Subscription,
};

/// Counts of how deliveries were settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
}

struct Queue {
    spec: QueueSpec,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, Queue>,
    published: Vec<OutboundMessage>,
    dead_letters: HashMap<String, Vec<OutboundMessage>>,
    stats: DeliveryStats,
}

struct Shared {
    state: Mutex<BrokerState>,
    connected: AtomicBool,
    failing_sends: AtomicU32,
    nacked_confirms: AtomicU32,
    confirm_delay_ms: AtomicU64,
}

/// In-process topic exchange.
///
/// Routes each confirmed publish to every subscribed queue with a matching
/// binding, redelivers requeued messages with an incremented delivery count
/// and moves discarded ones to the queue's dead-letter queue. A queue has a
/// single consumer: subscribing to the same name again replaces it.
///
/// Useful for development and testing; the fault hooks simulate an
/// unreliable broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                connected: AtomicBool::new(true),
                failing_sends: AtomicU32::new(0),
                nacked_confirms: AtomicU32::new(0),
                confirm_delay_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Makes the next `count` publishes fail at the transport level.
    pub fn fail_next_sends(&self, count: u32) {
        self.shared.failing_sends.store(count, Ordering::SeqCst);
    }

    /// Makes the broker refuse the next `count` publishes.
    pub fn nack_next_confirms(&self, count: u32) {
        self.shared.nacked_confirms.store(count, Ordering::SeqCst);
    }

    /// Delays every confirmation by `delay` after the message is routed.
    pub fn set_confirm_delay(&self, delay: Duration) {
        self.shared
            .confirm_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.connected.store(connected, Ordering::SeqCst);
    }

    /// Every message the broker confirmed, in publish order.
    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.shared.state.lock().await.published.clone()
    }

    pub async fn published_with_key(&self, routing_key: &str) -> Vec<OutboundMessage> {
        self.shared
            .state
            .lock()
            .await
            .published
            .iter()
            .filter(|message| message.routing_key == routing_key)
            .cloned()
            .collect()
    }

    /// Messages moved to the dead-letter queue named `queue`.
    pub async fn dead_letters(&self, queue: &str) -> Vec<OutboundMessage> {
        self.shared
            .state
            .lock()
            .await
            .dead_letters
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> DeliveryStats {
        self.shared.state.lock().await.stats
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn deliver(shared: &Arc<Shared>, queue: &Queue, message: &OutboundMessage, delivery_count: u32) {
    let acknowledger = Arc::new(QueueAcknowledger {
        shared: Arc::downgrade(shared),
        queue: queue.spec.name.clone(),
    });
    let delivery = Delivery::new(
        message.routing_key.clone(),
        message.message_id.clone(),
        message.body.clone(),
        message.headers.clone(),
        delivery_count,
        acknowledger,
    );
    if queue.sender.send(delivery).is_err() {
        debug!(queue = %queue.spec.name, "Consumer gone, message dropped");
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<Confirmation, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::ConnectionClosed);
        }
        if take_one(&self.shared.failing_sends) {
            return Err(BrokerError::Transport("simulated send failure".to_string()));
        }
        if take_one(&self.shared.nacked_confirms) {
            return Ok(Confirmation::Nack);
        }

        {
            let mut state = self.shared.state.lock().await;
            for queue in state.queues.values() {
                if queue.spec.accepts(&message.routing_key) {
                    deliver(&self.shared, queue, &message, 1);
                }
            }
            state.published.push(message);
        }

        let delay = self.shared.confirm_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(Confirmation::Ack)
    }

    async fn subscribe(&self, queue: QueueSpec) -> Result<Subscription, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::ConnectionClosed);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let name = queue.name.clone();
        self.shared
            .state
            .lock()
            .await
            .queues
            .insert(name.clone(), Queue { spec: queue, sender });

        let deliveries = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|delivery| (delivery, receiver))
        });
        Ok(Subscription::new(name, deliveries))
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.set_connected(false);
        self.shared.state.lock().await.queues.clear();
    }
}

struct QueueAcknowledger {
    shared: Weak<Shared>,
    queue: String,
}

impl QueueAcknowledger {
    fn shared(&self) -> Result<Arc<Shared>, BrokerError> {
        let shared = self.shared.upgrade().ok_or(BrokerError::ConnectionClosed)?;
        if !shared.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }
        Ok(shared)
    }
}

#[async_trait]
impl Acknowledger for QueueAcknowledger {
    async fn ack(&self, _delivery: Delivery) -> Result<(), BrokerError> {
        let shared = self.shared()?;
        shared.state.lock().await.stats.acked += 1;
        Ok(())
    }

    async fn nack(&self, delivery: Delivery, requeue: bool) -> Result<(), BrokerError> {
        let shared = self.shared()?;
        let mut state = shared.state.lock().await;

        let message = OutboundMessage {
            routing_key: delivery.routing_key,
            message_id: delivery.message_id,
            body: delivery.body,
            headers: delivery.headers,
        };

        if requeue {
            state.stats.requeued += 1;
            if let Some(queue) = state.queues.get(&self.queue) {
                deliver(&shared, queue, &message, delivery.delivery_count + 1);
            }
            return Ok(());
        }

        state.stats.discarded += 1;
        let dead_letter = state
            .queues
            .get(&self.queue)
            .and_then(|queue| queue.spec.dead_letter.clone());
        if let Some(dead_letter) = dead_letter {
            if let Some(queue) = state.queues.get(&dead_letter) {
                deliver(&shared, queue, &message, 1);
            }
            state
                .dead_letters
                .entry(dead_letter)
                .or_default()
                .push(message);
        }
        Ok(())
    }
}
