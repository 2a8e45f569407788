use std::future::Future;
use std::time::Duration;

use ledger::{ReservationLine, StockLedger};
use messaging::{Broker, BrokerError, Delivery, EventEnvelope, QueueSpec, Subscription};

use crate::events::{
    self, InboundEvent, OrderCancelled, OrderCreated, ReservationFailed, routing,
};
use crate::{CatalogSync, InventoryService, ReleaseResult, ReservationOutcome};

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Negative acknowledgment; the broker delivers the message again.
    Requeue,
    /// Negative acknowledgment; the message goes to the dead-letter queue.
    Discard,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Requeue => "requeue",
            Disposition::Discard => "discard",
        }
    }
}

/// Settings for [`EventConsumer`].
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub service_name: String,
    /// Deliveries of a rejected `order.created` before the order is given up.
    pub max_rejection_redeliveries: u32,
    /// Bound on each ledger call made for a message.
    pub operation_timeout: Option<Duration>,
}

impl ConsumerConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            max_rejection_redeliveries: 3,
            operation_timeout: Some(Duration::from_secs(30)),
        }
    }

    pub fn queue_name(&self) -> String {
        format!("{}.inventory.queue", self.service_name)
    }

    pub fn dead_letter_queue(&self) -> String {
        format!("{}.inventory.dlq", self.service_name)
    }

    pub fn queue_spec(&self) -> QueueSpec {
        routing::CONSUMED
            .iter()
            .fold(QueueSpec::new(self.queue_name()), |spec, key| spec.bind(*key))
            .with_dead_letter(self.dead_letter_queue())
    }
}

/// Consumes order lifecycle and catalog events, one message at a time.
///
/// Every delivery ends acked, requeued or discarded:
/// - messages that cannot be decoded are discarded and never retried
/// - infrastructure failures and deadline expiries are requeued
/// - a rejected `order.created` is requeued until it has been delivered
///   `max_rejection_redeliveries` times, then an `order.reservation_failed`
///   event is published and the message is discarded
pub struct EventConsumer<L: StockLedger> {
    service: InventoryService<L>,
    catalog: CatalogSync<L>,
    config: ConsumerConfig,
}

impl<L: StockLedger> EventConsumer<L> {
    pub fn new(service: InventoryService<L>, config: ConsumerConfig) -> Self {
        Self {
            catalog: CatalogSync::new(service.clone()),
            service,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Declares and binds the inventory queue.
    pub async fn subscribe(&self, broker: &dyn Broker) -> Result<Subscription, BrokerError> {
        let spec = self.config.queue_spec();
        tracing::info!(
            queue = %spec.name,
            bindings = ?spec.bindings,
            dead_letter = ?spec.dead_letter,
            "Subscribing to inventory queue"
        );
        broker.subscribe(spec).await
    }

    /// Processes deliveries until `shutdown` resolves or the subscription
    /// ends. A message in progress is finished before returning.
    pub async fn run<F>(&self, mut subscription: Subscription, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(queue = subscription.queue(), "Event consumer started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Event consumer shutting down");
                    break;
                }
                next = subscription.next() => match next {
                    Some(delivery) => {
                        if let Err(e) = self.process(delivery).await {
                            tracing::error!(error = %e, "Failed to settle delivery");
                        }
                    }
                    None => {
                        tracing::warn!("Subscription ended");
                        break;
                    }
                },
            }
        }
    }

    /// Handles one delivery and settles it with the broker.
    pub async fn process(&self, delivery: Delivery) -> Result<Disposition, BrokerError> {
        let disposition = self
            .handle(&delivery.routing_key, &delivery.body, delivery.delivery_count)
            .await;

        metrics::counter!(
            "consumer_messages_total",
            "routing_key" => delivery.routing_key.clone(),
            "disposition" => disposition.as_str()
        )
        .increment(1);

        match disposition {
            Disposition::Ack => delivery.ack().await?,
            Disposition::Requeue => delivery.nack(true).await?,
            Disposition::Discard => delivery.nack(false).await?,
        }
        Ok(disposition)
    }

    /// Decides how a message should be settled, applying its effects.
    #[tracing::instrument(skip(self, body))]
    pub async fn handle(&self, routing_key: &str, body: &[u8], delivery_count: u32) -> Disposition {
        let message = match events::decode(routing_key, body) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding undecodable message");
                return Disposition::Discard;
            }
        };
        let correlation_id = message.correlation_id.as_deref();

        match &message.event {
            InboundEvent::OrderCreated(order) => self.on_order_created(order, delivery_count).await,
            InboundEvent::OrderCancelled(order) => self.on_order_cancelled(order).await,
            InboundEvent::CatalogCreated(event) => {
                self.catalog.handle_created(event, correlation_id).await
            }
            InboundEvent::CatalogDeleted(event) => {
                self.catalog.handle_deleted(event, correlation_id).await
            }
        }
    }

    async fn on_order_created(&self, order: &OrderCreated, delivery_count: u32) -> Disposition {
        let lines: Vec<ReservationLine> = order.items.iter().map(ReservationLine::from).collect();
        let outcome = self
            .service
            .reserve_stock(order.order_id.clone(), lines, self.config.operation_timeout)
            .await;

        match outcome {
            Ok(
                ReservationOutcome::Reserved
                | ReservationOutcome::AlreadyReserved
                | ReservationOutcome::AlreadyReleased,
            ) => Disposition::Ack,
            Ok(ReservationOutcome::Rejected { failed_items }) => {
                if delivery_count < self.config.max_rejection_redeliveries {
                    tracing::info!(
                        order_id = %order.order_id,
                        delivery_count,
                        "Insufficient stock, requeueing order"
                    );
                    return Disposition::Requeue;
                }

                tracing::warn!(
                    order_id = %order.order_id,
                    delivery_count,
                    "Giving up on order reservation"
                );
                let event = ReservationFailed {
                    order_id: order.order_id.clone(),
                    failed_items,
                };
                let envelope = EventEnvelope::new(routing::RESERVATION_FAILED, event)
                    .with_correlation_id(order.order_id.as_str());
                match self
                    .service
                    .publisher()
                    .publish(routing::RESERVATION_FAILED, &envelope)
                    .await
                {
                    Ok(()) => Disposition::Discard,
                    Err(e) => {
                        tracing::error!(error = %e, "Could not publish reservation failure");
                        Disposition::Requeue
                    }
                }
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(order_id = %order.order_id, error = %e, "Reservation will be retried");
                Disposition::Requeue
            }
            Err(e) => {
                tracing::warn!(order_id = %order.order_id, error = %e, "Invalid order, discarding");
                Disposition::Discard
            }
        }
    }

    async fn on_order_cancelled(&self, order: &OrderCancelled) -> Disposition {
        let lines: Vec<ReservationLine> = order.items.iter().map(ReservationLine::from).collect();
        let result = self
            .service
            .release_stock(order.order_id.clone(), lines, self.config.operation_timeout)
            .await;

        match result {
            Ok(
                ReleaseResult::Released { .. }
                | ReleaseResult::NotReserved
                | ReleaseResult::AlreadyReleased,
            ) => Disposition::Ack,
            Err(e) if e.is_retryable() => {
                tracing::warn!(order_id = %order.order_id, error = %e, "Release will be retried");
                Disposition::Requeue
            }
            Err(e) => {
                tracing::warn!(order_id = %order.order_id, error = %e, "Invalid cancellation, discarding");
                Disposition::Discard
            }
        }
    }
}
