//! Event consumer scenarios over the in-memory ledger and broker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use inventory::events::{ReservationFailed, routing};
use inventory::{ConsumerConfig, Disposition, EventConsumer, InventoryService};
use ledger::{InMemoryStockLedger, ItemId, NewItem, StockLedger};
use messaging::{
    Broker, EventEnvelope, EventPublisher, InMemoryBroker, OutboundMessage, Subscription,
};
use serde_json::{Value, json};

struct Harness {
    broker: InMemoryBroker,
    ledger: Arc<InMemoryStockLedger>,
    consumer: Arc<EventConsumer<InMemoryStockLedger>>,
    subscription: Subscription,
}

async fn harness(items: Vec<NewItem>) -> Harness {
    let broker = InMemoryBroker::new();
    let ledger = Arc::new(InMemoryStockLedger::with_items(items).await);
    let publisher = EventPublisher::new(Arc::new(broker.clone()), "inventory");
    let service = InventoryService::new(Arc::clone(&ledger), publisher);
    let consumer = Arc::new(EventConsumer::new(service, ConsumerConfig::new("inventory")));
    let subscription = consumer.subscribe(&broker).await.unwrap();

    Harness {
        broker,
        ledger,
        consumer,
        subscription,
    }
}

fn book(id: &str, quantity: i32) -> NewItem {
    NewItem::empty(id, format!("Book {id}"), "Fiction", 1599).with_quantity(quantity)
}

fn envelope(event_type: &str, payload: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event_id": "8d2f0f8e-51e5-4bd6-8a7a-2b44a3f6c2d1",
        "event_type": event_type,
        "event_version": "1.0.0",
        "timestamp": "2024-05-01T10:00:00Z",
        "payload": payload,
    }))
    .unwrap()
}

async fn send(broker: &InMemoryBroker, routing_key: &str, body: Vec<u8>) {
    broker
        .publish(OutboundMessage {
            routing_key: routing_key.to_string(),
            message_id: format!("{routing_key}-msg"),
            body,
            headers: BTreeMap::new(),
        })
        .await
        .unwrap();
}

fn order_created(order_id: &str, items: &[(&str, i32)]) -> Vec<u8> {
    let items: Vec<Value> = items
        .iter()
        .map(|(sku, quantity)| json!({"sku": sku, "quantity": quantity, "price": 15.99}))
        .collect();
    envelope(
        "order.created",
        json!({"order_id": order_id, "user_id": "user-1", "items": items}),
    )
}

impl Harness {
    /// Processes the next delivery on the inventory queue.
    async fn step(&mut self) -> (Disposition, u32) {
        let delivery = tokio::time::timeout(Duration::from_secs(1), self.subscription.next())
            .await
            .expect("no delivery arrived")
            .expect("subscription ended");
        let count = delivery.delivery_count;
        (self.consumer.process(delivery).await.unwrap(), count)
    }

    async fn quantity(&self, id: &str) -> Option<i32> {
        self.ledger.quantity_of(&ItemId::new(id)).await
    }
}

#[tokio::test]
async fn order_created_reserves_and_acks() {
    let mut h = harness(vec![book("BOOK-001", 10)]).await;
    send(&h.broker, "order.created", order_created("ord-1", &[("BOOK-001", 3)])).await;

    assert_eq!(h.step().await, (Disposition::Ack, 1));
    assert_eq!(h.quantity("BOOK-001").await, Some(7));
    assert_eq!(h.broker.published_with_key(routing::STOCK_RESERVED).await.len(), 1);
    assert_eq!(h.broker.stats().await.acked, 1);
}

#[tokio::test]
async fn insufficient_second_line_requeues_and_changes_nothing() {
    let mut h = harness(vec![book("BOOK-001", 5), book("BOOK-002", 1)]).await;
    send(
        &h.broker,
        "order.created",
        order_created("ord-1", &[("BOOK-001", 2), ("BOOK-002", 3)]),
    )
    .await;

    assert_eq!(h.step().await, (Disposition::Requeue, 1));
    assert_eq!(h.quantity("BOOK-001").await, Some(5));
    assert_eq!(h.quantity("BOOK-002").await, Some(1));
    assert_eq!(h.broker.stats().await.requeued, 1);
}

#[tokio::test]
async fn replenished_stock_lets_a_requeued_order_through() {
    let mut h = harness(vec![book("BOOK-001", 1)]).await;
    send(&h.broker, "order.created", order_created("ord-1", &[("BOOK-001", 2)])).await;

    assert_eq!(h.step().await, (Disposition::Requeue, 1));

    h.ledger
        .adjust_quantity(&ItemId::new("BOOK-001"), 5)
        .await
        .unwrap();

    assert_eq!(h.step().await, (Disposition::Ack, 2));
    assert_eq!(h.quantity("BOOK-001").await, Some(4));
}

#[tokio::test]
async fn rejection_redeliveries_are_bounded() {
    let mut h = harness(vec![book("BOOK-001", 1)]).await;
    send(&h.broker, "order.created", order_created("ord-1", &[("BOOK-001", 2)])).await;

    assert_eq!(h.step().await, (Disposition::Requeue, 1));
    assert_eq!(h.step().await, (Disposition::Requeue, 2));
    assert_eq!(h.step().await, (Disposition::Discard, 3));

    let failures = h.broker.published_with_key(routing::RESERVATION_FAILED).await;
    assert_eq!(failures.len(), 1);
    let event: EventEnvelope<ReservationFailed> = serde_json::from_slice(&failures[0].body).unwrap();
    assert_eq!(event.payload.order_id.as_str(), "ord-1");
    assert_eq!(event.payload.failed_items[0].available, 1);
    assert_eq!(event.correlation_id.as_deref(), Some("ord-1"));

    let dead = h.broker.dead_letters("inventory.inventory.dlq").await;
    assert_eq!(dead.len(), 1);
    assert_eq!(h.quantity("BOOK-001").await, Some(1));
}

#[tokio::test]
async fn storage_outage_requeues_until_recovery() {
    let mut h = harness(vec![book("BOOK-001", 10)]).await;
    h.ledger.set_unavailable(true);
    send(&h.broker, "order.created", order_created("ord-1", &[("BOOK-001", 1)])).await;

    assert_eq!(h.step().await, (Disposition::Requeue, 1));

    h.ledger.set_unavailable(false);
    assert_eq!(h.step().await, (Disposition::Ack, 2));
    assert_eq!(h.quantity("BOOK-001").await, Some(9));
}

#[tokio::test]
async fn redelivered_order_is_not_reserved_twice() {
    let mut h = harness(vec![book("BOOK-001", 10)]).await;
    let body = order_created("ord-1", &[("BOOK-001", 4)]);
    send(&h.broker, "order.created", body.clone()).await;
    send(&h.broker, "order.created", body).await;

    assert_eq!(h.step().await.0, Disposition::Ack);
    assert_eq!(h.step().await.0, Disposition::Ack);
    assert_eq!(h.quantity("BOOK-001").await, Some(6));
    assert_eq!(h.broker.published_with_key(routing::STOCK_RESERVED).await.len(), 1);
}

#[tokio::test]
async fn cancellation_restores_stock_once() {
    let mut h = harness(vec![book("BOOK-001", 10)]).await;
    let cancelled = envelope(
        "order.cancelled",
        json!({
            "order_id": "ord-1",
            "reason": "customer request",
            "items": [{"sku": "BOOK-001", "quantity": 3, "price": 15.99}]
        }),
    );

    send(&h.broker, "order.created", order_created("ord-1", &[("BOOK-001", 3)])).await;
    send(&h.broker, "order.cancelled", cancelled.clone()).await;
    send(&h.broker, "order.cancelled", cancelled).await;

    for _ in 0..3 {
        assert_eq!(h.step().await.0, Disposition::Ack);
    }
    assert_eq!(h.quantity("BOOK-001").await, Some(10));
    assert_eq!(h.broker.published_with_key(routing::STOCK_RELEASED).await.len(), 1);
}

#[tokio::test]
async fn cancelling_a_rejected_order_adds_no_stock() {
    let mut h = harness(vec![book("BOOK-001", 1)]).await;
    send(&h.broker, "order.created", order_created("ord-1", &[("BOOK-001", 2)])).await;
    for _ in 0..3 {
        h.step().await;
    }

    let cancelled = envelope(
        "order.cancelled",
        json!({
            "order_id": "ord-1",
            "reason": "payment failed",
            "items": [{"sku": "BOOK-001", "quantity": 2, "price": 15.99}]
        }),
    );
    send(&h.broker, "order.cancelled", cancelled).await;

    assert_eq!(h.step().await.0, Disposition::Ack);
    assert_eq!(h.quantity("BOOK-001").await, Some(1));
    assert!(h.broker.published_with_key(routing::STOCK_RELEASED).await.is_empty());
}

#[tokio::test]
async fn malformed_messages_are_dead_lettered() {
    let mut h = harness(vec![book("BOOK-001", 10)]).await;

    send(&h.broker, "order.created", b"{\"event_id\": 42".to_vec()).await;
    send(
        &h.broker,
        "order.created",
        envelope("order.created", json!({"order_id": "ord-1"})),
    )
    .await;
    send(
        &h.broker,
        "order.created",
        order_created("ord-2", &[("BOOK-001", 0)]),
    )
    .await;

    for _ in 0..3 {
        assert_eq!(h.step().await, (Disposition::Discard, 1));
    }
    assert_eq!(h.broker.dead_letters("inventory.inventory.dlq").await.len(), 3);
    assert_eq!(h.quantity("BOOK-001").await, Some(10));
}

#[tokio::test]
async fn unknown_routing_keys_are_discarded() {
    let h = harness(vec![]).await;
    let body = envelope("payment.succeeded", json!({"order_id": "ord-1"}));

    assert_eq!(
        h.consumer.handle("payment.succeeded", &body, 1).await,
        Disposition::Discard
    );
}

#[tokio::test]
async fn catalog_events_create_and_delete_items() {
    let mut h = harness(vec![]).await;
    send(
        &h.broker,
        "catalog.created",
        envelope(
            "catalog.created",
            json!({
                "sku": "BOOK-011", "title": "Dune", "author": "Frank Herbert",
                "price": 1899, "currency": "USD", "category": "SciFi", "active": true
            }),
        ),
    )
    .await;
    send(
        &h.broker,
        "catalog.deleted",
        envelope("catalog.deleted", json!({"sku": "BOOK-011"})),
    )
    .await;
    send(
        &h.broker,
        "catalog.deleted",
        envelope("catalog.deleted", json!({"sku": "BOOK-011"})),
    )
    .await;

    assert_eq!(h.step().await.0, Disposition::Ack);
    assert_eq!(h.broker.published_with_key(routing::ITEM_CREATED).await.len(), 1);
    assert_eq!(h.step().await.0, Disposition::Ack);
    assert_eq!(h.quantity("BOOK-011").await, None);
    assert_eq!(h.step().await.0, Disposition::Ack);
    assert_eq!(h.broker.published_with_key(routing::ITEM_DELETED).await.len(), 1);
}

#[tokio::test]
async fn run_loop_stops_on_shutdown() {
    let h = harness(vec![]).await;
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let consumer = Arc::clone(&h.consumer);
    let worker = tokio::spawn(async move {
        consumer
            .run(h.subscription, async {
                let _ = stop_rx.await;
            })
            .await;
    });

    send(
        &h.broker,
        "catalog.created",
        envelope(
            "catalog.created",
            json!({"sku": "BOOK-012", "title": "Emma", "price": 999, "category": "Classic"}),
        ),
    )
    .await;

    let created = tokio::time::timeout(Duration::from_secs(2), async {
        while h.ledger.quantity_of(&ItemId::new("BOOK-012")).await.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(created.is_ok(), "consumer never processed the message");

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), worker)
        .await
        .expect("consumer did not stop")
        .unwrap();
}
