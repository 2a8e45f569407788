//! Engine scenarios over the in-memory ledger and broker.

use std::sync::Arc;

use inventory::{InventoryService, ReleaseResult, ReservationOutcome};
use ledger::{InMemoryStockLedger, ItemId, NewItem, OrderId, ReservationLine, ShortfallReason};
use messaging::{EventPublisher, InMemoryBroker};

async fn setup(items: Vec<NewItem>) -> (InventoryService<InMemoryStockLedger>, InMemoryBroker) {
    let broker = InMemoryBroker::new();
    let ledger = Arc::new(InMemoryStockLedger::with_items(items).await);
    let publisher = EventPublisher::new(Arc::new(broker.clone()), "inventory");
    (InventoryService::new(ledger, publisher), broker)
}

fn book(id: &str, quantity: i32) -> NewItem {
    NewItem::empty(id, format!("Book {id}"), "Fiction", 1599).with_quantity(quantity)
}

async fn quantity(service: &InventoryService<InMemoryStockLedger>, id: &str) -> i32 {
    service.get_item(&ItemId::new(id)).await.unwrap().quantity
}

#[tokio::test]
async fn book_001_scenario() {
    let (service, _) = setup(vec![book("BOOK-001", 10)]).await;

    let first = service
        .reserve_stock(
            OrderId::new("order-1"),
            vec![ReservationLine::new("BOOK-001", 3)],
            None,
        )
        .await
        .unwrap();
    assert_eq!(first, ReservationOutcome::Reserved);
    assert_eq!(quantity(&service, "BOOK-001").await, 7);

    let second = service
        .reserve_stock(
            OrderId::new("order-2"),
            vec![ReservationLine::new("BOOK-001", 8)],
            None,
        )
        .await
        .unwrap();
    match second {
        ReservationOutcome::Rejected { failed_items } => {
            assert_eq!(failed_items[0].item_id.as_str(), "BOOK-001");
            assert_eq!(failed_items[0].requested, 8);
            assert_eq!(failed_items[0].available, 7);
            assert_eq!(failed_items[0].reason, ShortfallReason::Insufficient);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(quantity(&service, "BOOK-001").await, 7);

    let released = service
        .release_stock(
            OrderId::new("order-1"),
            vec![ReservationLine::new("BOOK-001", 3)],
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        released,
        ReleaseResult::Released {
            items: vec![ReservationLine::new("BOOK-001", 3)],
            skipped: vec![],
        }
    );
    assert_eq!(quantity(&service, "BOOK-001").await, 10);

    // order-2 was rejected, so cancelling it returns nothing.
    let cancelled = service
        .release_stock(
            OrderId::new("order-2"),
            vec![ReservationLine::new("BOOK-001", 8)],
            None,
        )
        .await
        .unwrap();
    assert_eq!(cancelled, ReleaseResult::NotReserved);
    assert_eq!(quantity(&service, "BOOK-001").await, 10);
}

#[tokio::test]
async fn multi_item_reservation_is_all_or_nothing() {
    let (service, broker) = setup(vec![book("BOOK-001", 5), book("BOOK-002", 1)]).await;

    let outcome = service
        .reserve_stock(
            OrderId::new("order-1"),
            vec![
                ReservationLine::new("BOOK-001", 2),
                ReservationLine::new("BOOK-002", 2),
                ReservationLine::new("BOOK-404", 1),
            ],
            None,
        )
        .await
        .unwrap();

    match outcome {
        ReservationOutcome::Rejected { failed_items } => {
            let reasons: Vec<_> = failed_items
                .iter()
                .map(|s| (s.item_id.as_str().to_string(), s.reason))
                .collect();
            assert_eq!(
                reasons,
                vec![
                    ("BOOK-002".to_string(), ShortfallReason::Insufficient),
                    ("BOOK-404".to_string(), ShortfallReason::NotFound),
                ]
            );
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(quantity(&service, "BOOK-001").await, 5);
    assert_eq!(quantity(&service, "BOOK-002").await, 1);
    assert!(broker.published().await.is_empty());
}

#[tokio::test]
async fn duplicate_lines_are_merged_before_checking_stock() {
    let (service, _) = setup(vec![book("BOOK-001", 3)]).await;

    let outcome = service
        .reserve_stock(
            OrderId::new("order-1"),
            vec![
                ReservationLine::new("BOOK-001", 2),
                ReservationLine::new("BOOK-001", 2),
            ],
            None,
        )
        .await
        .unwrap();

    assert!(matches!(outcome, ReservationOutcome::Rejected { .. }));
    assert_eq!(quantity(&service, "BOOK-001").await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_oversell() {
    let n = 25;
    let (service, _) = setup(vec![book("BOOK-001", n - 1)]).await;

    let mut handles = Vec::new();
    for i in 0..n {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .reserve_stock(
                    OrderId::new(format!("order-{i}")),
                    vec![ReservationLine::new("BOOK-001", 1)],
                    None,
                )
                .await
                .unwrap()
        }));
    }

    let mut reserved = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ReservationOutcome::Reserved => reserved += 1,
            ReservationOutcome::Rejected { .. } => rejected += 1,
            other => panic!("orders are distinct, got {other:?}"),
        }
    }

    assert_eq!(reserved, n - 1);
    assert_eq!(rejected, 1);
    assert_eq!(quantity(&service, "BOOK-001").await, 0);
}

#[tokio::test]
async fn release_without_prior_reservation_blocks_late_reserve() {
    let (service, _) = setup(vec![book("BOOK-001", 4)]).await;
    let lines = || vec![ReservationLine::new("BOOK-001", 1)];

    // Cancellation overtook creation.
    let released = service
        .release_stock(OrderId::new("order-1"), lines(), None)
        .await
        .unwrap();
    assert_eq!(released, ReleaseResult::NotReserved);
    assert_eq!(quantity(&service, "BOOK-001").await, 4);

    let late = service
        .reserve_stock(OrderId::new("order-1"), lines(), None)
        .await
        .unwrap();
    assert_eq!(late, ReservationOutcome::AlreadyReleased);
    assert_eq!(quantity(&service, "BOOK-001").await, 4);
}

#[tokio::test]
async fn release_skips_deleted_items() {
    let (service, _) = setup(vec![book("BOOK-001", 4), book("BOOK-002", 4)]).await;
    let lines = || {
        vec![
            ReservationLine::new("BOOK-001", 1),
            ReservationLine::new("BOOK-002", 1),
        ]
    };

    service
        .reserve_stock(OrderId::new("order-1"), lines(), None)
        .await
        .unwrap();
    service
        .delete_item(&ItemId::new("BOOK-002"), None)
        .await
        .unwrap();

    let released = service
        .release_stock(OrderId::new("order-1"), lines(), None)
        .await
        .unwrap();
    assert_eq!(
        released,
        ReleaseResult::Released {
            items: vec![ReservationLine::new("BOOK-001", 1)],
            skipped: vec![ItemId::new("BOOK-002")],
        }
    );
    assert_eq!(quantity(&service, "BOOK-001").await, 4);
}

#[tokio::test]
async fn release_returns_what_was_reserved_not_what_was_asked() {
    let (service, _) = setup(vec![book("BOOK-001", 10)]).await;

    service
        .reserve_stock(
            OrderId::new("order-1"),
            vec![ReservationLine::new("BOOK-001", 1)],
            None,
        )
        .await
        .unwrap();
    let released = service
        .release_stock(
            OrderId::new("order-1"),
            vec![ReservationLine::new("BOOK-001", 50)],
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        released,
        ReleaseResult::Released {
            items: vec![ReservationLine::new("BOOK-001", 1)],
            skipped: vec![],
        }
    );
    assert_eq!(quantity(&service, "BOOK-001").await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserves_and_releases_keep_stock_consistent() {
    let (service, _) = setup(vec![book("BOOK-001", 10), book("BOOK-002", 10)]).await;

    // Orders 0..30 are reserved and released from separate tasks, so either
    // may run first. Orders 30..40 are only reserved and keep their stock.
    let mut reserves = Vec::new();
    let mut releases = Vec::new();
    for i in 0..40 {
        let lines = match i {
            30.. => vec![ReservationLine::new("BOOK-001", 1)],
            _ if i % 2 == 0 => vec![
                ReservationLine::new("BOOK-001", 2),
                ReservationLine::new("BOOK-002", 1),
            ],
            _ => vec![
                ReservationLine::new("BOOK-002", 3),
                ReservationLine::new("BOOK-001", 1),
            ],
        };

        let reserver = service.clone();
        let reserve_lines = lines.clone();
        reserves.push(tokio::spawn(async move {
            let outcome = reserver
                .reserve_stock(OrderId::new(format!("order-{i}")), reserve_lines, None)
                .await
                .unwrap();
            let first = quantity(&reserver, "BOOK-001").await;
            let second = quantity(&reserver, "BOOK-002").await;
            (i, outcome, first.min(second))
        }));
        if i < 30 {
            let releaser = service.clone();
            releases.push(tokio::spawn(async move {
                let result = releaser
                    .release_stock(OrderId::new(format!("order-{i}")), lines, None)
                    .await
                    .unwrap();
                let first = quantity(&releaser, "BOOK-001").await;
                let second = quantity(&releaser, "BOOK-002").await;
                (result, first.min(second))
            }));
        }
    }

    let mut kept = 0;
    for handle in reserves {
        let (i, outcome, lowest) = handle.await.unwrap();
        assert!(lowest >= 0);
        if i >= 30 && outcome == ReservationOutcome::Reserved {
            kept += 1;
        }
    }
    for handle in releases {
        let (result, lowest) = handle.await.unwrap();
        assert!(lowest >= 0);
        assert!(matches!(
            result,
            ReleaseResult::Released { .. } | ReleaseResult::NotReserved
        ));
    }

    assert_eq!(quantity(&service, "BOOK-001").await, 10 - kept);
    assert_eq!(quantity(&service, "BOOK-002").await, 10);
}
