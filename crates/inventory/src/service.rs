use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ledger::{
    Item, ItemId, NewItem, OrderId, ReleaseOutcome, ReservationLine, ReservationRequest,
    ReserveOutcome, RequestError, Shortfall, StockAdjustment, StockLedger,
};
use messaging::{EventEnvelope, EventPublisher};
use serde::Serialize;
use tokio::time::Instant;

use crate::events::{
    ItemCreated, ItemDeleted, StockReleased, StockReserved, StockUpdated, routing,
};
use crate::{InventoryError, Result};

/// Reason recorded on `inventory.stock_updated` for admin adjustments.
pub const MANUAL_UPDATE_REASON: &str = "Manual update";

/// Answer to an availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub available_quantity: i32,
    pub message: String,
}

/// Outcome of a reservation that reached the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    Reserved,
    /// The order already holds its stock; nothing changed.
    AlreadyReserved,
    /// The order was released or cancelled before; it can not reserve again.
    AlreadyReleased,
    /// Stock was insufficient or an item is unknown; nothing changed.
    Rejected { failed_items: Vec<Shortfall> },
}

/// Outcome of a release that reached the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseResult {
    /// The reserved lines were returned to stock. Items that no longer exist
    /// are listed in `skipped`.
    Released {
        items: Vec<ReservationLine>,
        skipped: Vec<ItemId>,
    },
    /// The order never held stock. It is now closed and nothing changed.
    NotReserved,
    AlreadyReleased,
}

/// The reservation engine.
///
/// Every mutation is one ledger transaction, optionally bounded by a caller
/// deadline, followed by a confirmed publish of the matching event. A failed
/// publish is logged and never undoes the committed change.
pub struct InventoryService<L: StockLedger> {
    ledger: Arc<L>,
    publisher: EventPublisher,
}

impl<L: StockLedger> Clone for InventoryService<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            publisher: self.publisher.clone(),
        }
    }
}

impl<L: StockLedger> InventoryService<L> {
    pub fn new(ledger: Arc<L>, publisher: EventPublisher) -> Self {
        Self { ledger, publisher }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    #[tracing::instrument(skip(self), fields(item_id = %item_id))]
    pub async fn get_item(&self, item_id: &ItemId) -> Result<Item> {
        self.ledger
            .get_item(item_id)
            .await?
            .ok_or_else(|| InventoryError::NotFound(item_id.clone()))
    }

    pub async fn list_items(&self) -> Result<Vec<Item>> {
        Ok(self.ledger.list_items().await?)
    }

    /// Reports whether `requested` units could be reserved right now.
    ///
    /// Unknown items are reported as unavailable rather than as an error.
    #[tracing::instrument(skip(self), fields(item_id = %item_id))]
    pub async fn check_availability(
        &self,
        item_id: &ItemId,
        requested: i32,
    ) -> Result<Availability> {
        if requested <= 0 {
            return Err(RequestError::NonPositiveQuantity {
                item_id: item_id.clone(),
                quantity: requested,
            }
            .into());
        }

        let Some(item) = self.ledger.get_item(item_id).await? else {
            return Ok(Availability {
                available: false,
                available_quantity: 0,
                message: "Item not found".to_string(),
            });
        };

        let available = item.quantity >= requested;
        let message = if available {
            "Available".to_string()
        } else {
            format!(
                "Insufficient stock: requested={requested}, available={}",
                item.quantity
            )
        };

        Ok(Availability {
            available,
            available_quantity: item.quantity,
            message,
        })
    }

    /// Reserves every line for the order, or none of them.
    ///
    /// Insufficient stock is a [`ReservationOutcome::Rejected`] value, not an
    /// error. A repeated order is [`ReservationOutcome::AlreadyReserved`], or
    /// [`ReservationOutcome::AlreadyReleased`] once it has been released, and
    /// publishes nothing.
    #[tracing::instrument(skip(self, lines), fields(order_id = %order_id))]
    pub async fn reserve_stock(
        &self,
        order_id: OrderId,
        lines: impl IntoIterator<Item = ReservationLine>,
        deadline: Option<Duration>,
    ) -> Result<ReservationOutcome> {
        let deadline = deadline.map(|limit| Instant::now() + limit);
        let request = ReservationRequest::new(order_id, lines)?;

        let started = std::time::Instant::now();
        let outcome = within(deadline, self.ledger.reserve(&request)).await;
        metrics::histogram!("inventory_reservation_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let outcome = match outcome {
            Ok(ReserveOutcome::Applied) => ReservationOutcome::Reserved,
            Ok(ReserveOutcome::AlreadyReserved) => ReservationOutcome::AlreadyReserved,
            Ok(ReserveOutcome::AlreadyReleased) => ReservationOutcome::AlreadyReleased,
            Ok(ReserveOutcome::Rejected(failed_items)) => {
                ReservationOutcome::Rejected { failed_items }
            }
            Err(e) => {
                metrics::counter!("inventory_reservations_total", "outcome" => "error")
                    .increment(1);
                tracing::warn!(error = %e, "Reservation failed");
                return Err(e);
            }
        };

        match &outcome {
            ReservationOutcome::Reserved => {
                metrics::counter!("inventory_reservations_total", "outcome" => "reserved")
                    .increment(1);
                tracing::info!(lines = request.lines().len(), "Stock reserved");

                let event = StockReserved {
                    order_id: request.order_id().clone(),
                    items: request.lines().to_vec(),
                };
                self.announce(
                    routing::STOCK_RESERVED,
                    event,
                    Some(request.order_id().as_str()),
                    deadline,
                )
                .await;
            }
            ReservationOutcome::AlreadyReserved => {
                metrics::counter!("inventory_reservations_total", "outcome" => "duplicate")
                    .increment(1);
                tracing::info!("Order already reserved, skipping");
            }
            ReservationOutcome::AlreadyReleased => {
                metrics::counter!("inventory_reservations_total", "outcome" => "released_order")
                    .increment(1);
                tracing::warn!("Order already released, not reserving");
            }
            ReservationOutcome::Rejected { failed_items } => {
                metrics::counter!("inventory_reservations_total", "outcome" => "rejected")
                    .increment(1);
                tracing::info!(failed = failed_items.len(), "Reservation rejected");
            }
        }

        Ok(outcome)
    }

    /// Returns the order's reserved stock.
    ///
    /// Only the lines recorded at reservation time are returned; `lines` is
    /// validated but does not decide the amounts. An order that never held
    /// stock is closed without changing any quantity.
    #[tracing::instrument(skip(self, lines), fields(order_id = %order_id))]
    pub async fn release_stock(
        &self,
        order_id: OrderId,
        lines: impl IntoIterator<Item = ReservationLine>,
        deadline: Option<Duration>,
    ) -> Result<ReleaseResult> {
        let deadline = deadline.map(|limit| Instant::now() + limit);
        let request = ReservationRequest::new(order_id, lines)?;

        let result = match within(deadline, self.ledger.release(&request)).await {
            Ok(ReleaseOutcome::Applied { released, skipped }) => ReleaseResult::Released {
                items: released,
                skipped,
            },
            Ok(ReleaseOutcome::NotReserved) => ReleaseResult::NotReserved,
            Ok(ReleaseOutcome::Duplicate) => ReleaseResult::AlreadyReleased,
            Err(e) => {
                metrics::counter!("inventory_releases_total", "outcome" => "error").increment(1);
                tracing::warn!(error = %e, "Release failed");
                return Err(e);
            }
        };

        match &result {
            ReleaseResult::Released { items, skipped } => {
                metrics::counter!("inventory_releases_total", "outcome" => "released")
                    .increment(1);
                if !skipped.is_empty() {
                    tracing::warn!(skipped = ?skipped, "Released order references deleted items");
                }
                tracing::info!(lines = items.len(), "Stock released");

                let event = StockReleased {
                    order_id: request.order_id().clone(),
                    items: items.clone(),
                };
                self.announce(
                    routing::STOCK_RELEASED,
                    event,
                    Some(request.order_id().as_str()),
                    deadline,
                )
                .await;
            }
            ReleaseResult::NotReserved => {
                metrics::counter!("inventory_releases_total", "outcome" => "not_reserved")
                    .increment(1);
                tracing::info!("Order held no stock, nothing to release");
            }
            ReleaseResult::AlreadyReleased => {
                metrics::counter!("inventory_releases_total", "outcome" => "duplicate")
                    .increment(1);
                tracing::info!("Order already released, skipping");
            }
        }

        Ok(result)
    }

    /// Applies a manual stock adjustment.
    ///
    /// A delta that would leave negative stock fails with
    /// [`InventoryError::NegativeStock`] and changes nothing.
    #[tracing::instrument(skip(self), fields(item_id = %item_id))]
    pub async fn update_stock(
        &self,
        item_id: &ItemId,
        delta: i32,
        deadline: Option<Duration>,
    ) -> Result<StockAdjustment> {
        let deadline = deadline.map(|limit| Instant::now() + limit);

        let adjustment = match within(deadline, self.ledger.adjust_quantity(item_id, delta)).await
        {
            Ok(adjustment) => adjustment,
            Err(e) => {
                let outcome = match e {
                    InventoryError::NegativeStock { .. } => "rejected",
                    _ => "error",
                };
                metrics::counter!("inventory_stock_updates_total", "outcome" => outcome)
                    .increment(1);
                tracing::warn!(error = %e, "Stock update failed");
                return Err(e);
            }
        };

        metrics::counter!("inventory_stock_updates_total", "outcome" => "applied").increment(1);
        tracing::info!(
            previous = adjustment.previous,
            current = adjustment.current,
            "Stock updated"
        );

        let event = StockUpdated {
            item_id: item_id.clone(),
            previous_quantity: adjustment.previous,
            new_quantity: adjustment.current,
            delta: adjustment.delta(),
            reason: MANUAL_UPDATE_REASON.to_string(),
        };
        self.announce(routing::STOCK_UPDATED, event, None, deadline)
            .await;

        Ok(adjustment)
    }

    /// Inserts an item unless it already exists. Returns true if inserted.
    #[tracing::instrument(skip(self, item), fields(item_id = %item.item_id))]
    pub async fn create_item(&self, item: NewItem, correlation_id: Option<&str>) -> Result<bool> {
        let event = ItemCreated {
            item_id: item.item_id.clone(),
            name: item.name.clone(),
            category: item.category.clone(),
            quantity: item.quantity,
        };

        let inserted = self.ledger.create_item(item).await?;
        if inserted {
            tracing::info!("Inventory item created");
            self.announce(routing::ITEM_CREATED, event, correlation_id, None)
                .await;
        } else {
            tracing::debug!("Inventory item already exists");
        }
        Ok(inserted)
    }

    #[tracing::instrument(skip(self), fields(item_id = %item_id))]
    pub async fn delete_item(&self, item_id: &ItemId, correlation_id: Option<&str>) -> Result<()> {
        self.ledger.delete_item(item_id).await?;
        tracing::info!("Inventory item deleted");

        let event = ItemDeleted {
            item_id: item_id.clone(),
        };
        self.announce(routing::ITEM_DELETED, event, correlation_id, None)
            .await;
        Ok(())
    }

    pub fn publisher_healthy(&self) -> bool {
        self.publisher.is_healthy()
    }

    pub async fn ledger_healthy(&self) -> bool {
        self.ledger.ping().await.is_ok()
    }

    /// Publishes an event for a committed change. Failures are only logged.
    async fn announce<P: Serialize + Sync>(
        &self,
        routing_key: &str,
        payload: P,
        correlation_id: Option<&str>,
        deadline: Option<Instant>,
    ) {
        let mut envelope = EventEnvelope::new(routing_key, payload);
        if let Some(correlation_id) = correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }

        if let Err(e) = self
            .publisher
            .publish_until(routing_key, &envelope, deadline)
            .await
        {
            tracing::error!(
                routing_key,
                event_id = %envelope.event_id,
                error = %e,
                "Change committed but event not published"
            );
        }
    }
}

/// Runs a ledger call, failing with `DeadlineExceeded` once `deadline` passes.
///
/// Dropping the timed-out future rolls back any open transaction.
async fn within<T, F>(deadline: Option<Instant>, operation: F) -> Result<T>
where
    F: Future<Output = ledger::Result<T>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, operation)
            .await
            .map_err(|_| InventoryError::DeadlineExceeded)?
            .map_err(InventoryError::from),
        None => operation.await.map_err(InventoryError::from),
    }
}
