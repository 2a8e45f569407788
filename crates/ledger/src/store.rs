use async_trait::async_trait;

use crate::{
    Item, ItemId, NewItem, ReleaseOutcome, ReservationRequest, ReserveOutcome, Result,
    StockAdjustment,
};

/// Core trait for stock ledger implementations.
///
/// A ledger exclusively owns item quantities. Every mutating method is a
/// single atomic transaction: it either commits completely or leaves the
/// ledger untouched. No committed state ever holds a negative quantity.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Retrieves an item. Returns None if it does not exist.
    async fn get_item(&self, item_id: &ItemId) -> Result<Option<Item>>;

    /// Retrieves all items ordered by `item_id`.
    async fn list_items(&self) -> Result<Vec<Item>>;

    /// Inserts an item unless one with the same ID already exists.
    ///
    /// Existing items are never overwritten. Returns true if a row was
    /// inserted.
    async fn create_item(&self, item: NewItem) -> Result<bool>;

    /// Deletes an item. Fails with `NotFound` if it does not exist.
    async fn delete_item(&self, item_id: &ItemId) -> Result<()>;

    /// Atomically adds `delta` to one item's quantity.
    ///
    /// Fails with `NegativeStock` instead of committing a negative result.
    async fn adjust_quantity(&self, item_id: &ItemId, delta: i32) -> Result<StockAdjustment>;

    /// Decrements every line of the request, or none of them.
    ///
    /// Row locks are acquired in the request's canonical `item_id` order.
    /// An order that already has a record is `AlreadyReserved` or
    /// `AlreadyReleased`, depending on its status. A rejected reservation
    /// leaves no record.
    async fn reserve(&self, request: &ReservationRequest) -> Result<ReserveOutcome>;

    /// Returns the stock recorded for the order within one transaction.
    ///
    /// Only the lines stored by `reserve` are incremented; the request lines
    /// never add stock. An order without a record is marked released and
    /// reported as `NotReserved`. An order that was already released is a
    /// `Duplicate`. Fails with `QuantityOverflow` before changing anything if
    /// an increment does not fit.
    async fn release(&self, request: &ReservationRequest) -> Result<ReleaseOutcome>;

    /// Checks that the underlying storage is reachable.
    async fn ping(&self) -> Result<()>;
}
