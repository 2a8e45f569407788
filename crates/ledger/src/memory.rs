use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Item, ItemId, LedgerError, NewItem, OrderId, ReleaseOutcome, ReservationLine,
    ReservationRequest, ReserveOutcome, Result, Shortfall, ShortfallReason, StockAdjustment,
    store::StockLedger,
};

/// Terminal state recorded per order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Reserved,
    Released,
}

#[derive(Debug, Default)]
struct LedgerState {
    items: BTreeMap<ItemId, Item>,
    orders: HashMap<OrderId, (OrderStatus, Vec<ReservationLine>)>,
}

/// In-memory stock ledger for testing and local runs.
///
/// Mutations are serialized by a single lock, which gives the same
/// all-or-nothing guarantees as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryStockLedger {
    state: Arc<RwLock<LedgerState>>,
    unavailable: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl InMemoryStockLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger pre-populated with the given items.
    pub async fn with_items(items: impl IntoIterator<Item = NewItem>) -> Self {
        let ledger = Self::new();
        {
            let mut state = ledger.state.write().await;
            for item in items {
                state
                    .items
                    .entry(item.item_id.clone())
                    .or_insert_with(|| item.into_item());
            }
        }
        ledger
    }

    /// Makes every subsequent call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delays every mutation by the given duration before it takes effect.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Returns the quantity of an item, if it exists.
    pub async fn quantity_of(&self, item_id: &ItemId) -> Option<i32> {
        self.state
            .read()
            .await
            .items
            .get(item_id)
            .map(|item| item.quantity)
    }

    /// Returns the recorded reservation status of an order.
    pub async fn order_status(&self, order_id: &OrderId) -> Option<OrderStatus> {
        self.state
            .read()
            .await
            .orders
            .get(order_id)
            .map(|(status, _)| *status)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn get_item(&self, item_id: &ItemId) -> Result<Option<Item>> {
        self.check_available()?;
        Ok(self.state.read().await.items.get(item_id).cloned())
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        self.check_available()?;
        Ok(self.state.read().await.items.values().cloned().collect())
    }

    async fn create_item(&self, item: NewItem) -> Result<bool> {
        self.check_available()?;
        if item.quantity < 0 {
            return Err(LedgerError::NegativeStock {
                item_id: item.item_id,
                available: 0,
                delta: item.quantity,
            });
        }

        let mut state = self.state.write().await;
        if state.items.contains_key(&item.item_id) {
            return Ok(false);
        }
        state.items.insert(item.item_id.clone(), item.into_item());
        Ok(true)
    }

    async fn delete_item(&self, item_id: &ItemId) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state
            .items
            .remove(item_id)
            .map(|_| ())
            .ok_or_else(|| LedgerError::NotFound(item_id.clone()))
    }

    async fn adjust_quantity(&self, item_id: &ItemId, delta: i32) -> Result<StockAdjustment> {
        self.check_available()?;
        self.simulate_latency().await;

        let mut state = self.state.write().await;
        let item = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| LedgerError::NotFound(item_id.clone()))?;

        let previous = item.quantity;
        let current = previous
            .checked_add(delta)
            .ok_or_else(|| LedgerError::QuantityOverflow(item_id.clone()))?;
        if current < 0 {
            return Err(LedgerError::NegativeStock {
                item_id: item_id.clone(),
                available: previous,
                delta,
            });
        }

        item.quantity = current;
        Ok(StockAdjustment { previous, current })
    }

    async fn reserve(&self, request: &ReservationRequest) -> Result<ReserveOutcome> {
        self.check_available()?;
        self.simulate_latency().await;

        let mut state = self.state.write().await;
        match state.orders.get(request.order_id()) {
            Some((OrderStatus::Reserved, _)) => return Ok(ReserveOutcome::AlreadyReserved),
            Some((OrderStatus::Released, _)) => return Ok(ReserveOutcome::AlreadyReleased),
            None => {}
        }

        let shortfalls: Vec<Shortfall> = request
            .lines()
            .iter()
            .filter_map(|line| match state.items.get(&line.item_id) {
                None => Some(Shortfall {
                    item_id: line.item_id.clone(),
                    requested: line.quantity,
                    available: 0,
                    reason: ShortfallReason::NotFound,
                }),
                Some(item) if item.quantity < line.quantity => Some(Shortfall {
                    item_id: line.item_id.clone(),
                    requested: line.quantity,
                    available: item.quantity,
                    reason: ShortfallReason::Insufficient,
                }),
                Some(_) => None,
            })
            .collect();

        if !shortfalls.is_empty() {
            return Ok(ReserveOutcome::Rejected(shortfalls));
        }

        for line in request.lines() {
            if let Some(item) = state.items.get_mut(&line.item_id) {
                item.quantity -= line.quantity;
            }
        }
        state.orders.insert(
            request.order_id().clone(),
            (OrderStatus::Reserved, request.lines().to_vec()),
        );

        Ok(ReserveOutcome::Applied)
    }

    async fn release(&self, request: &ReservationRequest) -> Result<ReleaseOutcome> {
        self.check_available()?;
        self.simulate_latency().await;

        let mut state = self.state.write().await;
        let reserved = match state.orders.get(request.order_id()) {
            Some((OrderStatus::Released, _)) => return Ok(ReleaseOutcome::Duplicate),
            Some((OrderStatus::Reserved, lines)) => lines.clone(),
            None => {
                state.orders.insert(
                    request.order_id().clone(),
                    (OrderStatus::Released, Vec::new()),
                );
                return Ok(ReleaseOutcome::NotReserved);
            }
        };

        // Validate every line before touching any of them.
        let mut released = Vec::with_capacity(reserved.len());
        let mut skipped = Vec::new();
        for line in &reserved {
            match state.items.get(&line.item_id) {
                None => skipped.push(line.item_id.clone()),
                Some(item) => {
                    if item.quantity.checked_add(line.quantity).is_none() {
                        return Err(LedgerError::QuantityOverflow(line.item_id.clone()));
                    }
                    released.push(line.clone());
                }
            }
        }

        for line in &released {
            if let Some(item) = state.items.get_mut(&line.item_id) {
                item.quantity += line.quantity;
            }
        }
        state.orders.insert(
            request.order_id().clone(),
            (OrderStatus::Released, reserved),
        );

        Ok(ReleaseOutcome::Applied { released, skipped })
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
