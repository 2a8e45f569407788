use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ItemId, OrderId};

/// One line of a reservation or release: an item and a unit count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub item_id: ItemId,
    pub quantity: i32,
}

impl ReservationLine {
    /// Creates a reservation line.
    pub fn new(item_id: impl Into<ItemId>, quantity: i32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
        }
    }
}

/// Reasons a reservation request is malformed before it reaches storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("order_id is required")]
    BlankOrderId,

    #[error("at least one line item is required")]
    NoLines,

    #[error("item_id is required on every line")]
    BlankItemId,

    #[error("quantity for item {item_id} must be positive, got {quantity}")]
    NonPositiveQuantity { item_id: ItemId, quantity: i32 },

    #[error("combined quantity for item {0} overflows")]
    QuantityOverflow(ItemId),
}

/// A validated, canonical multi-item unit of work tied to one order.
///
/// Lines for the same item are merged and the result is sorted by
/// `item_id`, which is also the order in which row locks are taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    order_id: OrderId,
    lines: Vec<ReservationLine>,
}

impl ReservationRequest {
    /// Validates and canonicalizes a request.
    pub fn new(
        order_id: OrderId,
        lines: impl IntoIterator<Item = ReservationLine>,
    ) -> Result<Self, RequestError> {
        if order_id.is_blank() {
            return Err(RequestError::BlankOrderId);
        }

        let mut merged: BTreeMap<ItemId, i32> = BTreeMap::new();
        for line in lines {
            if line.item_id.is_blank() {
                return Err(RequestError::BlankItemId);
            }
            if line.quantity <= 0 {
                return Err(RequestError::NonPositiveQuantity {
                    item_id: line.item_id,
                    quantity: line.quantity,
                });
            }
            let entry = merged.entry(line.item_id.clone()).or_insert(0);
            *entry = entry
                .checked_add(line.quantity)
                .ok_or(RequestError::QuantityOverflow(line.item_id))?;
        }

        if merged.is_empty() {
            return Err(RequestError::NoLines);
        }

        let lines = merged
            .into_iter()
            .map(|(item_id, quantity)| ReservationLine { item_id, quantity })
            .collect();

        Ok(Self { order_id, lines })
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// Lines sorted by `item_id`, one per distinct item.
    pub fn lines(&self) -> &[ReservationLine] {
        &self.lines
    }

    pub(crate) fn item_ids(&self) -> Vec<String> {
        self.lines
            .iter()
            .map(|l| l.item_id.as_str().to_string())
            .collect()
    }

    pub(crate) fn quantities(&self) -> Vec<i32> {
        self.lines.iter().map(|l| l.quantity).collect()
    }
}

/// Why a line could not be reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallReason {
    NotFound,
    Insufficient,
}

/// A line that blocked a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub item_id: ItemId,
    pub requested: i32,
    pub available: i32,
    pub reason: ShortfallReason,
}

/// Result of applying a reservation to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Every line was decremented.
    Applied,
    /// The order already holds its stock; nothing changed.
    AlreadyReserved,
    /// The order was released or cancelled before; nothing changed and no
    /// stock is held for it.
    AlreadyReleased,
    /// At least one line could not be satisfied; nothing changed.
    Rejected(Vec<Shortfall>),
}

/// Result of applying a release to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The stock recorded for the order was returned. `released` lists the
    /// lines put back, `skipped` the reserved items that no longer exist.
    Applied {
        released: Vec<ReservationLine>,
        skipped: Vec<ItemId>,
    },
    /// The order held no stock. It is now recorded as released, so a later
    /// reservation for it is a no-op.
    NotReserved,
    /// The order was already released; nothing changed.
    Duplicate,
}
