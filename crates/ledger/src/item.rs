use serde::{Deserialize, Serialize};

use crate::ItemId;

/// An inventory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: ItemId,
    pub name: String,
    pub category: String,
    /// Units on hand. Never negative in a committed state.
    pub quantity: i32,
    pub price_cents: i64,
}

/// Attributes of an item to insert into the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub item_id: ItemId,
    pub name: String,
    pub category: String,
    pub quantity: i32,
    pub price_cents: i64,
}

impl NewItem {
    /// Creates an item with zero stock, the way catalog sync creates them.
    pub fn empty(
        item_id: impl Into<ItemId>,
        name: impl Into<String>,
        category: impl Into<String>,
        price_cents: i64,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            name: name.into(),
            category: category.into(),
            quantity: 0,
            price_cents,
        }
    }

    /// Sets the initial quantity.
    pub fn with_quantity(mut self, quantity: i32) -> Self {
        self.quantity = quantity;
        self
    }

    pub(crate) fn into_item(self) -> Item {
        Item {
            item_id: self.item_id,
            name: self.name,
            category: self.category,
            quantity: self.quantity,
            price_cents: self.price_cents,
        }
    }
}

/// Quantities before and after a single-item adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub previous: i32,
    pub current: i32,
}

impl StockAdjustment {
    /// Returns the applied delta.
    pub fn delta(&self) -> i32 {
        self.current - self.previous
    }
}
