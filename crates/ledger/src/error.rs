use thiserror::Error;

use crate::ItemId;

/// Errors that can occur when interacting with the stock ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The item does not exist in the ledger.
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    /// Applying the delta would leave the item with negative stock.
    #[error(
        "Adjustment of {delta} on item {item_id} would go negative (available {available})"
    )]
    NegativeStock {
        item_id: ItemId,
        available: i32,
        delta: i32,
    },

    /// The resulting quantity does not fit the storage type.
    #[error("Quantity overflow on item {0}")]
    QuantityOverflow(ItemId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Returns true for failures of the storage layer itself, as opposed to
    /// business rejections of the requested operation.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            LedgerError::Database(_) | LedgerError::Migration(_) | LedgerError::Serialization(_)
        )
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
