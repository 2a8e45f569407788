use ledger::{ItemId, LedgerError, RequestError};
use thiserror::Error;

/// Errors returned by the reservation engine.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    /// A manual adjustment would leave the item with negative stock.
    #[error("Insufficient stock for item {item_id}: available {available}, delta {delta}")]
    NegativeStock {
        item_id: ItemId,
        available: i32,
        delta: i32,
    },

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The ledger could not be reached. Retryable.
    #[error("Ledger unavailable: {0}")]
    Unavailable(#[source] LedgerError),
}

impl InventoryError {
    /// Whether the same call may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InventoryError::DeadlineExceeded | InventoryError::Unavailable(_)
        )
    }
}

impl From<LedgerError> for InventoryError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(item_id) => InventoryError::NotFound(item_id),
            LedgerError::NegativeStock {
                item_id,
                available,
                delta,
            } => InventoryError::NegativeStock {
                item_id,
                available,
                delta,
            },
            LedgerError::QuantityOverflow(item_id) => {
                InventoryError::InvalidRequest(RequestError::QuantityOverflow(item_id))
            }
            other => InventoryError::Unavailable(other),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, InventoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_business_errors_keep_their_meaning() {
        let err: InventoryError = LedgerError::NotFound(ItemId::new("BOOK-404")).into();
        assert!(matches!(err, InventoryError::NotFound(id) if id.as_str() == "BOOK-404"));

        let err: InventoryError = LedgerError::NegativeStock {
            item_id: ItemId::new("BOOK-001"),
            available: 2,
            delta: -5,
        }
        .into();
        assert!(matches!(err, InventoryError::NegativeStock { available: 2, delta: -5, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn storage_failures_are_retryable() {
        use ledger::{InMemoryStockLedger, StockLedger};

        let ledger = InMemoryStockLedger::new();
        ledger.set_unavailable(true);
        let err: InventoryError = ledger.list_items().await.unwrap_err().into();

        assert!(matches!(err, InventoryError::Unavailable(_)));
        assert!(err.is_retryable());
        assert!(InventoryError::DeadlineExceeded.is_retryable());
    }
}
