use ledger::{NewItem, StockLedger};

use crate::consumer::Disposition;
use crate::events::{CatalogCreated, CatalogDeleted};
use crate::{InventoryError, InventoryService};

/// Mirrors catalog additions and removals into the ledger.
///
/// New catalog entries start with zero stock. Both handlers are idempotent,
/// so a redelivered event is acknowledged without side effects.
pub struct CatalogSync<L: StockLedger> {
    service: InventoryService<L>,
}

impl<L: StockLedger> CatalogSync<L> {
    pub fn new(service: InventoryService<L>) -> Self {
        Self { service }
    }

    #[tracing::instrument(skip(self, event, correlation_id), fields(sku = %event.sku))]
    pub async fn handle_created(
        &self,
        event: &CatalogCreated,
        correlation_id: Option<&str>,
    ) -> Disposition {
        let item = NewItem::empty(
            event.sku.clone(),
            event.title.clone(),
            event.category.clone(),
            event.price,
        );

        match self.service.create_item(item, correlation_id).await {
            Ok(_) => Disposition::Ack,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create inventory item");
                settle_failure(&e)
            }
        }
    }

    #[tracing::instrument(skip(self, event, correlation_id), fields(sku = %event.sku))]
    pub async fn handle_deleted(
        &self,
        event: &CatalogDeleted,
        correlation_id: Option<&str>,
    ) -> Disposition {
        match self.service.delete_item(&event.sku, correlation_id).await {
            Ok(()) => Disposition::Ack,
            Err(InventoryError::NotFound(_)) => {
                tracing::info!("Inventory item already absent");
                Disposition::Ack
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to delete inventory item");
                settle_failure(&e)
            }
        }
    }
}

fn settle_failure(err: &InventoryError) -> Disposition {
    if err.is_retryable() {
        Disposition::Requeue
    } else {
        Disposition::Discard
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use ledger::{InMemoryStockLedger, ItemId};
    use messaging::{EventPublisher, InMemoryBroker};

    fn sync() -> (CatalogSync<InMemoryStockLedger>, Arc<InMemoryStockLedger>) {
        let ledger = Arc::new(InMemoryStockLedger::new());
        let publisher = EventPublisher::new(Arc::new(InMemoryBroker::new()), "inventory");
        let service = InventoryService::new(Arc::clone(&ledger), publisher);
        (CatalogSync::new(service), ledger)
    }

    fn created(sku: &str) -> CatalogCreated {
        CatalogCreated {
            sku: ItemId::new(sku),
            title: "The Hobbit".to_string(),
            author: Some("J.R.R. Tolkien".to_string()),
            price: 1299,
            currency: Some("USD".to_string()),
            category: "Fantasy".to_string(),
            active: true,
        }
    }

    #[tokio::test]
    async fn created_items_start_empty_and_redelivery_is_acked() {
        let (sync, ledger) = sync();

        assert_eq!(sync.handle_created(&created("BOOK-011"), None).await, Disposition::Ack);
        assert_eq!(sync.handle_created(&created("BOOK-011"), None).await, Disposition::Ack);

        let item = ledger.get_item(&ItemId::new("BOOK-011")).await.unwrap().unwrap();
        assert_eq!(item.quantity, 0);
        assert_eq!(item.name, "The Hobbit");
        assert_eq!(item.price_cents, 1299);
    }

    #[tokio::test]
    async fn deleting_an_absent_item_is_acked() {
        let (sync, _) = sync();
        let event = CatalogDeleted {
            sku: ItemId::new("BOOK-404"),
        };
        assert_eq!(sync.handle_deleted(&event, None).await, Disposition::Ack);
    }

    #[tokio::test]
    async fn storage_outage_requeues() {
        let (sync, ledger) = sync();
        ledger.set_unavailable(true);

        assert_eq!(
            sync.handle_created(&created("BOOK-011"), None).await,
            Disposition::Requeue
        );
        let event = CatalogDeleted {
            sku: ItemId::new("BOOK-011"),
        };
        assert_eq!(sync.handle_deleted(&event, None).await, Disposition::Requeue);
    }
}
