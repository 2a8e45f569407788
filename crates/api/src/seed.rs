//! Demo catalog for local runs.

use ledger::{NewItem, StockLedger};

/// `(item_id, name, category, quantity, price_cents)`
const DEMO_BOOKS: [(&str, &str, &str, i32, i64); 10] = [
    ("BOOK-001", "The Great Gatsby", "Fiction", 100, 1599),
    ("BOOK-002", "To Kill a Mockingbird", "Fiction", 75, 1499),
    ("BOOK-003", "1984", "Science Fiction", 50, 1399),
    ("BOOK-004", "Pride and Prejudice", "Romance", 60, 1299),
    ("BOOK-005", "The Catcher in the Rye", "Fiction", 40, 1199),
    (
        "BOOK-006",
        "Harry Potter and the Sorcerer's Stone",
        "Fantasy",
        120,
        1999,
    ),
    ("BOOK-007", "The Hobbit", "Fantasy", 80, 1699),
    ("BOOK-008", "The Da Vinci Code", "Mystery", 90, 1499),
    ("BOOK-009", "The Alchemist", "Fiction", 70, 1399),
    ("BOOK-010", "The Chronicles of Narnia", "Fantasy", 65, 2299),
];

/// The demo books as new ledger items.
pub fn demo_items() -> Vec<NewItem> {
    DEMO_BOOKS
        .iter()
        .map(|&(item_id, name, category, quantity, price_cents)| {
            NewItem::empty(item_id, name, category, price_cents).with_quantity(quantity)
        })
        .collect()
}

/// Inserts the demo books that are missing. Existing rows keep their stock.
///
/// Writes straight to the ledger; no events are published.
pub async fn seed_demo_items<L: StockLedger + ?Sized>(ledger: &L) -> ledger::Result<usize> {
    let mut inserted = 0;
    for item in demo_items() {
        if ledger.create_item(item).await? {
            inserted += 1;
        }
    }
    tracing::info!(inserted, "Demo inventory seeded");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::{InMemoryStockLedger, ItemId};

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let ledger = InMemoryStockLedger::new();

        assert_eq!(seed_demo_items(&ledger).await.unwrap(), 10);
        ledger
            .adjust_quantity(&ItemId::new("BOOK-001"), -10)
            .await
            .unwrap();
        assert_eq!(seed_demo_items(&ledger).await.unwrap(), 0);

        assert_eq!(ledger.quantity_of(&ItemId::new("BOOK-001")).await, Some(90));
        assert_eq!(ledger.list_items().await.unwrap().len(), 10);
    }
}
