use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    Item, ItemId, LedgerError, NewItem, ReleaseOutcome, ReservationLine, ReservationRequest,
    ReserveOutcome, Result, Shortfall, ShortfallReason, StockAdjustment, store::StockLedger,
};

const STATUS_RELEASED: &str = "released";

/// PostgreSQL-backed stock ledger.
///
/// Quantity mutations run in explicit transactions that lock the affected
/// rows with `SELECT ... FOR UPDATE`, always in ascending `item_id` order.
/// The `items` table also carries a `CHECK (quantity >= 0)` constraint.
#[derive(Clone)]
pub struct PostgresStockLedger {
    pool: PgPool,
}

impl PostgresStockLedger {
    /// Creates a new PostgreSQL stock ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_item(row: PgRow) -> Result<Item> {
        Ok(Item {
            item_id: ItemId::new(row.try_get::<String, _>("item_id")?),
            name: row.try_get("name")?,
            category: row.try_get("category")?,
            quantity: row.try_get("quantity")?,
            price_cents: row.try_get("price_cents")?,
        })
    }
}

#[async_trait]
impl StockLedger for PostgresStockLedger {
    async fn get_item(&self, item_id: &ItemId) -> Result<Option<Item>> {
        let row = sqlx::query(
            r#"
            SELECT item_id, name, category, quantity, price_cents
            FROM items
            WHERE item_id = $1
            "#,
        )
        .bind(item_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_item).transpose()
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, name, category, quantity, price_cents
            FROM items
            ORDER BY item_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn create_item(&self, item: NewItem) -> Result<bool> {
        if item.quantity < 0 {
            return Err(LedgerError::NegativeStock {
                item_id: item.item_id,
                available: 0,
                delta: item.quantity,
            });
        }

        let result = sqlx::query(
            r#"
            INSERT INTO items (item_id, name, category, quantity, price_cents)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (item_id) DO NOTHING
            "#,
        )
        .bind(item.item_id.as_str())
        .bind(&item.name)
        .bind(&item.category)
        .bind(item.quantity)
        .bind(item.price_cents)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_item(&self, item_id: &ItemId) -> Result<()> {
        let result = sqlx::query("DELETE FROM items WHERE item_id = $1")
            .bind(item_id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(item_id.clone()));
        }
        Ok(())
    }

    async fn adjust_quantity(&self, item_id: &ItemId, delta: i32) -> Result<StockAdjustment> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<i32> =
            sqlx::query_scalar("SELECT quantity FROM items WHERE item_id = $1 FOR UPDATE")
                .bind(item_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        let previous = previous.ok_or_else(|| LedgerError::NotFound(item_id.clone()))?;

        let current = previous
            .checked_add(delta)
            .ok_or_else(|| LedgerError::QuantityOverflow(item_id.clone()))?;
        if current < 0 {
            tx.rollback().await?;
            return Err(LedgerError::NegativeStock {
                item_id: item_id.clone(),
                available: previous,
                delta,
            });
        }

        sqlx::query("UPDATE items SET quantity = $1, updated_at = NOW() WHERE item_id = $2")
            .bind(current)
            .bind(item_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(StockAdjustment { previous, current })
    }

    async fn reserve(&self, request: &ReservationRequest) -> Result<ReserveOutcome> {
        let mut tx = self.pool.begin().await?;

        // Claiming the order row first makes a concurrent duplicate wait on
        // the primary key until this transaction finishes.
        let claimed = sqlx::query(
            r#"
            INSERT INTO order_reservations (order_id, status, items)
            VALUES ($1, 'reserved', $2)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(request.order_id().as_str())
        .bind(Json(request.lines()))
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            let status: String =
                sqlx::query_scalar("SELECT status FROM order_reservations WHERE order_id = $1")
                    .bind(request.order_id().as_str())
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Ok(if status == STATUS_RELEASED {
                ReserveOutcome::AlreadyReleased
            } else {
                ReserveOutcome::AlreadyReserved
            });
        }

        let item_ids = request.item_ids();
        let rows = sqlx::query(
            r#"
            SELECT item_id, quantity
            FROM items
            WHERE item_id = ANY($1)
            ORDER BY item_id ASC
            FOR UPDATE
            "#,
        )
        .bind(&item_ids)
        .fetch_all(&mut *tx)
        .await?;

        let mut available: HashMap<String, i32> = HashMap::with_capacity(rows.len());
        for row in rows {
            available.insert(row.try_get("item_id")?, row.try_get("quantity")?);
        }

        let shortfalls: Vec<Shortfall> = request
            .lines()
            .iter()
            .filter_map(|line| match available.get(line.item_id.as_str()) {
                None => Some(Shortfall {
                    item_id: line.item_id.clone(),
                    requested: line.quantity,
                    available: 0,
                    reason: ShortfallReason::NotFound,
                }),
                Some(&on_hand) if on_hand < line.quantity => Some(Shortfall {
                    item_id: line.item_id.clone(),
                    requested: line.quantity,
                    available: on_hand,
                    reason: ShortfallReason::Insufficient,
                }),
                Some(_) => None,
            })
            .collect();

        if !shortfalls.is_empty() {
            tx.rollback().await?;
            return Ok(ReserveOutcome::Rejected(shortfalls));
        }

        sqlx::query(
            r#"
            UPDATE items
            SET quantity = items.quantity - x.qty, updated_at = NOW()
            FROM UNNEST($1::text[], $2::int4[]) AS x(item_id, qty)
            WHERE items.item_id = x.item_id
            "#,
        )
        .bind(&item_ids)
        .bind(request.quantities())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ReserveOutcome::Applied)
    }

    async fn release(&self, request: &ReservationRequest) -> Result<ReleaseOutcome> {
        let mut tx = self.pool.begin().await?;

        // An order without a record gets a released tombstone and no stock.
        let tombstoned = sqlx::query(
            r#"
            INSERT INTO order_reservations (order_id, status, items)
            VALUES ($1, 'released', '[]'::jsonb)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(request.order_id().as_str())
        .execute(&mut *tx)
        .await?;

        if tombstoned.rows_affected() == 1 {
            tx.commit().await?;
            return Ok(ReleaseOutcome::NotReserved);
        }

        let record = sqlx::query(
            r#"
            SELECT status, items
            FROM order_reservations
            WHERE order_id = $1
            FOR UPDATE
            "#,
        )
        .bind(request.order_id().as_str())
        .fetch_one(&mut *tx)
        .await?;

        let status: String = record.try_get("status")?;
        if status == STATUS_RELEASED {
            tx.rollback().await?;
            return Ok(ReleaseOutcome::Duplicate);
        }
        let Json(reserved): Json<Vec<ReservationLine>> = record.try_get("items")?;

        let item_ids: Vec<String> = reserved
            .iter()
            .map(|line| line.item_id.as_str().to_string())
            .collect();
        let rows = sqlx::query(
            r#"
            SELECT item_id, quantity
            FROM items
            WHERE item_id = ANY($1)
            ORDER BY item_id ASC
            FOR UPDATE
            "#,
        )
        .bind(&item_ids)
        .fetch_all(&mut *tx)
        .await?;

        let mut on_hand: HashMap<String, i32> = HashMap::with_capacity(rows.len());
        for row in rows {
            on_hand.insert(row.try_get("item_id")?, row.try_get("quantity")?);
        }

        let mut released = Vec::with_capacity(reserved.len());
        let mut skipped = Vec::new();
        for line in reserved {
            match on_hand.get(line.item_id.as_str()) {
                None => skipped.push(line.item_id),
                Some(&quantity) => {
                    if quantity.checked_add(line.quantity).is_none() {
                        tx.rollback().await?;
                        return Err(LedgerError::QuantityOverflow(line.item_id));
                    }
                    released.push(line);
                }
            }
        }

        let released_ids: Vec<String> = released
            .iter()
            .map(|line| line.item_id.as_str().to_string())
            .collect();
        let released_quantities: Vec<i32> = released.iter().map(|line| line.quantity).collect();
        sqlx::query(
            r#"
            UPDATE items
            SET quantity = items.quantity + x.qty, updated_at = NOW()
            FROM UNNEST($1::text[], $2::int4[]) AS x(item_id, qty)
            WHERE items.item_id = x.item_id
            "#,
        )
        .bind(&released_ids)
        .bind(&released_quantities)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE order_reservations
            SET status = 'released', updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(request.order_id().as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ReleaseOutcome::Applied { released, skipped })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
