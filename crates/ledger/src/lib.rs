//! Stock ledger for the inventory service.
//!
//! The ledger is the single source of truth for available stock. Every
//! quantity mutation goes through a [`StockLedger`] implementation, which
//! applies it atomically under row-level locking and never commits a
//! negative quantity.

pub mod error;
pub mod item;
pub mod memory;
pub mod postgres;
pub mod reservation;
pub mod store;

pub use common::{ItemId, OrderId};
pub use error::{LedgerError, Result};
pub use item::{Item, NewItem, StockAdjustment};
pub use memory::{InMemoryStockLedger, OrderStatus};
pub use postgres::PostgresStockLedger;
pub use reservation::{
    ReleaseOutcome, RequestError, ReservationLine, ReservationRequest, ReserveOutcome, Shortfall,
    ShortfallReason,
};
pub use store::StockLedger;
