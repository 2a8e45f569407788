//! Inventory reservation engine.
//!
//! [`InventoryService`] applies reservations, releases and manual
//! adjustments to a [`ledger::StockLedger`] and announces every committed
//! change on the event exchange. [`EventConsumer`] drives the service from
//! the order lifecycle events of other services, and [`CatalogSync`] keeps
//! the set of inventory items aligned with the catalog.

pub mod catalog_sync;
pub mod consumer;
pub mod error;
pub mod events;
pub mod service;

pub use catalog_sync::CatalogSync;
pub use consumer::{ConsumerConfig, Disposition, EventConsumer};
pub use error::{InventoryError, Result};
pub use events::{DecodeError, InboundEvent, InboundMessage};
pub use service::{Availability, InventoryService, ReleaseResult, ReservationOutcome};
