//! Identifier types shared by every crate in the inventory workspace.

pub mod types;

pub use types::{EventId, ItemId, OrderId};
