//! HTTP route handlers.

pub mod health;
pub mod items;
pub mod metrics;
pub mod stock;
