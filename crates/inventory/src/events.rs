//! Typed payloads of the events this service consumes and publishes.

use common::EventId;
use ledger::{ItemId, OrderId, ReservationLine, Shortfall};
use messaging::EventEnvelope;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Routing keys on the `bookstore.events` exchange.
pub mod routing {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_CANCELLED: &str = "order.cancelled";
    pub const CATALOG_CREATED: &str = "catalog.created";
    pub const CATALOG_DELETED: &str = "catalog.deleted";

    pub const STOCK_RESERVED: &str = "inventory.stock_reserved";
    pub const STOCK_RELEASED: &str = "inventory.stock_released";
    pub const STOCK_UPDATED: &str = "inventory.stock_updated";
    pub const ITEM_CREATED: &str = "inventory.created";
    pub const ITEM_DELETED: &str = "inventory.deleted";
    pub const RESERVATION_FAILED: &str = "order.reservation_failed";

    /// Keys the inventory queue is bound to.
    pub const CONSUMED: [&str; 4] = [
        ORDER_CREATED,
        ORDER_CANCELLED,
        CATALOG_CREATED,
        CATALOG_DELETED,
    ];
}

/// Highest `event_version` major this service understands.
pub const SUPPORTED_MAJOR_VERSION: u64 = 1;

// Published

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub order_id: OrderId,
    pub items: Vec<ReservationLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub order_id: OrderId,
    pub items: Vec<ReservationLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdated {
    pub item_id: ItemId,
    pub previous_quantity: i32,
    pub new_quantity: i32,
    pub delta: i32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreated {
    pub item_id: ItemId,
    pub name: String,
    pub category: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDeleted {
    pub item_id: ItemId,
}

/// Compensating event for an order whose stock could not be reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFailed {
    pub order_id: OrderId,
    pub failed_items: Vec<Shortfall>,
}

// Consumed

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderLine {
    pub sku: ItemId,
    pub quantity: i32,
    #[serde(default)]
    pub price: Option<f64>,
}

impl From<&OrderLine> for ReservationLine {
    fn from(line: &OrderLine) -> Self {
        ReservationLine::new(line.sku.clone(), line.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    #[serde(default)]
    pub user_id: Option<String>,
    pub items: Vec<OrderLine>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    #[serde(default)]
    pub reason: Option<String>,
    pub items: Vec<OrderLine>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogCreated {
    pub sku: ItemId,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    /// Price in cents.
    pub price: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogDeleted {
    pub sku: ItemId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    OrderCreated(OrderCreated),
    OrderCancelled(OrderCancelled),
    CatalogCreated(CatalogCreated),
    CatalogDeleted(CatalogDeleted),
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub event_id: EventId,
    pub correlation_id: Option<String>,
    pub event: InboundEvent,
}

/// Reasons an inbound message is rejected without processing.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unknown routing key: {0}")]
    UnknownRoutingKey(String),

    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("event_type '{event_type}' does not match routing key '{routing_key}'")]
    EventTypeMismatch {
        routing_key: String,
        event_type: String,
    },

    #[error("Unsupported event version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid {routing_key} payload: {reason}")]
    InvalidPayload { routing_key: String, reason: String },
}

/// Decodes and validates a message received under `routing_key`.
///
/// Unknown payload fields are ignored; missing or mistyped required fields,
/// blank identifiers and a newer major version are errors.
pub fn decode(routing_key: &str, body: &[u8]) -> Result<InboundMessage, DecodeError> {
    if !routing::CONSUMED.contains(&routing_key) {
        return Err(DecodeError::UnknownRoutingKey(routing_key.to_string()));
    }

    let envelope: EventEnvelope = serde_json::from_slice(body)?;
    if envelope.event_type != routing_key {
        return Err(DecodeError::EventTypeMismatch {
            routing_key: routing_key.to_string(),
            event_type: envelope.event_type,
        });
    }
    if envelope.major_version() != Some(SUPPORTED_MAJOR_VERSION) {
        return Err(DecodeError::UnsupportedVersion(envelope.event_version));
    }

    let event = match routing_key {
        routing::ORDER_CREATED => {
            let payload: OrderCreated = payload(routing_key, envelope.payload)?;
            require(routing_key, !payload.order_id.is_blank(), "order_id is blank")?;
            InboundEvent::OrderCreated(payload)
        }
        routing::ORDER_CANCELLED => {
            let payload: OrderCancelled = payload(routing_key, envelope.payload)?;
            require(routing_key, !payload.order_id.is_blank(), "order_id is blank")?;
            InboundEvent::OrderCancelled(payload)
        }
        routing::CATALOG_CREATED => {
            let payload: CatalogCreated = payload(routing_key, envelope.payload)?;
            require(routing_key, !payload.sku.is_blank(), "sku is blank")?;
            require(routing_key, payload.price >= 0, "price is negative")?;
            InboundEvent::CatalogCreated(payload)
        }
        _ => {
            let payload: CatalogDeleted = payload(routing_key, envelope.payload)?;
            require(routing_key, !payload.sku.is_blank(), "sku is blank")?;
            InboundEvent::CatalogDeleted(payload)
        }
    };

    Ok(InboundMessage {
        event_id: envelope.event_id,
        correlation_id: envelope.correlation_id,
        event,
    })
}

fn payload<T: DeserializeOwned>(
    routing_key: &str,
    value: serde_json::Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidPayload {
        routing_key: routing_key.to_string(),
        reason: e.to_string(),
    })
}

fn require(routing_key: &str, condition: bool, reason: &str) -> Result<(), DecodeError> {
    if condition {
        Ok(())
    } else {
        Err(DecodeError::InvalidPayload {
            routing_key: routing_key.to_string(),
            reason: reason.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn body(event_type: &str, version: &str, payload: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event_id": "0b3e6a34-0c39-4b88-9b1a-6f3de2b9d7a1",
            "event_type": event_type,
            "event_version": version,
            "timestamp": "2024-05-01T10:00:00Z",
            "correlation_id": "corr-1",
            "payload": payload,
        }))
        .unwrap()
    }

    #[test]
    fn decodes_order_created_ignoring_unknown_fields() {
        let raw = body(
            "order.created",
            "1.2.0",
            json!({
                "order_id": "ord-1",
                "user_id": "user-9",
                "items": [{"sku": "BOOK-001", "quantity": 2, "price": 15.99, "gift": true}],
                "shipping": {"city": "Lima"}
            }),
        );

        let message = decode("order.created", &raw).unwrap();
        assert_eq!(message.correlation_id.as_deref(), Some("corr-1"));
        match message.event {
            InboundEvent::OrderCreated(order) => {
                assert_eq!(order.order_id.as_str(), "ord-1");
                assert_eq!(order.items[0].sku.as_str(), "BOOK-001");
                assert_eq!(order.items[0].quantity, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn decodes_catalog_created_with_defaults() {
        let raw = body(
            "catalog.created",
            "1.0.0",
            json!({"sku": "BOOK-011", "title": "Dune", "price": 1899}),
        );

        match decode("catalog.created", &raw).unwrap().event {
            InboundEvent::CatalogCreated(created) => {
                assert_eq!(created.price, 1899);
                assert_eq!(created.category, "");
                assert!(created.active);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_routing_keys() {
        let raw = body("payment.succeeded", "1.0.0", json!({}));
        assert!(matches!(
            decode("payment.succeeded", &raw),
            Err(DecodeError::UnknownRoutingKey(_))
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            decode("order.created", b"{not json"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_payload_missing_required_fields() {
        let raw = body("order.created", "1.0.0", json!({"order_id": "ord-1"}));
        assert!(matches!(
            decode("order.created", &raw),
            Err(DecodeError::InvalidPayload { .. })
        ));

        let raw = body("catalog.deleted", "1.0.0", json!({"sku": "  "}));
        assert!(matches!(
            decode("catalog.deleted", &raw),
            Err(DecodeError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn rejects_newer_major_versions() {
        let raw = body("order.cancelled", "2.0.0", json!({"order_id": "o", "items": []}));
        assert!(matches!(
            decode("order.cancelled", &raw),
            Err(DecodeError::UnsupportedVersion(v)) if v == "2.0.0"
        ));
    }

    #[test]
    fn rejects_event_type_that_disagrees_with_routing_key() {
        let raw = body("order.cancelled", "1.0.0", json!({"order_id": "o", "items": []}));
        assert!(matches!(
            decode("order.created", &raw),
            Err(DecodeError::EventTypeMismatch { .. })
        ));
    }

    #[test]
    fn outbound_payloads_use_snake_case_fields() {
        let failed = ReservationFailed {
            order_id: OrderId::new("ord-1"),
            failed_items: vec![Shortfall {
                item_id: ItemId::new("BOOK-002"),
                requested: 3,
                available: 1,
                reason: ledger::ShortfallReason::Insufficient,
            }],
        };

        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["order_id"], "ord-1");
        assert_eq!(value["failed_items"][0]["reason"], "insufficient");
    }
}
