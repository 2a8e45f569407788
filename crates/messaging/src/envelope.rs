use chrono::{DateTime, NaiveDateTime, Utc};
use common::EventId;
use serde::{Deserialize, Deserializer, Serialize};

/// Name of the topic exchange shared by the bookstore services.
pub const EXCHANGE_NAME: &str = "bookstore.events";

/// Schema version stamped on every event this service publishes.
pub const EVENT_VERSION: &str = "1.0.0";

/// The envelope wrapped around every event on the exchange.
///
/// The routing key of a message always equals its `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<P = serde_json::Value> {
    pub event_id: EventId,
    pub event_type: String,
    pub event_version: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub payload: P,
}

impl<P> EventEnvelope<P> {
    /// Creates an envelope with a fresh event ID and the current time.
    pub fn new(event_type: impl Into<String>, payload: P) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            event_version: EVENT_VERSION.to_string(),
            timestamp: Utc::now(),
            correlation_id: None,
            payload,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Major component of `event_version`, if it parses.
    pub fn major_version(&self) -> Option<u64> {
        self.event_version.split('.').next()?.parse().ok()
    }
}

/// Accepts RFC 3339 timestamps and offset-less ISO 8601 ones, read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}
