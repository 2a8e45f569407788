use thiserror::Error;

/// Errors raised by a broker connection.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The connection to the broker is closed.
    #[error("Broker connection closed")]
    ConnectionClosed,

    /// Sending or receiving failed at the transport level.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Declaring, binding or consuming a queue failed.
    #[error("Subscription to queue '{queue}' failed: {reason}")]
    Subscription { queue: String, reason: String },

    /// Acknowledging a delivery failed.
    #[error("Acknowledgment failed: {0}")]
    Acknowledgment(String),
}

/// Errors returned by [`crate::EventPublisher`].
#[derive(Debug, Error)]
pub enum PublishError {
    /// The event could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Every attempt failed.
    #[error("Failed to publish event after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The caller's deadline passed before a confirmation arrived.
    #[error("Publish cancelled: deadline exceeded")]
    Cancelled,
}
