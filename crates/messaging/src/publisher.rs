use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::{Broker, Confirmation, EventEnvelope, OutboundMessage, PublishError, RetryPolicy};

/// Publishes events with broker confirmations and bounded retries.
///
/// An attempt succeeds only when the broker confirms the message within
/// `confirm_timeout`. A refused message, a send error or a missed
/// confirmation triggers a retry after the policy's backoff, until
/// `max_attempts` is reached. Delivery is at-least-once: a confirmation that
/// arrives late can lead to a duplicate.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    source: String,
    policy: RetryPolicy,
    confirm_timeout: Duration,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn Broker>, source: impl Into<String>) -> Self {
        Self {
            broker,
            source: source.into(),
            policy: RetryPolicy::default(),
            confirm_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_confirm_timeout(mut self, confirm_timeout: Duration) -> Self {
        self.confirm_timeout = confirm_timeout;
        self
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Publishes without a caller deadline.
    pub async fn publish<P>(
        &self,
        routing_key: &str,
        envelope: &EventEnvelope<P>,
    ) -> Result<(), PublishError>
    where
        P: Serialize + Sync,
    {
        self.publish_until(routing_key, envelope, None).await
    }

    /// Publishes, giving up with [`PublishError::Cancelled`] once `deadline`
    /// passes. The deadline is checked before each backoff and bounds the
    /// wait for every confirmation.
    #[tracing::instrument(skip(self, envelope), fields(event_id = %envelope.event_id))]
    pub async fn publish_until<P>(
        &self,
        routing_key: &str,
        envelope: &EventEnvelope<P>,
        deadline: Option<Instant>,
    ) -> Result<(), PublishError>
    where
        P: Serialize + Sync,
    {
        let message = self.outbound(routing_key, envelope)?;
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let backoff = self.policy.backoff_for_retry(attempt - 1);
                if deadline.is_some_and(|deadline| Instant::now() + backoff >= deadline) {
                    return Err(self.cancelled(routing_key));
                }
                tokio::time::sleep(backoff).await;
            }

            metrics::counter!("events_publish_attempts_total").increment(1);

            let confirm_by = match deadline {
                Some(deadline) => deadline.min(Instant::now() + self.confirm_timeout),
                None => Instant::now() + self.confirm_timeout,
            };

            match tokio::time::timeout_at(confirm_by, self.broker.publish(message.clone())).await {
                Ok(Ok(Confirmation::Ack)) => {
                    metrics::counter!(
                        "events_published_total",
                        "routing_key" => routing_key.to_string()
                    )
                    .increment(1);
                    tracing::debug!(attempt, "Event published");
                    return Ok(());
                }
                Ok(Ok(Confirmation::Nack)) => {
                    last_error = "broker refused the message".to_string();
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(self.cancelled(routing_key));
                    }
                    last_error = format!(
                        "no confirmation within {}ms",
                        self.confirm_timeout.as_millis()
                    );
                }
            }

            tracing::warn!(attempt, error = %last_error, "Publish attempt failed");
        }

        metrics::counter!(
            "events_publish_failures_total",
            "routing_key" => routing_key.to_string()
        )
        .increment(1);
        tracing::error!(
            attempts = self.policy.max_attempts,
            error = %last_error,
            "Giving up on event"
        );

        Err(PublishError::Exhausted {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.broker.is_connected()
    }

    pub async fn close(&self) {
        self.broker.close().await;
    }

    fn outbound<P: Serialize>(
        &self,
        routing_key: &str,
        envelope: &EventEnvelope<P>,
    ) -> Result<OutboundMessage, PublishError> {
        let body = serde_json::to_vec(envelope)?;

        let mut headers = BTreeMap::new();
        headers.insert("content_type".to_string(), "application/json".to_string());
        headers.insert("event_type".to_string(), envelope.event_type.clone());
        headers.insert("event_version".to_string(), envelope.event_version.clone());
        headers.insert("source".to_string(), self.source.clone());

        Ok(OutboundMessage {
            routing_key: routing_key.to_string(),
            message_id: envelope.event_id.to_string(),
            body,
            headers,
        })
    }

    fn cancelled(&self, routing_key: &str) -> PublishError {
        metrics::counter!(
            "events_publish_failures_total",
            "routing_key" => routing_key.to_string()
        )
        .increment(1);
        tracing::warn!("Publish cancelled by deadline");
        PublishError::Cancelled
    }
}
