use crate::events::{BusError, DomainEvent, EventPublisher};
use async_nats::jetstream;
use async_trait::async_trait;
use tracing::debug;

/// Publishes domain events to NATS JetStream.
///
/// Subject format: `{prefix}.subscriptions.{category}`, `{prefix}.sync.…`
/// Payload: JSON-serialized [`DomainEvent`]
#[derive(Clone)]
pub struct NatsEventPublisher {
    jetstream: jetstream::Context,
    subject_prefix: String,
}

impl NatsEventPublisher {
    pub fn new(jetstream: jetstream::Context, subject_prefix: impl Into<String>) -> Self {
        Self {
            jetstream,
            subject_prefix: subject_prefix.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), BusError> {
        let subject = event.subject(&self.subject_prefix);
        let payload = serde_json::to_vec(event)
            .map_err(|e| BusError(format!("failed to serialize event: {}", e)))?;

        debug!(
            internal_user_id = %event.internal_user_id(),
            subject = %subject,
            "Publishing event to NATS"
        );

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| BusError(format!("publish to '{}' failed: {}", subject, e)))?
            .await
            .map_err(|e| BusError(format!("no ack for '{}': {}", subject, e)))?;

        Ok(())
    }
}
