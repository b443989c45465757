//! Domain event publishing.

use crate::domain::events::DomainEvent;

/// Publishes events as JSON to NATS when connected, otherwise only logs them.
#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    /// Never fails the caller.
    pub async fn publish(&self, event: DomainEvent) {
        let subject = event.subject();
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(subject, error = %e, "failed to encode event");
                return;
            }
        };
        match &self.nats {
            Some(client) => {
                if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                    tracing::warn!(subject, error = %e, "failed to publish event");
                }
            }
            None => tracing::debug!(subject, "event (no broker)"),
        }
    }
}
