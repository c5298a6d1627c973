//! Hand-off of committed order events to NATS.

use crate::domain::OrderEvent;

/// Publishes order events when a NATS connection is configured. Publishing
/// happens after commit and never fails the operation that produced the event.
#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
    prefix: String,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>, prefix: impl Into<String>) -> Self {
        Self { nats, prefix: prefix.into() }
    }

    /// A publisher that drops every event.
    pub fn disabled() -> Self { Self::default() }

    pub fn subject(&self, event: &OrderEvent) -> String {
        if self.prefix.is_empty() { event.name().to_string() } else { format!("{}.{}", self.prefix, event.name()) }
    }

    pub async fn publish_all(&self, events: Vec<OrderEvent>) {
        let Some(client) = &self.nats else { return };
        for event in events {
            let subject = self.subject(&event);
            let payload = match serde_json::to_vec(&event) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(%subject, error = %e, "failed to encode order event");
                    continue;
                }
            };
            match client.publish(subject.clone(), payload.into()).await {
                Ok(()) => tracing::debug!(%subject, order_id = %event.order_id(), "published order event"),
                Err(e) => tracing::warn!(%subject, order_id = %event.order_id(), error = %e, "failed to publish order event"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_subject_naming() {
        let event = OrderEvent::Deleted { order_id: Uuid::now_v7() };
        assert_eq!(EventPublisher::new(None, "orders").subject(&event), "orders.deleted");
        assert_eq!(EventPublisher::disabled().subject(&event), "deleted");
    }

    #[test]
    fn test_event_payload_shape() {
        let order_id = Uuid::now_v7();
        let json = serde_json::to_value(OrderEvent::ItemRemoved { order_id, item_id: order_id }).unwrap();
        assert_eq!(json["type"], "item_removed");
        assert_eq!(json["order_id"], order_id.to_string());
    }

    #[tokio::test]
    async fn test_disabled_publisher_is_noop() {
        EventPublisher::disabled().publish_all(vec![OrderEvent::Deleted { order_id: Uuid::now_v7() }]).await;
    }
}
