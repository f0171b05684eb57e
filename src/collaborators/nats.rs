//! Domain event publishing over NATS

use async_trait::async_trait;

use super::EventPublisher;
use crate::domain::events::DomainEvent;

const SUBJECT_PREFIX: &str = "cart_engine";

#[derive(Clone)]
pub struct NatsPublisher { client: async_nats::Client }

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }

    pub fn subject(event: &DomainEvent) -> String { format!("{SUBJECT_PREFIX}.{}", event.name()) }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) {
        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, event = event.name(), "failed to encode domain event");
                return;
            }
        };
        if let Err(e) = self.client.publish(Self::subject(event), payload.into()).await {
            tracing::warn!(error = %e, event = event.name(), "failed to publish domain event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::OrderEvent;
    use crate::domain::value_objects::{OrderId, OwnerId};

    #[test]
    fn test_subject_naming() {
        let e = DomainEvent::Order(OrderEvent::Paid { order_id: OrderId::new(), owner_id: OwnerId::new() });
        assert_eq!(NatsPublisher::subject(&e), "cart_engine.order.paid");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["aggregate"], "order");
        assert_eq!(json["event"]["type"], "paid");
    }
}
