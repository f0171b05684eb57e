//! Domain events
use serde::Serialize;
use crate::domain::aggregates::PaymentStatus;
use crate::domain::value_objects::{CartId, IntentId, Money, OrderId, OwnerId};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Cart(CartEvent),
    Order(OrderEvent),
    Payment(PaymentEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    Expired { cart_id: CartId, owner_id: OwnerId, released_units: u32 },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: OrderId, owner_id: OwnerId, grand_total: Money },
    Paid { order_id: OrderId, owner_id: OwnerId },
    Cancelled { order_id: OrderId, reason: String },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    StatusChanged { intent_id: IntentId, order_id: OrderId, from: PaymentStatus, to: PaymentStatus },
}

impl DomainEvent {
    /// Subject suffix used when the event leaves the process.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cart(CartEvent::Expired { .. }) => "cart.expired",
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::Paid { .. }) => "order.paid",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
            Self::Payment(PaymentEvent::StatusChanged { .. }) => "payment.status_changed",
        }
    }
}
