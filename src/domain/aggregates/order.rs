//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::cart::CartLine;
use crate::domain::aggregates::checkout::DeliverySelection;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::pricing::PriceBreakdown;
use crate::domain::value_objects::{CartId, OrderId, OwnerId};

#[derive(Clone, Debug, Serialize)]
pub struct Order {
    id: OrderId,
    order_number: u64,
    owner_id: OwnerId,
    cart_id: CartId,
    lines: Vec<CartLine>,
    delivery: DeliverySelection,
    pricing: PriceBreakdown,
    promo_code: Option<String>,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Paid, Processing, Shipped, Delivered, Cancelled }

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid) | (Pending, Cancelled)
                | (Paid, Processing) | (Paid, Cancelled)
                | (Processing, Shipped) | (Processing, Cancelled)
                | (Shipped, Delivered) | (Shipped, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Paid => "paid", Self::Processing => "processing",
            Self::Shipped => "shipped", Self::Delivered => "delivered", Self::Cancelled => "cancelled",
        }
    }
}

/// Everything an order is built from at the moment payment is initiated.
#[derive(Clone, Debug)]
pub struct PlacedCart {
    pub owner_id: OwnerId,
    pub cart_id: CartId,
    pub lines: Vec<CartLine>,
    pub delivery: DeliverySelection,
    pub pricing: PriceBreakdown,
    pub promo_code: Option<String>,
}

impl Order {
    pub fn place(order_number: u64, placed: PlacedCart, now: DateTime<Utc>) -> Self {
        let mut order = Self {
            id: OrderId::new(), order_number, owner_id: placed.owner_id, cart_id: placed.cart_id,
            lines: placed.lines, delivery: placed.delivery, pricing: placed.pricing,
            promo_code: placed.promo_code, status: OrderStatus::Pending,
            created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_id: order.id, owner_id: order.owner_id, grand_total: order.pricing.grand_total,
        }));
        order
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn order_number(&self) -> u64 { self.order_number }
    pub fn owner_id(&self) -> OwnerId { self.owner_id }
    pub fn cart_id(&self) -> CartId { self.cart_id }
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn delivery(&self) -> &DeliverySelection { &self.delivery }
    pub fn pricing(&self) -> &PriceBreakdown { &self.pricing }
    pub fn promo_code(&self) -> Option<&str> { self.promo_code.as_deref() }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn transition(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if self.status == next { return Err(OrderError::AlreadyInStatus(next)); }
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn mark_paid(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Paid)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Paid { order_id: self.id, owner_id: self.owner_id }));
        Ok(())
    }

    pub fn cancel(&mut self, reason: &str) -> Result<(), OrderError> {
        self.transition(OrderStatus::Cancelled)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id, reason: reason.to_string() }));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("order is already {0:?}")]
    AlreadyInStatus(OrderStatus),
    #[error("cannot move order from {from:?} to {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}
