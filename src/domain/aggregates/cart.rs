//! Cart Aggregate

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use crate::domain::value_objects::{CartId, Money, OwnerId, ProductId};

#[derive(Clone, Debug, Serialize)]
pub struct Cart {
    id: CartId,
    owner_id: OwnerId,
    lines: Vec<CartLine>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    revision: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    /// Price captured when the line was first added.
    pub unit_price: Money,
}

impl CartLine {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

impl Cart {
    pub fn for_owner(owner_id: OwnerId, now: DateTime<Utc>) -> Self {
        Self {
            id: CartId::new(), owner_id, lines: vec![], created_at: now,
            expires_at: None, is_active: true, revision: 0,
        }
    }

    pub fn id(&self) -> CartId { self.id }
    pub fn owner_id(&self) -> OwnerId { self.owner_id }
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn expires_at(&self) -> Option<DateTime<Utc>> { self.expires_at }
    pub fn is_active(&self) -> bool { self.is_active }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    /// Bumped on every mutation; checkout uses it to detect concurrent edits.
    pub fn revision(&self) -> u64 { self.revision }
    pub fn subtotal(&self) -> Money { self.lines.iter().map(CartLine::line_total).sum() }

    pub fn line(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|at| (at - now).max(Duration::zero()))
    }

    /// Adds `quantity` to an existing line or appends a new one. The first
    /// price snapshot for a product is kept.
    pub fn add_line(&mut self, product_id: ProductId, name: &str, quantity: u32, unit_price: Money) {
        if let Some(existing) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            existing.quantity += quantity;
        } else {
            self.lines.push(CartLine { product_id, name: name.to_string(), quantity, unit_price });
        }
        self.bump();
    }

    /// Sets the quantity of an existing line; zero drops it. Returns the
    /// previous quantity.
    pub fn set_line_quantity(&mut self, product_id: ProductId, quantity: u32) -> Result<u32, CartError> {
        let line = self.lines.iter_mut().find(|l| l.product_id == product_id).ok_or(CartError::ItemNotFound)?;
        let previous = line.quantity;
        if quantity == 0 {
            self.lines.retain(|l| l.product_id != product_id);
        } else {
            line.quantity = quantity;
        }
        self.bump();
        Ok(previous)
    }

    pub fn remove_line(&mut self, product_id: ProductId) -> Result<CartLine, CartError> {
        let idx = self.lines.iter().position(|l| l.product_id == product_id).ok_or(CartError::ItemNotFound)?;
        let line = self.lines.remove(idx);
        self.bump();
        Ok(line)
    }

    /// Empties the cart and drops its reservation window. The caller owns
    /// whatever stock the returned lines were holding.
    pub fn take_lines(&mut self) -> Vec<CartLine> {
        self.expires_at = None;
        self.bump();
        std::mem::take(&mut self.lines)
    }

    /// Slides the reservation window forward.
    pub fn refresh_expiry(&mut self, now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
        let at = now + ttl;
        self.expires_at = Some(at);
        at
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.expires_at = None;
        self.bump();
    }

    fn bump(&mut self) { self.revision += 1; }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("item not found in cart")]
    ItemNotFound,
}
