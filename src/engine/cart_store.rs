//! Cart Store
//!
//! One cart per owner, each behind its own async mutex. Catalog lookups run
//! before the lock is taken; stock arithmetic goes through the ledger, which
//! has its own per-product atomicity, so the cart lock only orders one
//! owner's mutations.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use super::scheduler::{ExpiryEntry, ExpiryHandle};
use super::stock_ledger::StockLedger;
use crate::collaborators::{Catalog, EventPublisher};
use crate::domain::aggregates::{Cart, CartLine};
use crate::domain::events::{CartEvent, DomainEvent};
use crate::domain::value_objects::{CartId, Money, OwnerId, ProductId};
use crate::{EngineError, Result};

/// What clients see of a cart.
#[derive(Clone, Debug, Serialize)]
pub struct CartSnapshot {
    pub cart_id: CartId,
    pub is_active: bool,
    pub lines: Vec<CartLine>,
    pub subtotal: Money,
    pub expires_at: Option<DateTime<Utc>>,
    pub remaining_ttl_seconds: Option<i64>,
    pub revision: u64,
}

impl CartSnapshot {
    fn of(cart: &Cart, now: DateTime<Utc>) -> Self {
        Self {
            cart_id: cart.id(),
            is_active: cart.is_active(),
            lines: cart.lines().to_vec(),
            subtotal: cart.subtotal(),
            expires_at: cart.expires_at(),
            remaining_ttl_seconds: cart.remaining_ttl(now).map(|d| d.num_seconds()),
            revision: cart.revision(),
        }
    }
}

pub struct CartStore {
    carts: DashMap<OwnerId, Arc<Mutex<Cart>>>,
    ledger: Arc<StockLedger>,
    catalog: Arc<dyn Catalog>,
    events: Arc<dyn EventPublisher>,
    expiry: ExpiryHandle,
    ttl: Duration,
}

impl CartStore {
    pub fn new(
        ledger: Arc<StockLedger>,
        catalog: Arc<dyn Catalog>,
        events: Arc<dyn EventPublisher>,
        expiry: ExpiryHandle,
        ttl: Duration,
    ) -> Self {
        Self { carts: DashMap::new(), ledger, catalog, events, expiry, ttl }
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    /// Carts currently holding a reservation window; a cart locked by a
    /// mutation in flight counts as active.
    pub fn active_carts(&self) -> usize {
        self.carts.iter().filter(|c| c.try_lock().map_or(true, |cart| cart.is_active())).count()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn add_item(&self, owner_id: OwnerId, product_id: ProductId, quantity: u32) -> Result<CartSnapshot> {
        if quantity == 0 {
            return Err(EngineError::InvalidQuantity);
        }
        let product = self.catalog.get_product(product_id).await?.ok_or(EngineError::ProductNotFound(product_id))?;
        if !product.is_sellable() {
            return Err(EngineError::ProductUnavailable(product_id));
        }
        self.ledger.restock(product_id, product.stock);

        let now = Utc::now();
        let slot = self.slot_or_create(owner_id, now);
        let (result, expired) = {
            let mut cart = slot.lock().await;
            let expired = self.sweep(&mut cart, now);
            if !cart.is_active() {
                *cart = Cart::for_owner(owner_id, now);
                tracing::info!(cart_id = %cart.id(), owner_id = %owner_id, "cart created");
            }
            let result = self.ledger.reserve(product_id, quantity).map(|()| {
                cart.add_line(product_id, &product.name, quantity, product.price);
                self.touch(&mut cart, now);
                CartSnapshot::of(&cart, now)
            });
            (result, expired)
        };
        self.publish(expired).await;
        result
    }

    /// Moves a line to `quantity`, reserving or releasing only the difference.
    /// Zero removes the line.
    pub async fn set_quantity(&self, owner_id: OwnerId, product_id: ProductId, quantity: u32) -> Result<CartSnapshot> {
        self.mutate(owner_id, |store, cart, now| {
            let current = cart.line(product_id).map(|l| l.quantity).ok_or(EngineError::ItemNotInCart(product_id))?;
            if quantity > current {
                store.ledger.reserve(product_id, quantity - current)?;
            }
            cart.set_line_quantity(product_id, quantity).map_err(|_| EngineError::ItemNotInCart(product_id))?;
            if quantity < current {
                store.ledger.release(product_id, current - quantity);
            }
            store.touch(cart, now);
            Ok(())
        })
        .await
    }

    pub async fn remove_item(&self, owner_id: OwnerId, product_id: ProductId) -> Result<CartSnapshot> {
        self.mutate(owner_id, |store, cart, now| {
            let line = cart.remove_line(product_id).map_err(|_| EngineError::ItemNotInCart(product_id))?;
            store.ledger.release(product_id, line.quantity);
            store.touch(cart, now);
            Ok(())
        })
        .await
    }

    /// Releases every line. The cart keeps its id and stays usable.
    pub async fn clear(&self, owner_id: OwnerId) -> Result<CartSnapshot> {
        self.mutate(owner_id, |store, cart, _| {
            let lines = cart.take_lines();
            let released = store.ledger.release_lines(&lines);
            tracing::info!(cart_id = %cart.id(), released, "cart cleared");
            Ok(())
        })
        .await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current view of the owner's cart; an overdue cart is swept first.
    pub async fn snapshot(&self, owner_id: OwnerId) -> Result<CartSnapshot> {
        let slot = self.slot(owner_id).ok_or(EngineError::CartNotFound)?;
        let now = Utc::now();
        let (snapshot, expired) = {
            let mut cart = slot.lock().await;
            let expired = self.sweep(&mut cart, now);
            (CartSnapshot::of(&cart, now), expired)
        };
        self.publish(expired).await;
        Ok(snapshot)
    }

    /// Copy of the cart for checkout validation. Fails with `CartExpired`
    /// when this read is what swept it.
    pub async fn current(&self, owner_id: OwnerId) -> Result<Cart> {
        let slot = self.slot(owner_id).ok_or(EngineError::CartNotFound)?;
        let now = Utc::now();
        let (cart, expired) = {
            let mut cart = slot.lock().await;
            let expired = self.sweep(&mut cart, now);
            (cart.clone(), expired)
        };
        if expired.is_some() {
            self.publish(expired).await;
            return Err(EngineError::CartExpired);
        }
        Ok(cart)
    }

    // =========================================================================
    // Expiry and hand-over
    // =========================================================================

    /// Timer entry point. Acts only if the cart is still active and its
    /// deadline is still `expected`; returns the released units if it did.
    pub async fn expire(&self, owner_id: OwnerId, cart_id: CartId, expected: DateTime<Utc>) -> Option<u32> {
        let slot = self.slot(owner_id)?;
        let (released, event) = {
            let mut cart = slot.lock().await;
            if cart.id() != cart_id || !cart.is_active() || cart.expires_at() != Some(expected) {
                return None;
            }
            self.expire_locked(&mut cart)
        };
        self.events.publish(&event).await;
        Some(released)
    }

    /// Empties and deactivates the cart without touching the ledger: the
    /// returned lines' reservations now belong to an order. Fails if the
    /// cart moved past `revision` since pricing was confirmed.
    pub async fn detach_for_order(&self, owner_id: OwnerId, cart_id: CartId, revision: u64) -> Result<Vec<CartLine>> {
        let slot = self.slot(owner_id).ok_or(EngineError::CartNotFound)?;
        let now = Utc::now();
        let (result, expired) = {
            let mut cart = slot.lock().await;
            let expired = self.sweep(&mut cart, now);
            let result = if expired.is_some() || (cart.id() == cart_id && !cart.is_active()) {
                Err(EngineError::CartExpired)
            } else if cart.id() != cart_id || cart.revision() != revision {
                Err(EngineError::CartChanged)
            } else if cart.is_empty() {
                Err(EngineError::EmptyCart)
            } else {
                let lines = cart.take_lines();
                cart.deactivate();
                tracing::info!(cart_id = %cart_id, lines = lines.len(), "cart handed over to order");
                Ok(lines)
            };
            (result, expired)
        };
        self.publish(expired).await;
        result
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn slot(&self, owner_id: OwnerId) -> Option<Arc<Mutex<Cart>>> {
        self.carts.get(&owner_id).map(|c| Arc::clone(c.value()))
    }

    fn slot_or_create(&self, owner_id: OwnerId, now: DateTime<Utc>) -> Arc<Mutex<Cart>> {
        let entry = self.carts.entry(owner_id).or_insert_with(|| {
            let cart = Cart::for_owner(owner_id, now);
            tracing::info!(cart_id = %cart.id(), owner_id = %owner_id, "cart created");
            Arc::new(Mutex::new(cart))
        });
        Arc::clone(entry.value())
    }

    async fn mutate<F>(&self, owner_id: OwnerId, op: F) -> Result<CartSnapshot>
    where
        F: FnOnce(&Self, &mut Cart, DateTime<Utc>) -> Result<()>,
    {
        let slot = self.slot(owner_id).ok_or(EngineError::CartNotFound)?;
        let now = Utc::now();
        let (result, expired) = {
            let mut cart = slot.lock().await;
            let expired = self.sweep(&mut cart, now);
            let result = if expired.is_some() {
                Err(EngineError::CartExpired)
            } else if !cart.is_active() {
                Err(EngineError::CartNotFound)
            } else {
                op(self, &mut *cart, now).map(|()| CartSnapshot::of(&cart, now))
            };
            (result, expired)
        };
        self.publish(expired).await;
        result
    }

    fn touch(&self, cart: &mut Cart, now: DateTime<Utc>) {
        let expires_at = cart.refresh_expiry(now, self.ttl);
        self.expiry.schedule(ExpiryEntry { owner_id: cart.owner_id(), cart_id: cart.id(), expires_at });
    }

    /// Lazy expiry, run under the cart lock before anything else.
    fn sweep(&self, cart: &mut Cart, now: DateTime<Utc>) -> Option<DomainEvent> {
        if cart.is_active() && cart.is_expired(now) {
            Some(self.expire_locked(cart).1)
        } else {
            None
        }
    }

    fn expire_locked(&self, cart: &mut Cart) -> (u32, DomainEvent) {
        let lines = cart.take_lines();
        let released = self.ledger.release_lines(&lines);
        cart.deactivate();
        tracing::info!(cart_id = %cart.id(), owner_id = %cart.owner_id(), released, "cart expired");
        let event = DomainEvent::Cart(CartEvent::Expired { cart_id: cart.id(), owner_id: cart.owner_id(), released_units: released });
        (released, event)
    }

    async fn publish(&self, event: Option<DomainEvent>) {
        if let Some(event) = event {
            self.events.publish(&event).await;
        }
    }
}
