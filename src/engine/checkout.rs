//! Checkout Orchestrator
//!
//! Drives a [`CheckoutSession`] from a cart to a paid or cancelled order.
//! Sessions are keyed by cart id with an owner index. The cart lock is
//! never held across a delivery or payment round-trip: the orchestrator
//! reads a cart copy, calls out, then validates the revision it priced.
//!
//! Stock ownership moves in one step: `initiate_payment` detaches the cart
//! lines (reservations intact) and deactivates the cart under its lock, so
//! an expiry timer firing afterwards finds nothing to release. From then on
//! the order's hold is either committed (payment succeeded) or released
//! (payment failed, checkout abandoned, reconciliation).
//!
//! Orders are journaled on every status change. Settled orders, closed
//! sessions and their intents leave memory after the retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::cart_store::CartStore;
use super::delivery::DeliveryCostResolver;
use super::payments::PaymentIntentTracker;
use super::stock_ledger::StockLedger;
use super::EngineSettings;
use crate::collaborators::{
    Catalog, ChargeRequest, Collaborators, EventPublisher, LoyaltyProgram, OrderRepository, PromoValidator,
};
use crate::domain::aggregates::{
    Cart, CheckoutSession, CheckoutState, DeliveryMethod, DeliverySelection, Order, OrderStatus, PaymentIntent,
    PaymentMethod, PaymentStatus, PlacedCart,
};
use crate::domain::events::DomainEvent;
use crate::domain::pricing::{price, PricingInput};
use crate::domain::value_objects::{CartId, IntentId, OrderId, OwnerId};
use crate::{EngineError, Result};

#[derive(Clone, Debug)]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    pub idempotency_key: String,
    pub return_url: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentStart {
    pub order: Order,
    pub intent: PaymentIntent,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentView {
    pub intent: PaymentIntent,
    pub order_status: OrderStatus,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub settled_intents: usize,
    pub cancelled_orders: usize,
    pub evicted_orders: usize,
}

type SessionSlot = Arc<Mutex<CheckoutSession>>;

pub struct CheckoutOrchestrator {
    carts: Arc<CartStore>,
    ledger: Arc<StockLedger>,
    delivery: Arc<DeliveryCostResolver>,
    payments: Arc<PaymentIntentTracker>,
    catalog: Arc<dyn Catalog>,
    promos: Arc<dyn PromoValidator>,
    loyalty: Arc<dyn LoyaltyProgram>,
    journal: Arc<dyn OrderRepository>,
    events: Arc<dyn EventPublisher>,
    sessions: DashMap<CartId, SessionSlot>,
    by_owner: DashMap<OwnerId, CartId>,
    orders: DashMap<OrderId, Order>,
    /// Orders whose latest state has not reached the journal yet.
    unsaved: DashSet<OrderId>,
    pending_timeout: chrono::Duration,
    retention: chrono::Duration,
}

fn order_number() -> u64 { u64::from(rand::random::<u32>()) }

impl CheckoutOrchestrator {
    pub fn new(
        carts: Arc<CartStore>,
        ledger: Arc<StockLedger>,
        delivery: Arc<DeliveryCostResolver>,
        payments: Arc<PaymentIntentTracker>,
        collaborators: &Collaborators,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            carts, ledger, delivery, payments,
            catalog: Arc::clone(&collaborators.catalog),
            promos: Arc::clone(&collaborators.promos),
            loyalty: Arc::clone(&collaborators.loyalty),
            journal: Arc::clone(&collaborators.orders),
            events: Arc::clone(&collaborators.events),
            sessions: DashMap::new(),
            by_owner: DashMap::new(),
            orders: DashMap::new(),
            unsaved: DashSet::new(),
            pending_timeout: settings.payment_pending_timeout,
            retention: settings.settled_retention,
        }
    }

    // =========================================================================
    // Session transitions
    // =========================================================================

    /// Opens checkout for the owner's cart, or returns the session already
    /// open for that same cart.
    pub async fn start(&self, owner_id: OwnerId) -> Result<CheckoutSession> {
        let cart = self.carts.current(owner_id).await;
        if let Some(slot) = self.session_slot(owner_id) {
            let mut session = slot.lock().await;
            if session.state() == CheckoutState::PaymentInitiated {
                return Ok(session.clone());
            }
            if session.is_open() {
                if let Ok(current) = &cart {
                    if current.id() == session.cart_id() && current.is_active() && !current.is_empty() {
                        tracing::debug!(cart_id = %current.id(), state = ?session.state(), "checkout resumed");
                        return Ok(session.clone());
                    }
                }
                let reason = if matches!(cart, Err(EngineError::CartExpired)) { "cart expired" } else { "cart replaced" };
                Self::abandon_open(&mut session, reason);
            }
        }

        let cart = match cart {
            Err(EngineError::CartNotFound) => return Err(EngineError::EmptyCart),
            other => other?,
        };
        if !cart.is_active() || cart.is_empty() {
            return Err(EngineError::EmptyCart);
        }
        let session = CheckoutSession::start(owner_id, cart.id(), cart.revision(), Utc::now());
        self.sessions.insert(cart.id(), Arc::new(Mutex::new(session.clone())));
        self.by_owner.insert(owner_id, cart.id());
        tracing::info!(cart_id = %cart.id(), owner_id = %owner_id, "checkout started");
        Ok(session)
    }

    /// Quotes delivery for the current cart contents. A failed quote leaves
    /// the session exactly as it was.
    pub async fn select_delivery(&self, owner_id: OwnerId, method: DeliveryMethod, target: String) -> Result<CheckoutSession> {
        let slot = self.session_slot(owner_id).ok_or(EngineError::CheckoutNotFound)?;
        let mut session = slot.lock().await;
        session.can_select_delivery()?;
        let cart = self.live_cart(&mut session).await?;

        let cost = self.delivery.resolve(method, &target, cart.lines()).await?;
        session.select_delivery(DeliverySelection { method, target, cost })?;
        tracing::info!(cart_id = %session.cart_id(), ?method, cost = %cost, "delivery selected");
        Ok(session.clone())
    }

    /// Prices the cart as it is now. If it moved since checkout started the
    /// session goes back to `Started` and `CartChanged` is returned.
    pub async fn confirm_pricing(&self, owner_id: OwnerId, promo_code: Option<String>) -> Result<CheckoutSession> {
        let slot = self.session_slot(owner_id).ok_or(EngineError::CheckoutNotFound)?;
        let mut session = slot.lock().await;
        session.can_confirm_pricing()?;
        let cart = self.live_cart(&mut session).await?;
        if cart.revision() != session.cart_revision() {
            session.restart(cart.revision())?;
            tracing::info!(cart_id = %cart.id(), "cart changed during checkout, restarting");
            return Err(EngineError::CartChanged);
        }

        let loyalty = self.loyalty.current_discount_percent(owner_id).await?;
        let promo_code = promo_code.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        let promo = match &promo_code {
            Some(code) => {
                let check = self.promos.validate(code).await?;
                if !check.valid {
                    return Err(EngineError::InvalidPromoCode(check.reason.unwrap_or_else(|| code.clone())));
                }
                Some(check.discount_percent)
            }
            None => None,
        };

        let pricing = price(&PricingInput {
            lines: cart.lines(),
            loyalty,
            promo,
            delivery_cost: session.delivery().map(|d| d.cost),
        });
        let grand_total = pricing.grand_total;
        session.confirm_pricing(pricing, promo_code, cart.revision())?;
        tracing::info!(cart_id = %cart.id(), grand_total = %grand_total, "pricing confirmed");
        Ok(session.clone())
    }

    /// Places the order and opens a payment intent for it. Calling it again
    /// while the payment is outstanding resumes the same order.
    ///
    /// The session stays locked until the intent is registered, so a
    /// concurrent `abandon` always finds the intent and cancels it.
    pub async fn initiate_payment(&self, owner_id: OwnerId, request: PaymentRequest) -> Result<PaymentStart> {
        let slot = self.session_slot(owner_id).ok_or(EngineError::CheckoutNotFound)?;
        let intent = {
            let mut session = slot.lock().await;
            let order = if session.state() == CheckoutState::PaymentInitiated {
                let order_id = session.order_id().ok_or(EngineError::CheckoutNotFound)?;
                self.order(order_id)?
            } else {
                let (order, placed_events) = self.place_order(&mut session, request.method).await?;
                for event in &placed_events {
                    self.events.publish(event).await;
                }
                order
            };
            let charge = ChargeRequest {
                order_id: order.id(),
                order_number: order.order_number(),
                amount: order.pricing().grand_total,
                method: request.method,
                return_url: request.return_url,
                idempotency_key: request.idempotency_key,
            };
            self.payments.create_intent(charge).await?
        };

        let order = match intent.status() {
            status if status.is_terminal() => self.on_payment_result(intent.order_id(), status).await?,
            _ => self.order(intent.order_id())?,
        };
        Ok(PaymentStart { order, intent })
    }

    /// Abandons the owner's open checkout. An outstanding payment is
    /// cancelled with the provider and the order's hold is released.
    pub async fn abandon(&self, owner_id: OwnerId, reason: &str) -> Result<CheckoutSession> {
        let slot = self.session_slot(owner_id).ok_or(EngineError::CheckoutNotFound)?;
        let (session, events) = {
            let mut session = slot.lock().await;
            let mut events = Vec::new();
            if let Some(order_id) = session.order_id().filter(|_| session.state() == CheckoutState::PaymentInitiated) {
                self.payments.cancel_for_order(order_id).await?;
                if let Some((order, released)) = self.release_order(order_id, reason)? {
                    self.persist(&order).await;
                    events = released;
                }
            }
            session.abandon(reason)?;
            tracing::info!(cart_id = %session.cart_id(), reason, "checkout abandoned");
            (session.clone(), events)
        };
        for event in &events {
            self.events.publish(event).await;
        }
        Ok(session)
    }

    // =========================================================================
    // Payment outcomes
    // =========================================================================

    /// Finalizes the order for a terminal payment status. Safe to repeat.
    pub async fn on_payment_result(&self, order_id: OrderId, status: PaymentStatus) -> Result<Order> {
        match status {
            PaymentStatus::Succeeded => self.complete_order(order_id).await,
            PaymentStatus::Failed => self.fail_order(order_id, "payment failed").await,
            PaymentStatus::Cancelled => self.fail_order(order_id, "payment cancelled").await,
            PaymentStatus::Created | PaymentStatus::Pending => self.order(order_id),
        }
    }

    /// Provider webhook.
    pub async fn handle_callback(&self, provider_reference: &str, status: PaymentStatus) -> Result<PaymentIntent> {
        let recorded = self.payments.record(provider_reference, status).await?;
        tracing::info!(intent_id = %recorded.intent.id(), reported = ?status, "payment callback received");
        if let Some(outcome) = recorded.settled() {
            self.on_payment_result(recorded.intent.order_id(), outcome).await?;
        }
        Ok(recorded.intent)
    }

    /// Client-side confirmation polling.
    pub async fn refresh_payment(&self, owner_id: OwnerId, intent_id: IntentId) -> Result<PaymentView> {
        let intent = self.payments.get(intent_id).ok_or_else(|| EngineError::PaymentNotFound(intent_id.to_string()))?;
        if self.order(intent.order_id())?.owner_id() != owner_id {
            return Err(EngineError::PaymentNotFound(intent_id.to_string()));
        }
        let recorded = self.payments.refresh(intent_id).await?;
        let order = match recorded.settled() {
            Some(outcome) => self.on_payment_result(intent.order_id(), outcome).await?,
            None => self.order(intent.order_id())?,
        };
        Ok(PaymentView { intent: recorded.intent, order_status: order.status() })
    }

    /// Fails payments stuck past the pending timeout and cancels orders that
    /// never got a live payment.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for recorded in self.payments.reconcile(now, self.pending_timeout).await {
            let Some(outcome) = recorded.settled() else { continue };
            match self.on_payment_result(recorded.intent.order_id(), outcome).await {
                Ok(_) => report.settled_intents += 1,
                Err(e) => tracing::warn!(order_id = %recorded.intent.order_id(), error = %e, "could not settle reconciled payment"),
            }
        }

        let overdue: Vec<OrderId> = self
            .orders
            .iter()
            .filter(|o| o.status() == OrderStatus::Pending && now - o.created_at() >= self.pending_timeout)
            .map(|o| o.id())
            .collect();
        for order_id in overdue {
            let covered = self.payments.latest_for(order_id).is_some_and(|i| i.status().is_live() || i.status() == PaymentStatus::Succeeded);
            if covered {
                continue;
            }
            match self.fail_order(order_id, "payment never started").await {
                Ok(_) => report.cancelled_orders += 1,
                Err(e) => tracing::warn!(order_id = %order_id, error = %e, "could not cancel orphaned order"),
            }
        }

        let unsaved: Vec<OrderId> = self.unsaved.iter().map(|id| *id).collect();
        for order_id in unsaved {
            if let Ok(order) = self.order(order_id) {
                self.persist(&order).await;
            }
        }
        report.evicted_orders = self.evict_settled(now);
        report
    }

    pub async fn reconcile_periodically(self: Arc<Self>, every: Duration, shutdown: CancellationToken) {
        tracing::info!(every_secs = every.as_secs(), "Payment reconciliation started");
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.reconcile(Utc::now()).await;
                    if report != ReconcileReport::default() {
                        tracing::info!(
                            settled = report.settled_intents,
                            cancelled = report.cancelled_orders,
                            evicted = report.evicted_orders,
                            "reconciliation pass finished"
                        );
                    }
                }
            }
        }
        tracing::info!("Payment reconciliation stopped");
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn session(&self, owner_id: OwnerId) -> Result<CheckoutSession> {
        let slot = self.session_slot(owner_id).ok_or(EngineError::CheckoutNotFound)?;
        let session = slot.lock().await;
        Ok(session.clone())
    }

    pub fn order(&self, order_id: OrderId) -> Result<Order> {
        self.orders.get(&order_id).map(|o| o.clone()).ok_or(EngineError::OrderNotFound(order_id))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn session_slot(&self, owner_id: OwnerId) -> Option<SessionSlot> {
        let cart_id = *self.by_owner.get(&owner_id)?;
        self.sessions.get(&cart_id).map(|s| Arc::clone(s.value()))
    }

    fn abandon_open(session: &mut CheckoutSession, reason: &str) {
        if session.abandon(reason).is_ok() {
            tracing::info!(cart_id = %session.cart_id(), reason, "checkout abandoned");
        }
    }

    /// Fresh copy of the cart behind an open session. A cart that expired or
    /// was replaced abandons the session.
    async fn live_cart(&self, session: &mut CheckoutSession) -> Result<Cart> {
        match self.carts.current(session.owner_id()).await {
            Ok(cart) if cart.id() == session.cart_id() => {
                if !cart.is_active() {
                    Self::abandon_open(session, "cart expired");
                    Err(EngineError::CartExpired)
                } else if cart.is_empty() {
                    Err(EngineError::EmptyCart)
                } else {
                    Ok(cart)
                }
            }
            Ok(_) | Err(EngineError::CartNotFound) => {
                Self::abandon_open(session, "cart replaced");
                Err(EngineError::CartChanged)
            }
            Err(EngineError::CartExpired) => {
                Self::abandon_open(session, "cart expired");
                Err(EngineError::CartExpired)
            }
            Err(e) => Err(e),
        }
    }

    /// Turns the priced cart into a pending order holding its stock.
    async fn place_order(&self, session: &mut CheckoutSession, method: PaymentMethod) -> Result<(Order, Vec<DomainEvent>)> {
        session.can_initiate_payment()?;
        let (Some(pricing), Some(delivery)) = (session.pricing().cloned(), session.delivery().cloned()) else {
            return Err(EngineError::InvalidState("price is not confirmed".to_string()));
        };

        let lines = match self.carts.detach_for_order(session.owner_id(), session.cart_id(), session.cart_revision()).await {
            Ok(lines) => lines,
            Err(EngineError::CartChanged) => {
                match self.carts.current(session.owner_id()).await {
                    Ok(cart) if cart.id() == session.cart_id() => {
                        session.restart(cart.revision())?;
                    }
                    _ => Self::abandon_open(session, "cart replaced"),
                }
                return Err(EngineError::CartChanged);
            }
            Err(EngineError::CartExpired) => {
                Self::abandon_open(session, "cart expired");
                return Err(EngineError::CartExpired);
            }
            Err(e) => return Err(e),
        };

        let placed = PlacedCart {
            owner_id: session.owner_id(),
            cart_id: session.cart_id(),
            lines,
            delivery,
            pricing,
            promo_code: session.promo_code().map(str::to_string),
        };
        let mut order = Order::place(order_number(), placed, Utc::now());
        let events = order.take_events();
        if let Err(e) = self.journal.save_order(&order).await {
            let released = self.ledger.release_lines(order.lines());
            tracing::error!(order_id = %order.id(), released, error = %e, "order could not be journaled, checkout abandoned");
            Self::abandon_open(session, "order could not be recorded");
            return Err(e.into());
        }
        session.payment_initiated(order.id(), method)?;
        self.orders.insert(order.id(), order.clone());
        tracing::info!(
            order_id = %order.id(),
            order_number = order.order_number(),
            cart_id = %order.cart_id(),
            grand_total = %order.pricing().grand_total,
            "order placed"
        );
        Ok((order, events))
    }

    async fn complete_order(&self, order_id: OrderId) -> Result<Order> {
        let (order, events) = {
            let mut order = self.orders.get_mut(&order_id).ok_or(EngineError::OrderNotFound(order_id))?;
            match order.status() {
                OrderStatus::Pending => {}
                OrderStatus::Cancelled => {
                    tracing::error!(order_id = %order_id, "payment succeeded for a cancelled order");
                    return Err(EngineError::InvalidState(format!("order {order_id} was already cancelled")));
                }
                _ => return Ok(order.clone()),
            }
            order.mark_paid()?;
            let events = order.take_events();
            (order.clone(), events)
        };

        // Catalog before ledger. A re-sync in between only under-counts.
        for line in order.lines() {
            match self.catalog.commit_sale(line.product_id, line.quantity).await {
                Ok(true) => {}
                Ok(false) => tracing::error!(order_id = %order_id, product_id = %line.product_id, quantity = line.quantity, "catalog stock could not cover a paid line"),
                Err(e) => tracing::error!(order_id = %order_id, product_id = %line.product_id, error = %e, "catalog stock not updated for paid line"),
            }
        }
        let committed = self.ledger.commit_lines(order.lines());
        tracing::info!(order_id = %order_id, committed, "order paid");
        self.persist(&order).await;

        self.close_session(order.cart_id(), |s| s.complete()).await;
        if let Some(code) = order.promo_code() {
            if let Err(e) = self.promos.redeem(code).await {
                tracing::warn!(order_id = %order_id, code, error = %e, "promo code redemption failed");
            }
        }
        if let Err(e) = self.loyalty.record_purchase(order.owner_id(), order.pricing().grand_total).await {
            tracing::warn!(order_id = %order_id, error = %e, "loyalty purchase not recorded");
        }
        for event in &events {
            self.events.publish(event).await;
        }
        Ok(order)
    }

    async fn fail_order(&self, order_id: OrderId, reason: &str) -> Result<Order> {
        let Some((order, events)) = self.release_order(order_id, reason)? else {
            return self.order(order_id);
        };
        self.persist(&order).await;
        self.close_session(order.cart_id(), |s| s.abandon(reason)).await;
        for event in &events {
            self.events.publish(event).await;
        }
        Ok(order)
    }

    /// Cancels a pending order and returns its hold to the ledger. `None`
    /// when the order is already past pending.
    fn release_order(&self, order_id: OrderId, reason: &str) -> Result<Option<(Order, Vec<DomainEvent>)>> {
        let mut order = self.orders.get_mut(&order_id).ok_or(EngineError::OrderNotFound(order_id))?;
        if order.status() != OrderStatus::Pending {
            return Ok(None);
        }
        order.cancel(reason)?;
        let released = self.ledger.release_lines(order.lines());
        tracing::info!(order_id = %order_id, released, reason, "order cancelled");
        let events = order.take_events();
        Ok(Some((order.clone(), events)))
    }

    async fn persist(&self, order: &Order) {
        match self.journal.save_order(order).await {
            Ok(()) => {
                self.unsaved.remove(&order.id());
            }
            Err(e) => {
                tracing::error!(order_id = %order.id(), status = ?order.status(), error = %e, "order not journaled, will retry");
                self.unsaved.insert(order.id());
            }
        }
    }

    /// Forgets settled orders and closed sessions untouched for the
    /// retention window. Returns the number of orders dropped.
    fn evict_settled(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let settled: Vec<OrderId> = self
            .orders
            .iter()
            .filter(|o| o.status() != OrderStatus::Pending && o.updated_at() <= cutoff && !self.unsaved.contains(&o.id()))
            .map(|o| o.id())
            .collect();
        for order_id in &settled {
            self.orders.remove(order_id);
            self.payments.evict(*order_id);
        }

        let closed: Vec<(CartId, OwnerId)> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.value().try_lock().ok()?;
                (!session.is_open() && session.updated_at() <= cutoff).then(|| (session.cart_id(), session.owner_id()))
            })
            .collect();
        for (cart_id, owner_id) in closed {
            self.sessions.remove(&cart_id);
            self.by_owner.remove_if(&owner_id, |_, current| *current == cart_id);
        }
        if !settled.is_empty() {
            tracing::info!(orders = settled.len(), "settled orders evicted from memory");
        }
        settled.len()
    }

    async fn close_session<F, E>(&self, cart_id: CartId, close: F)
    where
        F: FnOnce(&mut CheckoutSession) -> std::result::Result<(), E>,
        E: std::fmt::Display,
    {
        let Some(slot) = self.sessions.get(&cart_id).map(|s| Arc::clone(s.value())) else { return };
        let mut session = slot.lock().await;
        if let Err(e) = close(&mut *session) {
            tracing::debug!(cart_id = %cart_id, error = %e, "checkout session already closed");
        }
    }
}
