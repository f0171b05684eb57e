//! Engine services
//!
//! Stateful components built on the domain layer. [`Engine`] wires them
//! together from a set of [`Collaborators`]; the binary and the HTTP layer
//! only ever talk to the engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::Collaborators;

pub mod cart_store;
pub mod checkout;
pub mod delivery;
pub mod payments;
pub mod scheduler;
pub mod stock_ledger;

pub use cart_store::{CartSnapshot, CartStore};
pub use checkout::{CheckoutOrchestrator, PaymentRequest, PaymentStart, PaymentView, ReconcileReport};
pub use delivery::{DeliveryCostResolver, QuoteCachePolicy};
pub use payments::{PaymentIntentTracker, Recorded};
pub use scheduler::{expiry_channel, ExpirationScheduler, ExpiryHandle, ExpiryQueue};
pub use stock_ledger::StockLedger;

#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Sliding reservation window of a cart.
    pub cart_ttl: chrono::Duration,
    pub delivery_timeout: Duration,
    pub delivery_cache_ttl: Duration,
    pub delivery_stale_ttl: Duration,
    pub delivery_cache_capacity: u64,
    pub payment_timeout: Duration,
    /// Age after which an unsettled payment is failed by reconciliation.
    pub payment_pending_timeout: chrono::Duration,
    /// How long settled orders, sessions and intents stay in memory.
    pub settled_retention: chrono::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cart_ttl: chrono::Duration::minutes(30),
            delivery_timeout: Duration::from_millis(5_000),
            delivery_cache_ttl: Duration::from_secs(600),
            delivery_stale_ttl: Duration::from_secs(6 * 60 * 60),
            delivery_cache_capacity: 10_000,
            payment_timeout: Duration::from_millis(10_000),
            payment_pending_timeout: chrono::Duration::minutes(60),
            settled_retention: chrono::Duration::hours(24),
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    pub ledger: Arc<StockLedger>,
    pub carts: Arc<CartStore>,
    pub payments: Arc<PaymentIntentTracker>,
    pub checkout: Arc<CheckoutOrchestrator>,
}

impl Engine {
    /// Builds the engine. The returned queue feeds the expiration scheduler
    /// and must be handed to [`Engine::spawn_background`].
    pub fn new(settings: &EngineSettings, collaborators: Collaborators) -> (Self, ExpiryQueue) {
        let (expiry, queue) = expiry_channel();
        let ledger = Arc::new(StockLedger::new());
        let carts = Arc::new(CartStore::new(
            Arc::clone(&ledger),
            Arc::clone(&collaborators.catalog),
            Arc::clone(&collaborators.events),
            expiry,
            settings.cart_ttl,
        ));
        let delivery = Arc::new(DeliveryCostResolver::new(
            Arc::clone(&collaborators.delivery),
            settings.delivery_timeout,
            QuoteCachePolicy {
                capacity: settings.delivery_cache_capacity,
                freshness: settings.delivery_cache_ttl,
                stale_after: settings.delivery_stale_ttl,
            },
        ));
        let payments = Arc::new(PaymentIntentTracker::new(
            Arc::clone(&collaborators.payments),
            Arc::clone(&collaborators.orders),
            Arc::clone(&collaborators.events),
            settings.payment_timeout,
        ));
        let checkout = Arc::new(CheckoutOrchestrator::new(
            Arc::clone(&carts),
            Arc::clone(&ledger),
            delivery,
            Arc::clone(&payments),
            &collaborators,
            settings,
        ));
        (Self { ledger, carts, payments, checkout }, queue)
    }

    /// Starts the expiration scheduler and the reconciliation sweep.
    pub fn spawn_background(&self, queue: ExpiryQueue, reconcile_every: Duration, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let scheduler = ExpirationScheduler::new(Arc::clone(&self.carts), queue);
        vec![
            tokio::spawn(scheduler.run(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.checkout).reconcile_periodically(reconcile_every, shutdown)),
        ]
    }
}
