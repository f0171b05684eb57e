//! Expiration Scheduler
//!
//! A single task owns a `DelayQueue` holding one timer per cart. Cart
//! mutations send a fresh deadline through [`ExpiryHandle`]; the previous
//! timer for that cart is replaced. When a timer fires the cart store
//! re-checks the deadline under the cart lock before releasing anything.

use std::collections::HashMap;
use std::future::poll_fn;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::delay_queue::{DelayQueue, Key};

use super::cart_store::CartStore;
use crate::domain::value_objects::{CartId, OwnerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiryEntry {
    pub owner_id: OwnerId,
    pub cart_id: CartId,
    pub expires_at: DateTime<Utc>,
}

/// Sending side held by the cart store.
#[derive(Clone, Debug)]
pub struct ExpiryHandle { tx: mpsc::UnboundedSender<ExpiryEntry> }

/// Receiving side, consumed by [`ExpirationScheduler`].
#[derive(Debug)]
pub struct ExpiryQueue { rx: mpsc::UnboundedReceiver<ExpiryEntry> }

pub fn expiry_channel() -> (ExpiryHandle, ExpiryQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ExpiryHandle { tx }, ExpiryQueue { rx })
}

impl ExpiryHandle {
    pub fn schedule(&self, entry: ExpiryEntry) {
        if self.tx.send(entry).is_err() {
            // Lazy expiry on access still covers this cart.
            tracing::debug!(cart_id = %entry.cart_id, "expiration scheduler not running");
        }
    }
}

pub struct ExpirationScheduler {
    store: Arc<CartStore>,
    incoming: ExpiryQueue,
    timers: DelayQueue<ExpiryEntry>,
    keys: HashMap<CartId, Key>,
}

impl ExpirationScheduler {
    pub fn new(store: Arc<CartStore>, incoming: ExpiryQueue) -> Self {
        Self { store, incoming, timers: DelayQueue::new(), keys: HashMap::new() }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Expiration scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.incoming.rx.recv() => match received {
                    Some(entry) => self.arm(entry),
                    None => break,
                },
                Some(fired) = poll_fn(|cx| self.timers.poll_expired(cx)) => {
                    let entry = fired.into_inner();
                    self.keys.remove(&entry.cart_id);
                    self.fire(entry).await;
                }
            }
        }
        tracing::info!(pending = self.keys.len(), "Expiration scheduler stopped");
    }

    fn arm(&mut self, entry: ExpiryEntry) {
        let delay = (entry.expires_at - Utc::now()).to_std().unwrap_or_default();
        // Keys in the map are always live: fired entries are removed before `fire`.
        if let Some(previous) = self.keys.remove(&entry.cart_id) {
            self.timers.remove(&previous);
        }
        let key = self.timers.insert(entry, delay);
        self.keys.insert(entry.cart_id, key);
    }

    async fn fire(&self, entry: ExpiryEntry) {
        match self.store.expire(entry.owner_id, entry.cart_id, entry.expires_at).await {
            Some(released) => tracing::debug!(cart_id = %entry.cart_id, released, "expiry timer released cart"),
            None => tracing::debug!(cart_id = %entry.cart_id, "expiry timer stale, nothing to do"),
        }
    }
}
