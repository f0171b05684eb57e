//! Payment Intent Tracker
//!
//! Keeps every intent the engine created, an order -> latest intent index
//! and a per-order lock so that at most one live intent exists per order.
//! Provider reports (callbacks, polling, reconciliation) all go through
//! [`PaymentIntentTracker::record`], which is idempotent. Every new intent
//! and status change is written to the order journal.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::collaborators::{ChargeRequest, EventPublisher, OrderRepository, PaymentGateway};
use crate::domain::aggregates::{PaymentIntent, PaymentStatus, StatusChange};
use crate::domain::events::{DomainEvent, PaymentEvent};
use crate::domain::value_objects::{IntentId, OrderId};
use crate::{EngineError, Result};

/// An intent after a provider report was applied to it.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub intent: PaymentIntent,
    pub change: StatusChange,
}

impl Recorded {
    /// The terminal status this report moved the intent into, if any.
    pub fn settled(&self) -> Option<PaymentStatus> {
        match self.change {
            StatusChange::Applied { to, .. } if to.is_terminal() => Some(to),
            _ => None,
        }
    }
}

pub struct PaymentIntentTracker {
    gateway: Arc<dyn PaymentGateway>,
    journal: Arc<dyn OrderRepository>,
    events: Arc<dyn EventPublisher>,
    intents: DashMap<IntentId, PaymentIntent>,
    by_reference: DashMap<String, IntentId>,
    by_key: DashMap<(OrderId, String), IntentId>,
    latest: DashMap<OrderId, IntentId>,
    order_locks: DashMap<OrderId, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl PaymentIntentTracker {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        journal: Arc<dyn OrderRepository>,
        events: Arc<dyn EventPublisher>,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway, journal, events,
            intents: DashMap::new(), by_reference: DashMap::new(), by_key: DashMap::new(),
            latest: DashMap::new(), order_locks: DashMap::new(), timeout,
        }
    }

    pub fn get(&self, id: IntentId) -> Option<PaymentIntent> { self.intents.get(&id).map(|i| i.clone()) }

    pub fn latest_for(&self, order_id: OrderId) -> Option<PaymentIntent> {
        let id = *self.latest.get(&order_id)?;
        self.get(id)
    }

    /// Returns the order's existing intent when the key was seen before or
    /// when the latest intent is still live or already succeeded; otherwise
    /// asks the provider for a new charge.
    pub async fn create_intent(&self, request: ChargeRequest) -> Result<PaymentIntent> {
        let lock = self.order_lock(request.order_id);
        let _guard = lock.lock().await;

        let replay = self.by_key.get(&(request.order_id, request.idempotency_key.clone())).map(|id| *id);
        if let Some(existing) = replay.and_then(|id| self.get(id)) {
            tracing::debug!(intent_id = %existing.id(), order_id = %request.order_id, "idempotency key replayed");
            return Ok(existing);
        }
        if let Some(existing) = self.latest_for(request.order_id).filter(|i| !i.status().is_superseded_by_retry()) {
            tracing::debug!(intent_id = %existing.id(), order_id = %request.order_id, status = ?existing.status(), "order already has an intent");
            return Ok(existing);
        }

        let charge = match tokio::time::timeout(self.timeout, self.gateway.create_charge(&request)).await {
            Ok(Ok(charge)) => charge,
            Ok(Err(e)) => {
                tracing::warn!(order_id = %request.order_id, error = %e, "payment provider rejected charge");
                return Err(EngineError::PaymentFailed(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(order_id = %request.order_id, "payment provider timed out");
                return Err(EngineError::PaymentFailed("payment provider timed out".to_string()));
            }
        };

        let initial = charge.status;
        let intent = PaymentIntent::create(request.order_id, request.amount, &request.idempotency_key, charge, Utc::now());
        let id = intent.id();
        self.by_reference.insert(intent.provider_reference().to_string(), id);
        self.by_key.insert((request.order_id, request.idempotency_key.clone()), id);
        self.latest.insert(request.order_id, id);
        self.intents.insert(id, intent.clone());
        tracing::info!(intent_id = %id, order_id = %request.order_id, amount = %request.amount, "payment intent created");
        self.save(&intent).await;

        if initial.is_terminal() {
            return Ok(self.apply(id, initial).await?.intent);
        }
        self.get(id).ok_or_else(|| EngineError::PaymentNotFound(id.to_string()))
    }

    /// Provider callback or confirmation poll, keyed by provider reference.
    pub async fn record(&self, provider_reference: &str, status: PaymentStatus) -> Result<Recorded> {
        let id = self
            .by_reference
            .get(provider_reference)
            .map(|id| *id)
            .ok_or_else(|| EngineError::PaymentNotFound(provider_reference.to_string()))?;
        let order_id = self.get(id).map(|i| i.order_id()).ok_or_else(|| EngineError::PaymentNotFound(id.to_string()))?;
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;
        self.apply(id, status).await
    }

    /// Asks the provider for the status of a live intent and records it.
    pub async fn refresh(&self, id: IntentId) -> Result<Recorded> {
        let intent = self.get(id).ok_or_else(|| EngineError::PaymentNotFound(id.to_string()))?;
        if !intent.status().is_live() {
            return Ok(Recorded { intent, change: StatusChange::Unchanged });
        }
        match tokio::time::timeout(self.timeout, self.gateway.get_status(intent.provider_reference())).await {
            Ok(Ok(status)) => self.record(intent.provider_reference(), status).await,
            Ok(Err(e)) => {
                tracing::warn!(intent_id = %id, error = %e, "payment status poll failed");
                Ok(Recorded { intent, change: StatusChange::Unchanged })
            }
            Err(_) => {
                tracing::warn!(intent_id = %id, "payment status poll timed out");
                Ok(Recorded { intent, change: StatusChange::Unchanged })
            }
        }
    }

    /// Cancels the order's live intent with the provider, best effort, and
    /// marks it cancelled locally. Fails if the payment already succeeded.
    pub async fn cancel_for_order(&self, order_id: OrderId) -> Result<Option<Recorded>> {
        let Some(intent) = self.latest_for(order_id) else { return Ok(None) };
        if intent.status() == PaymentStatus::Succeeded {
            return Err(EngineError::InvalidTransition { from: PaymentStatus::Succeeded, to: PaymentStatus::Cancelled });
        }
        if !intent.status().is_live() {
            return Ok(None);
        }
        match tokio::time::timeout(self.timeout, self.gateway.cancel(intent.provider_reference())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(intent_id = %intent.id(), error = %e, "provider cancel failed"),
            Err(_) => tracing::warn!(intent_id = %intent.id(), "provider cancel timed out"),
        }
        self.record(intent.provider_reference(), PaymentStatus::Cancelled).await.map(Some)
    }

    /// Safety net for lost callbacks: every intent still live past
    /// `older_than` is polled once; whatever is not terminal by then fails.
    pub async fn reconcile(&self, now: DateTime<Utc>, older_than: chrono::Duration) -> Vec<Recorded> {
        let stuck: Vec<PaymentIntent> = self
            .intents
            .iter()
            .filter(|i| i.status().is_live() && now - i.created_at() >= older_than)
            .map(|i| i.clone())
            .collect();

        let mut settled = Vec::new();
        for intent in stuck {
            let polled = match tokio::time::timeout(self.timeout, self.gateway.get_status(intent.provider_reference())).await {
                Ok(Ok(status)) if status.is_terminal() => status,
                Ok(Ok(_)) => PaymentStatus::Failed,
                Ok(Err(e)) => {
                    tracing::warn!(intent_id = %intent.id(), error = %e, "reconciliation poll failed");
                    PaymentStatus::Failed
                }
                Err(_) => PaymentStatus::Failed,
            };
            match self.record(intent.provider_reference(), polled).await {
                Ok(recorded) if recorded.settled().is_some() => settled.push(recorded),
                Ok(_) => {}
                Err(e) => tracing::warn!(intent_id = %intent.id(), error = %e, "reconciliation could not settle intent"),
            }
        }
        if !settled.is_empty() {
            tracing::info!(settled = settled.len(), "payment reconciliation settled stuck intents");
        }
        settled
    }

    /// Applies a status under the order lock held by the caller.
    async fn apply(&self, id: IntentId, status: PaymentStatus) -> Result<Recorded> {
        let (intent, change) = {
            let mut intent = self.intents.get_mut(&id).ok_or_else(|| EngineError::PaymentNotFound(id.to_string()))?;
            let change = intent.apply(status).map_err(|e| {
                tracing::warn!(intent_id = %id, reported = ?status, error = %e, "payment report rejected");
                EngineError::from(e)
            })?;
            (intent.clone(), change)
        };
        if let StatusChange::Applied { from, to } = change {
            tracing::info!(intent_id = %id, order_id = %intent.order_id(), ?from, ?to, "payment status changed");
            self.save(&intent).await;
            let event = DomainEvent::Payment(PaymentEvent::StatusChanged { intent_id: id, order_id: intent.order_id(), from, to });
            self.events.publish(&event).await;
        }
        Ok(Recorded { intent, change })
    }

    /// Drops every intent of a settled order from memory. The journal keeps them.
    pub fn evict(&self, order_id: OrderId) -> usize {
        let ids: Vec<IntentId> = self.intents.iter().filter(|i| i.order_id() == order_id).map(|i| i.id()).collect();
        for id in &ids {
            if let Some((_, intent)) = self.intents.remove(id) {
                self.by_reference.remove(intent.provider_reference());
                self.by_key.remove(&(order_id, intent.idempotency_key().to_string()));
            }
        }
        self.latest.remove(&order_id);
        self.order_locks.remove(&order_id);
        ids.len()
    }

    async fn save(&self, intent: &PaymentIntent) {
        if let Err(e) = self.journal.save_intent(intent).await {
            tracing::error!(intent_id = %intent.id(), status = ?intent.status(), error = %e, "payment intent not journaled");
        }
    }

    fn order_lock(&self, order_id: OrderId) -> Arc<Mutex<()>> {
        Arc::clone(self.order_locks.entry(order_id).or_default().value())
    }
}
