//! In-memory collaborators for unit and router tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::collaborators::{
    Catalog, ChargeRequest, CollaboratorError, CollaboratorResult, Collaborators, DeliveryQuote, DeliveryQuoter,
    EventPublisher, LoyaltyProgram, OrderRepository, PaymentGateway, PromoCheck, PromoValidator, QuoteRequest,
};
use crate::domain::aggregates::{Order, OrderStatus, PaymentIntent, PaymentStatus, Product, ProviderCharge};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{IntentId, Money, OrderId, OwnerId, Percent, ProductId};

pub fn product(name: &str, price: i64, stock: u32) -> Product {
    Product { id: ProductId::new(), name: name.to_string(), price: Money::from_major(price), is_active: true, stock }
}

#[derive(Default)]
pub struct StaticCatalog { products: DashMap<ProductId, Product> }

impl StaticCatalog {
    pub fn insert(&self, product: Product) -> ProductId {
        let id = product.id;
        self.products.insert(id, product);
        id
    }

    pub fn set_stock(&self, id: ProductId, stock: u32) {
        if let Some(mut p) = self.products.get_mut(&id) { p.stock = stock; }
    }

    pub fn stock(&self, id: ProductId) -> u32 { self.products.get(&id).map_or(0, |p| p.stock) }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn get_product(&self, id: ProductId) -> CollaboratorResult<Option<Product>> {
        Ok(self.products.get(&id).map(|p| p.clone()))
    }

    async fn commit_sale(&self, id: ProductId, quantity: u32) -> CollaboratorResult<bool> {
        let Some(mut p) = self.products.get_mut(&id) else { return Ok(false) };
        if p.stock < quantity { return Ok(false); }
        p.stock -= quantity;
        Ok(true)
    }
}

#[derive(Default)]
pub struct StaticPromos {
    codes: DashMap<String, u32>,
    redeemed: Mutex<Vec<String>>,
}

impl StaticPromos {
    pub fn add(&self, code: &str, percent: u32) { self.codes.insert(code.to_string(), percent); }
    pub fn redeemed(&self) -> Vec<String> { self.redeemed.lock().unwrap().clone() }
}

#[async_trait]
impl PromoValidator for StaticPromos {
    async fn validate(&self, code: &str) -> CollaboratorResult<PromoCheck> {
        Ok(match self.codes.get(code) {
            Some(p) => PromoCheck::valid(Percent::from_int(*p).unwrap()),
            None => PromoCheck::invalid("promo code not found"),
        })
    }

    async fn redeem(&self, code: &str) -> CollaboratorResult<()> {
        self.redeemed.lock().unwrap().push(code.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FixedLoyalty {
    percent: Mutex<Percent>,
    purchases: Mutex<Vec<(OwnerId, Money)>>,
}

impl FixedLoyalty {
    pub fn set(&self, percent: u32) { *self.percent.lock().unwrap() = Percent::from_int(percent).unwrap(); }
    pub fn purchases(&self) -> Vec<(OwnerId, Money)> { self.purchases.lock().unwrap().clone() }
}

#[async_trait]
impl LoyaltyProgram for FixedLoyalty {
    async fn current_discount_percent(&self, _owner_id: OwnerId) -> CollaboratorResult<Percent> {
        Ok(*self.percent.lock().unwrap())
    }

    async fn record_purchase(&self, owner_id: OwnerId, amount: Money) -> CollaboratorResult<()> {
        self.purchases.lock().unwrap().push((owner_id, amount));
        Ok(())
    }
}

/// Replays queued answers, then falls back to a fixed cost.
pub struct ScriptedQuoter {
    script: Mutex<VecDeque<CollaboratorResult<DeliveryQuote>>>,
    fallback: Money,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl Default for ScriptedQuoter {
    fn default() -> Self {
        Self { script: Mutex::default(), fallback: Money::from_major(200), delay: Mutex::default(), calls: AtomicUsize::new(0) }
    }
}

impl ScriptedQuoter {
    pub fn push(&self, answer: CollaboratorResult<DeliveryQuote>) { self.script.lock().unwrap().push_back(answer); }
    pub fn stall(&self, delay: Duration) { *self.delay.lock().unwrap() = Some(delay); }
    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl DeliveryQuoter for ScriptedQuoter {
    async fn quote(&self, _request: QuoteRequest<'_>) -> CollaboratorResult<DeliveryQuote> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or(Ok(DeliveryQuote::Cost(self.fallback)))
    }
}

/// Counts charges and lets tests drive provider-side status.
#[derive(Default)]
pub struct CountingGateway {
    charges: AtomicUsize,
    fail_next: Mutex<bool>,
    statuses: DashMap<String, PaymentStatus>,
    cancelled: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl CountingGateway {
    pub fn charges(&self) -> usize { self.charges.load(Ordering::SeqCst) }
    pub fn fail_next(&self) { *self.fail_next.lock().unwrap() = true; }
    pub fn set_status(&self, reference: &str, status: PaymentStatus) { self.statuses.insert(reference.to_string(), status); }
    pub fn cancelled(&self) -> Vec<String> { self.cancelled.lock().unwrap().clone() }
    pub fn stall(&self, delay: Duration) { *self.delay.lock().unwrap() = Some(delay); }
}

#[async_trait]
impl PaymentGateway for CountingGateway {
    async fn create_charge(&self, _request: &ChargeRequest) -> CollaboratorResult<ProviderCharge> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(CollaboratorError::Timeout);
        }
        let n = self.charges.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = format!("pay_{n}");
        self.statuses.insert(reference.clone(), PaymentStatus::Pending);
        Ok(ProviderCharge { provider_reference: reference, confirmation_token: Some(format!("ct_{n}")), status: PaymentStatus::Pending })
    }

    async fn get_status(&self, provider_reference: &str) -> CollaboratorResult<PaymentStatus> {
        self.statuses
            .get(provider_reference)
            .map(|s| *s)
            .ok_or_else(|| CollaboratorError::Rejected(format!("unknown payment {provider_reference}")))
    }

    async fn cancel(&self, provider_reference: &str) -> CollaboratorResult<()> {
        self.cancelled.lock().unwrap().push(provider_reference.to_string());
        self.statuses.insert(provider_reference.to_string(), PaymentStatus::Cancelled);
        Ok(())
    }
}

/// Keeps the last saved copy of every order and intent.
#[derive(Default)]
pub struct MemoryOrders {
    orders: DashMap<OrderId, Order>,
    intents: DashMap<IntentId, PaymentIntent>,
    unavailable: Mutex<bool>,
}

impl MemoryOrders {
    pub fn status_of(&self, id: OrderId) -> Option<OrderStatus> { self.orders.get(&id).map(|o| o.status()) }
    pub fn intent_status(&self, id: IntentId) -> Option<PaymentStatus> { self.intents.get(&id).map(|i| i.status()) }
    pub fn set_unavailable(&self, down: bool) { *self.unavailable.lock().unwrap() = down; }

    fn check(&self) -> CollaboratorResult<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(CollaboratorError::Transport("database unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MemoryOrders {
    async fn save_order(&self, order: &Order) -> CollaboratorResult<()> {
        self.check()?;
        self.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn save_intent(&self, intent: &PaymentIntent) -> CollaboratorResult<()> {
        self.check()?;
        self.intents.insert(intent.id(), intent.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher { events: Mutex<Vec<DomainEvent>> }

impl RecordingPublisher {
    pub fn names(&self) -> Vec<&'static str> { self.events.lock().unwrap().iter().map(DomainEvent::name).collect() }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Every fake, plus the same set wired as [`Collaborators`].
pub struct Fixture {
    pub catalog: Arc<StaticCatalog>,
    pub promos: Arc<StaticPromos>,
    pub delivery: Arc<ScriptedQuoter>,
    pub payments: Arc<CountingGateway>,
    pub loyalty: Arc<FixedLoyalty>,
    pub orders: Arc<MemoryOrders>,
    pub events: Arc<RecordingPublisher>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            catalog: Arc::default(),
            promos: Arc::default(),
            delivery: Arc::default(),
            payments: Arc::default(),
            loyalty: Arc::default(),
            orders: Arc::default(),
            events: Arc::default(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            catalog: self.catalog.clone(),
            promos: self.promos.clone(),
            delivery: self.delivery.clone(),
            payments: self.payments.clone(),
            loyalty: self.loyalty.clone(),
            orders: self.orders.clone(),
            events: self.events.clone(),
        }
    }
}
