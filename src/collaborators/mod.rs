//! Ports to the systems around the engine: catalog, promo codes, delivery
//! tariffs, payment provider, loyalty program, the order journal and the
//! event bus.
//!
//! Implementations live in the submodules; the engine only sees the traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::aggregates::{
    CartLine, DeliveryMethod, Order, PaymentIntent, PaymentMethod, PaymentStatus, Product, ProviderCharge,
};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{Money, OrderId, OwnerId, Percent, ProductId};

pub mod http;
pub mod nats;
pub mod postgres;

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by remote service: {0}")]
    Rejected(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("timed out")]
    Timeout,
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() { Self::Timeout } else if e.is_decode() { Self::Decode(e.to_string()) } else { Self::Transport(e.to_string()) }
    }
}

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_product(&self, id: ProductId) -> CollaboratorResult<Option<Product>>;
    /// Takes sold units off the product's stock. Returns `false` when the
    /// stored stock could not cover `quantity` and nothing was changed.
    async fn commit_sale(&self, id: ProductId, quantity: u32) -> CollaboratorResult<bool>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PromoCheck {
    pub valid: bool,
    pub discount_percent: Percent,
    pub reason: Option<String>,
}

impl PromoCheck {
    pub fn valid(discount_percent: Percent) -> Self { Self { valid: true, discount_percent, reason: None } }
    pub fn invalid(reason: impl Into<String>) -> Self { Self { valid: false, discount_percent: Percent::ZERO, reason: Some(reason.into()) } }
}

#[async_trait]
pub trait PromoValidator: Send + Sync {
    async fn validate(&self, code: &str) -> CollaboratorResult<PromoCheck>;
    /// Consumes one use of the code.
    async fn redeem(&self, code: &str) -> CollaboratorResult<()>;
}

#[derive(Clone, Copy, Debug)]
pub struct QuoteRequest<'a> {
    pub method: DeliveryMethod,
    pub target: &'a str,
    pub lines: &'a [CartLine],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryQuote {
    Cost(Money),
    Unavailable(String),
}

#[async_trait]
pub trait DeliveryQuoter: Send + Sync {
    async fn quote(&self, request: QuoteRequest<'_>) -> CollaboratorResult<DeliveryQuote>;
}

#[derive(Clone, Debug, Serialize)]
pub struct ChargeRequest {
    pub order_id: OrderId,
    pub order_number: u64,
    pub amount: Money,
    pub method: PaymentMethod,
    pub return_url: String,
    pub idempotency_key: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: &ChargeRequest) -> CollaboratorResult<ProviderCharge>;
    async fn get_status(&self, provider_reference: &str) -> CollaboratorResult<PaymentStatus>;
    async fn cancel(&self, provider_reference: &str) -> CollaboratorResult<()>;
}

#[async_trait]
pub trait LoyaltyProgram: Send + Sync {
    async fn current_discount_percent(&self, owner_id: OwnerId) -> CollaboratorResult<Percent>;
    /// Called once an order is paid so the program can re-evaluate the tier.
    async fn record_purchase(&self, owner_id: OwnerId, amount: Money) -> CollaboratorResult<()>;
}

/// Durable record of orders and payment intents. The engine keeps its
/// working set in memory and writes every change through.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn save_order(&self, order: &Order) -> CollaboratorResult<()>;
    async fn save_intent(&self, intent: &PaymentIntent) -> CollaboratorResult<()>;
}

/// Fire-and-forget; implementations log their own failures.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent);
}

/// Publisher used when no event bus is configured.
#[derive(Debug, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, event: &DomainEvent) {
        tracing::debug!(event = event.name(), "event bus not configured, dropping event");
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub promos: Arc<dyn PromoValidator>,
    pub delivery: Arc<dyn DeliveryQuoter>,
    pub payments: Arc<dyn PaymentGateway>,
    pub loyalty: Arc<dyn LoyaltyProgram>,
    pub orders: Arc<dyn OrderRepository>,
    pub events: Arc<dyn EventPublisher>,
}
