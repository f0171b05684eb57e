//! Cart reservation and checkout orchestration engine
//!
//! The storefront's hard core: carts that soft-reserve stock for a sliding
//! window, deterministic expiry, loyalty + promo pricing, a checkout state
//! machine and idempotent payment intents reconciled against an
//! asynchronous provider.
//!
//! ## Components
//! - Stock ledger: per-product atomic reserve / release / commit
//! - Cart store: one active cart per owner, per-cart serialized mutations
//! - Expiration scheduler: delay queue releasing idle carts
//! - Pricing: loyalty then promo then delivery
//! - Delivery cost resolver: cached, time-bounded quotes
//! - Checkout orchestrator and payment intent tracker

use collaborators::CollaboratorError;
use domain::aggregates::{CheckoutError, OrderError, PaymentError, PaymentStatus};
use domain::value_objects::{OrderId, ProductId};
use thiserror::Error;

pub mod api;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod engine;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Insufficient stock for product {product_id}: {available} available")]
    InsufficientStock { product_id: ProductId, available: u32 },

    #[error("Cart expired")]
    CartExpired,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Delivery unavailable: {0}")]
    DeliveryUnavailable(String),

    #[error("Invalid promo code: {0}")]
    InvalidPromoCode(String),

    #[error("Cart changed since checkout started")]
    CartChanged,

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Invalid payment transition from {from:?} to {to:?}")]
    InvalidTransition { from: PaymentStatus, to: PaymentStatus },

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Product is not available for sale: {0}")]
    ProductUnavailable(ProductId),

    #[error("Cart not found")]
    CartNotFound,

    #[error("Product {0} is not in the cart")]
    ItemNotInCart(ProductId),

    #[error("No checkout in progress")]
    CheckoutNotFound,

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid quantity")]
    InvalidQuantity,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Stable machine-readable code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::CartExpired => "cart_expired",
            Self::EmptyCart => "empty_cart",
            Self::DeliveryUnavailable(_) => "delivery_unavailable",
            Self::InvalidPromoCode(_) => "invalid_promo_code",
            Self::CartChanged => "cart_changed",
            Self::PaymentFailed(_) => "payment_failed",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ProductNotFound(_) => "product_not_found",
            Self::ProductUnavailable(_) => "product_unavailable",
            Self::CartNotFound => "cart_not_found",
            Self::ItemNotInCart(_) => "item_not_in_cart",
            Self::CheckoutNotFound => "checkout_not_found",
            Self::OrderNotFound(_) => "order_not_found",
            Self::PaymentNotFound(_) => "payment_not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::InvalidQuantity => "invalid_quantity",
            Self::Storage(_) => "storage_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DeliveryUnavailable(_) | Self::CartChanged | Self::PaymentFailed(_) | Self::Storage(_))
    }
}

impl From<CheckoutError> for EngineError {
    fn from(e: CheckoutError) -> Self { Self::InvalidState(e.to_string()) }
}

impl From<OrderError> for EngineError {
    fn from(e: OrderError) -> Self { Self::InvalidState(e.to_string()) }
}

impl From<CollaboratorError> for EngineError {
    fn from(e: CollaboratorError) -> Self { Self::Storage(e.to_string()) }
}

impl From<PaymentError> for EngineError {
    fn from(e: PaymentError) -> Self {
        match e { PaymentError::InvalidTransition { from, to } => Self::InvalidTransition { from, to } }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
