//! Checkout endpoints

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use super::{ApiResult, AppState, Owner};
use crate::domain::aggregates::{CheckoutSession, DeliveryMethod, PaymentMethod};
use crate::engine::{PaymentRequest, PaymentStart};

#[derive(Debug, Deserialize, Validate)]
pub struct DeliveryRequest {
    pub method: DeliveryMethod,
    /// Pickup-point code or saved address id.
    #[validate(length(min = 1, max = 200))]
    pub target: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct PromoRequest {
    #[validate(length(max = 50))]
    pub promo_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PayRequest {
    #[serde(default)]
    pub method: PaymentMethod,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
    #[validate(url)]
    pub return_url: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelRequest {
    #[validate(length(max = 200))]
    pub reason: Option<String>,
}

pub async fn current(State(s): State<AppState>, Owner(owner): Owner) -> ApiResult<CheckoutSession> {
    Ok(Json(s.engine.checkout.session(owner).await?))
}

pub async fn start(State(s): State<AppState>, Owner(owner): Owner) -> ApiResult<CheckoutSession> {
    Ok(Json(s.engine.checkout.start(owner).await?))
}

pub async fn select_delivery(State(s): State<AppState>, Owner(owner): Owner, Json(r): Json<DeliveryRequest>) -> ApiResult<CheckoutSession> {
    r.validate()?;
    Ok(Json(s.engine.checkout.select_delivery(owner, r.method, r.target).await?))
}

pub async fn confirm_pricing(State(s): State<AppState>, Owner(owner): Owner, Json(r): Json<PromoRequest>) -> ApiResult<CheckoutSession> {
    r.validate()?;
    Ok(Json(s.engine.checkout.confirm_pricing(owner, r.promo_code).await?))
}

pub async fn pay(State(s): State<AppState>, Owner(owner): Owner, Json(r): Json<PayRequest>) -> ApiResult<PaymentStart> {
    r.validate()?;
    let request = PaymentRequest { method: r.method, idempotency_key: r.idempotency_key, return_url: r.return_url };
    Ok(Json(s.engine.checkout.initiate_payment(owner, request).await?))
}

pub async fn cancel(State(s): State<AppState>, Owner(owner): Owner, body: Option<Json<CancelRequest>>) -> ApiResult<CheckoutSession> {
    let r = body.map(|Json(r)| r).unwrap_or_default();
    r.validate()?;
    let reason = r.reason.as_deref().unwrap_or("cancelled by customer");
    Ok(Json(s.engine.checkout.abandon(owner, reason).await?))
}
