//! HTTP clients for the payment provider and the delivery tariff calculator

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ChargeRequest, CollaboratorError, CollaboratorResult, DeliveryQuote, DeliveryQuoter, PaymentGateway, QuoteRequest};
use crate::domain::aggregates::{DeliveryMethod, PaymentStatus, ProviderCharge};
use crate::domain::value_objects::Money;

const CURRENCY: &str = "RUB";
/// Grams per unit when the catalog has no weight for a product.
const DEFAULT_UNIT_WEIGHT: u32 = 100;

// =============================================================================
// Payment provider
// =============================================================================

#[derive(Clone)]
pub struct PaymentApiConfig {
    pub base_url: String,
    pub shop_id: String,
    pub secret_key: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for PaymentApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentApiConfig")
            .field("base_url", &self.base_url)
            .field("shop_id", &self.shop_id)
            .field("secret_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct HttpPaymentGateway { client: Client, config: PaymentApiConfig }

#[derive(Serialize)]
struct Amount { value: String, currency: &'static str }

#[derive(Serialize)]
struct CreatePayment<'a> {
    amount: Amount,
    capture: bool,
    confirmation: Confirmation<'a>,
    description: String,
    payment_method_data: MethodData<'a>,
    metadata: Metadata,
}

#[derive(Serialize)]
struct Confirmation<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    return_url: &'a str,
}

#[derive(Serialize)]
struct MethodData<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Serialize)]
struct Metadata { order_id: String }

#[derive(Deserialize)]
struct PaymentResponse {
    id: String,
    status: String,
    #[serde(default)]
    confirmation: Option<ConfirmationResponse>,
}

#[derive(Deserialize)]
struct ConfirmationResponse {
    #[serde(default)]
    confirmation_token: Option<String>,
    #[serde(default)]
    confirmation_url: Option<String>,
}

/// Provider payment status as the engine sees it. Shared by responses and webhooks.
pub(crate) fn map_provider_status(status: &str) -> CollaboratorResult<PaymentStatus> {
    match status {
        "pending" | "waiting_for_capture" => Ok(PaymentStatus::Pending),
        "succeeded" => Ok(PaymentStatus::Succeeded),
        "canceled" => Ok(PaymentStatus::Cancelled),
        other => Err(CollaboratorError::Decode(format!("unknown payment status {other}"))),
    }
}

impl HttpPaymentGateway {
    pub fn new(config: PaymentApiConfig) -> CollaboratorResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn read(response: reqwest::Response) -> CollaboratorResult<PaymentResponse> {
        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(CollaboratorError::Transport(format!("payment provider returned {status}")));
        }
        Ok(response.json::<PaymentResponse>().await?)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> CollaboratorResult<ProviderCharge> {
        let body = CreatePayment {
            amount: Amount { value: request.amount.rounded().amount().to_string(), currency: CURRENCY },
            capture: true,
            confirmation: Confirmation { kind: "embedded", return_url: &request.return_url },
            description: format!("Order #{}", request.order_number),
            payment_method_data: MethodData { kind: request.method.as_str() },
            metadata: Metadata { order_id: request.order_id.to_string() },
        };
        tracing::info!(order_id = %request.order_id, amount = %request.amount, "creating provider payment");
        let response = self.client
            .post(self.url("payments"))
            .basic_auth(&self.config.shop_id, Some(&self.config.secret_key))
            .header("Idempotence-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await?;
        let payment = Self::read(response).await?;
        let confirmation = payment.confirmation.and_then(|c| c.confirmation_token.or(c.confirmation_url));
        Ok(ProviderCharge {
            provider_reference: payment.id,
            confirmation_token: confirmation,
            status: map_provider_status(&payment.status)?,
        })
    }

    async fn get_status(&self, provider_reference: &str) -> CollaboratorResult<PaymentStatus> {
        let response = self.client
            .get(self.url(&format!("payments/{provider_reference}")))
            .basic_auth(&self.config.shop_id, Some(&self.config.secret_key))
            .send()
            .await?;
        map_provider_status(&Self::read(response).await?.status)
    }

    async fn cancel(&self, provider_reference: &str) -> CollaboratorResult<()> {
        let response = self.client
            .post(self.url(&format!("payments/{provider_reference}/cancel")))
            .basic_auth(&self.config.shop_id, Some(&self.config.secret_key))
            .header("Idempotence-Key", format!("cancel-{provider_reference}"))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::read(response).await.map(|_| ())
    }
}

// =============================================================================
// Delivery tariffs
// =============================================================================

#[derive(Clone)]
pub struct HttpDeliveryQuoter { client: Client, base_url: String }

#[derive(Serialize)]
struct TariffRequest<'a> {
    delivery_mode: u8,
    to_location: &'a str,
    packages: [Package; 1],
}

#[derive(Serialize)]
struct Package { weight: u32 }

#[derive(Deserialize)]
struct TariffResponse {
    #[serde(default)]
    tariff_codes: Vec<Tariff>,
}

#[derive(Deserialize)]
struct Tariff { delivery_mode: u8, delivery_sum: Decimal }

fn delivery_mode(method: DeliveryMethod) -> u8 {
    match method { DeliveryMethod::Courier => 3, DeliveryMethod::Pickup => 4 }
}

/// Cheapest tariff in the requested mode, or the cheapest overall.
fn cheapest(tariffs: &[Tariff], mode: u8) -> Option<Decimal> {
    let in_mode = tariffs.iter().filter(|t| t.delivery_mode == mode).map(|t| t.delivery_sum).min();
    in_mode.or_else(|| tariffs.iter().map(|t| t.delivery_sum).min())
}

impl HttpDeliveryQuoter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> CollaboratorResult<Self> {
        Ok(Self { client: Client::builder().timeout(timeout).build()?, base_url: base_url.into() })
    }
}

#[async_trait]
impl DeliveryQuoter for HttpDeliveryQuoter {
    async fn quote(&self, request: QuoteRequest<'_>) -> CollaboratorResult<DeliveryQuote> {
        let units: u32 = request.lines.iter().map(|l| l.quantity).sum();
        let mode = delivery_mode(request.method);
        let body = TariffRequest {
            delivery_mode: mode,
            to_location: request.target,
            packages: [Package { weight: units.max(1) * DEFAULT_UNIT_WEIGHT }],
        };
        let url = format!("{}/calculator/tarifflist", self.base_url.trim_end_matches('/'));
        let response = self.client.post(url).json(&body).send().await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                return Ok(DeliveryQuote::Unavailable(format!("destination {} rejected", request.target)));
            }
            s => return Err(CollaboratorError::Transport(format!("tariff calculator returned {s}"))),
        }
        let tariffs = response.json::<TariffResponse>().await?;
        Ok(match cheapest(&tariffs.tariff_codes, mode) {
            Some(sum) => DeliveryQuote::Cost(Money::new(sum)),
            None => DeliveryQuote::Unavailable("no tariffs for destination".to_string()),
        })
    }
}
