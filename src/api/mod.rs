//! HTTP surface
//!
//! Thin axum handlers over [`Engine`]. The caller is identified by the
//! `X-User-Id` header, set by the authenticating gateway in front of us.

use axum::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::domain::value_objects::OwnerId;
use crate::engine::Engine;

pub mod cart;
pub mod checkout;
pub mod error;
pub mod payments;

pub use error::ApiError;

pub const OWNER_HEADER: &str = "x-user-id";

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Clone)]
pub struct AppState { pub engine: Engine }

/// Authenticated cart owner.
pub struct Owner(pub OwnerId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(|id| Owner(OwnerId::from_uuid(id)))
            .ok_or(ApiError::Unauthorized)
    }
}

async fn health(State(s): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy", "service": "cart-engine", "active_carts": s.engine.carts.active_carts()}))
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/cart", get(cart::get_cart).delete(cart::clear_cart))
        .route("/cart/items", post(cart::add_item))
        .route("/cart/items/:product_id", patch(cart::set_quantity).delete(cart::remove_item))
        .route("/checkout", get(checkout::current))
        .route("/checkout/start", post(checkout::start))
        .route("/checkout/delivery", post(checkout::select_delivery))
        .route("/checkout/promo", post(checkout::confirm_pricing))
        .route("/checkout/pay", post(checkout::pay))
        .route("/checkout/cancel", post(checkout::cancel))
        .route("/payments/webhook", post(payments::webhook))
        .route("/payments/:intent_id/status", get(payments::status));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::domain::value_objects::ProductId;
    use crate::engine::EngineSettings;
    use crate::testing::{product, Fixture};

    struct Client {
        app: Router,
        fx: Fixture,
        owner: Uuid,
        widget: ProductId,
    }

    fn client() -> Client {
        let fx = Fixture::new();
        let widget = fx.catalog.insert(product("Widget", 500, 3));
        let (engine, _queue) = Engine::new(&EngineSettings::default(), fx.collaborators());
        Client { app: router(AppState { engine }), fx, owner: Uuid::now_v7(), widget }
    }

    impl Client {
        async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri).header(OWNER_HEADER, self.owner.to_string());
            let body = match body {
                Some(v) => {
                    request = request.header("content-type", "application/json");
                    Body::from(v.to_string())
                }
                None => Body::empty(),
            };
            let response = self.app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }
    }

    #[tokio::test]
    async fn test_health() {
        let c = client();
        let (status, body) = c.call(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "cart-engine");
        assert_eq!(body["active_carts"], 0);

        c.call(Method::POST, "/api/v1/cart/items", Some(json!({ "product_id": c.widget.as_uuid(), "quantity": 1 }))).await;
        let (_, body) = c.call(Method::GET, "/health", None).await;
        assert_eq!(body["active_carts"], 1);
    }

    #[tokio::test]
    async fn test_owner_header_required() {
        let c = client();
        let request = Request::builder().uri("/api/v1/cart").body(Body::empty()).unwrap();
        let response = c.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cart_endpoints() {
        let c = client();
        let item = json!({ "product_id": c.widget.as_uuid(), "quantity": 2 });
        let (status, body) = c.call(Method::POST, "/api/v1/cart/items", Some(item)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lines"][0]["quantity"], 2);
        assert!(body["remaining_ttl_seconds"].as_i64().unwrap() > 0);

        let too_many = json!({ "product_id": c.widget.as_uuid(), "quantity": 2 });
        let (status, body) = c.call(Method::POST, "/api/v1/cart/items", Some(too_many)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "insufficient_stock");
        assert_eq!(body["retryable"], false);

        let zero = json!({ "product_id": c.widget.as_uuid(), "quantity": 0 });
        let (status, body) = c.call(Method::POST, "/api/v1/cart/items", Some(zero)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_failed");

        let uri = format!("/api/v1/cart/items/{}", c.widget.as_uuid());
        let (status, body) = c.call(Method::PATCH, &uri, Some(json!({ "quantity": 3 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lines"][0]["quantity"], 3);

        let (status, body) = c.call(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lines"], json!([]));

        let (status, body) = c.call(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "item_not_in_cart");
    }

    #[tokio::test]
    async fn test_checkout_flow_over_http() {
        let c = client();
        c.fx.promos.add("SPRING", 20);
        c.call(Method::POST, "/api/v1/cart/items", Some(json!({ "product_id": c.widget.as_uuid(), "quantity": 2 }))).await;

        let (status, body) = c.call(Method::POST, "/api/v1/checkout/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "started");

        let (status, body) = c.call(Method::POST, "/api/v1/checkout/promo", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "invalid_state");

        let delivery = json!({ "method": "pickup", "target": "MSK-12" });
        let (status, body) = c.call(Method::POST, "/api/v1/checkout/delivery", Some(delivery)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "delivery_selected");

        let (status, body) = c.call(Method::POST, "/api/v1/checkout/promo", Some(json!({ "promo_code": "WINTER" }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "invalid_promo_code");

        let (status, body) = c.call(Method::POST, "/api/v1/checkout/promo", Some(json!({ "promo_code": "SPRING" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "price_confirmed");
        let total: rust_decimal::Decimal = body["pricing"]["grand_total"].as_str().unwrap().parse().unwrap();
        assert_eq!(total, rust_decimal::Decimal::from(1000));

        let pay = json!({ "idempotency_key": "k-1", "return_url": "https://shop.example/done" });
        let (status, body) = c.call(Method::POST, "/api/v1/checkout/pay", Some(pay)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order"]["status"], "pending");
        let intent_id = body["intent"]["id"].as_str().unwrap().to_string();
        let reference = body["intent"]["provider_reference"].as_str().unwrap().to_string();

        let notification = json!({ "event": "payment.succeeded", "object": { "id": reference, "status": "succeeded" } });
        let (status, _) = c.call(Method::POST, "/api/v1/payments/webhook", Some(notification.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let late = json!({ "event": "payment.canceled", "object": { "id": reference, "status": "canceled" } });
        let (status, body) = c.call(Method::POST, "/api/v1/payments/webhook", Some(late)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ignored");

        let (status, body) = c.call(Method::GET, &format!("/api/v1/payments/{intent_id}/status"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order_status"], "paid");
        assert_eq!(body["intent"]["status"], "succeeded");

        let (_, body) = c.call(Method::GET, "/api/v1/checkout", None).await;
        assert_eq!(body["state"], "completed");
    }

    #[tokio::test]
    async fn test_cancel_without_body() {
        let c = client();
        c.call(Method::POST, "/api/v1/cart/items", Some(json!({ "product_id": c.widget.as_uuid(), "quantity": 1 }))).await;
        c.call(Method::POST, "/api/v1/checkout/start", None).await;

        let (status, body) = c.call(Method::POST, "/api/v1/checkout/cancel", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "abandoned");
        assert_eq!(body["abandon_reason"], "cancelled by customer");
    }
}
