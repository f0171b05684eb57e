//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use validator::ValidationErrors;

use crate::EngineError;

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Unauthorized,
    Validation(ValidationErrors),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self { Self::Engine(e) }
}

impl From<ValidationErrors> for ApiError {
    fn from(e: ValidationErrors) -> Self { Self::Validation(e) }
}

pub fn status_of(e: &EngineError) -> StatusCode {
    use EngineError::*;
    match e {
        InsufficientStock { .. } | CartChanged | InvalidTransition { .. } | InvalidState(_) => StatusCode::CONFLICT,
        CartExpired => StatusCode::GONE,
        EmptyCart | InvalidPromoCode(_) | InvalidQuantity | ProductUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ProductNotFound(_) | CartNotFound | ItemNotInCart(_) | CheckoutNotFound | OrderNotFound(_) | PaymentNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        DeliveryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
        Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Engine(e) => {
                let status = status_of(&e);
                let message = if let EngineError::Storage(detail) = &e {
                    tracing::error!(error = %detail, "collaborator failure");
                    "internal error".to_string()
                } else {
                    e.to_string()
                };
                (status, json!({ "error": e.code(), "message": message, "retryable": e.is_retryable() }))
            }
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "unauthorized", "message": "missing or invalid X-User-Id", "retryable": false }),
            ),
            Self::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "validation_failed", "message": errors.to_string(), "retryable": false }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::PaymentStatus;
    use crate::domain::value_objects::ProductId;

    #[test]
    fn test_status_mapping() {
        let stock = EngineError::InsufficientStock { product_id: ProductId::new(), available: 1 };
        assert_eq!(status_of(&stock), StatusCode::CONFLICT);
        assert_eq!(status_of(&EngineError::CartExpired), StatusCode::GONE);
        assert_eq!(status_of(&EngineError::EmptyCart), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_of(&EngineError::DeliveryUnavailable("down".into())), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_of(&EngineError::PaymentFailed("declined".into())), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            status_of(&EngineError::InvalidTransition { from: PaymentStatus::Failed, to: PaymentStatus::Succeeded }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(&EngineError::CheckoutNotFound), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_storage_details_are_not_leaked() {
        let response = ApiError::from(EngineError::Storage("password authentication failed".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "storage_error");
        assert_eq!(body["message"], "internal error");
        assert_eq!(body["retryable"], true);
    }
}
