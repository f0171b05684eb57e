//! Payment status polling and provider webhook

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::error::ApiError;
use super::{ApiResult, AppState, Owner};
use crate::collaborators::http::map_provider_status;
use crate::domain::value_objects::IntentId;
use crate::engine::PaymentView;
use crate::EngineError;

/// Provider notification: `{"event": "payment.succeeded", "object": {"id": .., "status": ..}}`.
#[derive(Debug, Deserialize)]
pub struct Notification {
    pub event: String,
    pub object: NotificationObject,
}

#[derive(Debug, Deserialize)]
pub struct NotificationObject {
    pub id: String,
    pub status: String,
}

pub async fn status(State(s): State<AppState>, Owner(owner): Owner, Path(intent_id): Path<Uuid>) -> ApiResult<PaymentView> {
    Ok(Json(s.engine.checkout.refresh_payment(owner, IntentId::from_uuid(intent_id)).await?))
}

/// Duplicate and out-of-order notifications are acknowledged and ignored.
pub async fn webhook(State(s): State<AppState>, Json(n): Json<Notification>) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let status = map_provider_status(&n.object.status).map_err(|e| {
        tracing::warn!(event = %n.event, provider_reference = %n.object.id, error = %e, "unrecognised payment notification");
        EngineError::InvalidState(e.to_string())
    })?;

    match s.engine.checkout.handle_callback(&n.object.id, status).await {
        Ok(intent) => Ok((StatusCode::OK, Json(json!({ "status": "accepted", "intent_status": intent.status() })))),
        Err(EngineError::InvalidTransition { from, to }) => {
            tracing::debug!(provider_reference = %n.object.id, ?from, ?to, "stale payment notification ignored");
            Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))))
        }
        Err(e) => Err(e.into()),
    }
}
