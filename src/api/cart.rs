//! Cart endpoints

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{ApiResult, AppState, Owner};
use crate::domain::value_objects::ProductId;
use crate::engine::CartSnapshot;

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetQuantityRequest {
    #[validate(range(max = 999))]
    pub quantity: u32,
}

pub async fn get_cart(State(s): State<AppState>, Owner(owner): Owner) -> ApiResult<CartSnapshot> {
    Ok(Json(s.engine.carts.snapshot(owner).await?))
}

pub async fn add_item(State(s): State<AppState>, Owner(owner): Owner, Json(r): Json<AddItemRequest>) -> ApiResult<CartSnapshot> {
    r.validate()?;
    Ok(Json(s.engine.carts.add_item(owner, ProductId::from_uuid(r.product_id), r.quantity).await?))
}

pub async fn set_quantity(
    State(s): State<AppState>,
    Owner(owner): Owner,
    Path(product_id): Path<Uuid>,
    Json(r): Json<SetQuantityRequest>,
) -> ApiResult<CartSnapshot> {
    r.validate()?;
    Ok(Json(s.engine.carts.set_quantity(owner, ProductId::from_uuid(product_id), r.quantity).await?))
}

pub async fn remove_item(State(s): State<AppState>, Owner(owner): Owner, Path(product_id): Path<Uuid>) -> ApiResult<CartSnapshot> {
    Ok(Json(s.engine.carts.remove_item(owner, ProductId::from_uuid(product_id)).await?))
}

pub async fn clear_cart(State(s): State<AppState>, Owner(owner): Owner) -> ApiResult<CartSnapshot> {
    Ok(Json(s.engine.carts.clear(owner).await?))
}
