//! Catalog product as seen by the cart engine

use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{Money, ProductId};

/// Read-only snapshot returned by the catalog. The engine never mutates
/// products; it copies the price into cart lines and seeds the stock ledger
/// from `stock`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub is_active: bool,
    pub stock: u32,
}

impl Product {
    pub fn is_sellable(&self) -> bool { self.is_active && !self.price.is_negative() }
}
