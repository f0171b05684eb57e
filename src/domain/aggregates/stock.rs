//! Stock Entry

use serde::Serialize;
use crate::domain::value_objects::ProductId;

/// Per-product stock row. `reserved` counts units held by carts and
/// unpaid orders; it never exceeds `total`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StockEntry {
    product_id: ProductId,
    total: u32,
    reserved: u32,
}

impl StockEntry {
    pub fn new(product_id: ProductId, total: u32) -> Self {
        Self { product_id, total, reserved: 0 }
    }

    pub fn product_id(&self) -> ProductId { self.product_id }
    pub fn total(&self) -> u32 { self.total }
    pub fn reserved(&self) -> u32 { self.reserved }
    pub fn available(&self) -> u32 { self.total - self.reserved }

    pub fn reserve(&mut self, delta: u32) -> Result<(), StockError> {
        let next = self.reserved.checked_add(delta).ok_or(StockError::Insufficient { available: self.available() })?;
        if next > self.total {
            return Err(StockError::Insufficient { available: self.available() });
        }
        self.reserved = next;
        Ok(())
    }

    /// Floors at zero so a repeated release cannot corrupt the row.
    pub fn release(&mut self, delta: u32) -> u32 {
        let released = delta.min(self.reserved);
        self.reserved -= released;
        released
    }

    /// Converts held units into a sale: they leave both `reserved` and `total`.
    pub fn commit(&mut self, qty: u32) -> u32 {
        let committed = qty.min(self.reserved);
        self.reserved -= committed;
        self.total -= committed;
        committed
    }

    /// Admin restock. The new total is clamped so that it never drops below
    /// what is already reserved.
    pub fn set_total(&mut self, total: u32) {
        self.total = total.max(self.reserved);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StockError {
    #[error("insufficient stock, {available} available")]
    Insufficient { available: u32 },
}
