//! Stock Ledger
//!
//! The only state shared between carts. Every reserve / release / commit is
//! a single read-modify-write under the product's map-entry lock, so two
//! carts racing for the last unit cannot both win.
//!
//! Totals follow the catalog: the cart store passes the stored stock figure
//! to [`StockLedger::restock`] on every add, and paid orders are written back
//! to the catalog before their hold is committed here.

use dashmap::DashMap;

use crate::domain::aggregates::{CartLine, StockEntry, StockError};
use crate::domain::value_objects::ProductId;
use crate::{EngineError, Result};

#[derive(Debug, Default)]
pub struct StockLedger {
    entries: DashMap<ProductId, StockEntry>,
}

impl StockLedger {
    pub fn new() -> Self { Self::default() }

    /// Sets the product's total, starting to track it if needed. The total
    /// never drops below what is reserved. Returns the total now in effect.
    pub fn restock(&self, product_id: ProductId, total: u32) -> u32 {
        let mut entry = self.entries.entry(product_id).or_insert_with(|| StockEntry::new(product_id, total));
        let before = entry.total();
        entry.set_total(total);
        if entry.total() != before {
            tracing::info!(product_id = %product_id, from = before, to = entry.total(), "stock total updated");
        }
        entry.total()
    }

    pub fn available(&self, product_id: ProductId) -> u32 {
        self.entries.get(&product_id).map_or(0, |e| e.available())
    }

    pub fn entry(&self, product_id: ProductId) -> Option<StockEntry> {
        self.entries.get(&product_id).map(|e| e.clone())
    }

    pub fn reserve(&self, product_id: ProductId, delta: u32) -> Result<()> {
        if delta == 0 { return Ok(()); }
        let mut entry = self.entries.get_mut(&product_id).ok_or(EngineError::ProductNotFound(product_id))?;
        entry.reserve(delta).map_err(|e| match e {
            StockError::Insufficient { available } => {
                tracing::debug!(product_id = %product_id, requested = delta, available, "reservation denied");
                EngineError::InsufficientStock { product_id, available }
            }
        })
    }

    /// Returns the number of units actually released.
    pub fn release(&self, product_id: ProductId, delta: u32) -> u32 {
        let Some(mut entry) = self.entries.get_mut(&product_id) else { return 0 };
        let released = entry.release(delta);
        if released < delta {
            tracing::warn!(product_id = %product_id, requested = delta, released, "release exceeded reserved quantity");
        }
        released
    }

    pub fn commit(&self, product_id: ProductId, qty: u32) -> u32 {
        self.entries.get_mut(&product_id).map_or(0, |mut e| e.commit(qty))
    }

    pub fn release_lines(&self, lines: &[CartLine]) -> u32 {
        lines.iter().map(|l| self.release(l.product_id, l.quantity)).sum()
    }

    pub fn commit_lines(&self, lines: &[CartLine]) -> u32 {
        lines.iter().map(|l| self.commit(l.product_id, l.quantity)).sum()
    }
}
