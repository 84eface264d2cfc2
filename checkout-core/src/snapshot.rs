//! Immutable price snapshots.
//!
//! The price-lock phase computes pricing exactly once and persists it as
//! snapshot rows: one cart-level row carrying the totals and one row per
//! cart line. Downstream phases read the locked amounts from here and never
//! re-price. A snapshot is never updated; rollback deletes it, order
//! creation consumes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CartLineId, CurrencyCode, ExchangeRate, LockId, Money, Quantity, SnapshotId, VariantId,
};

/// The cart-level totals frozen by the price-lock phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartTotals {
    /// Sum of line totals before discounts and tax.
    pub subtotal: Money,
    /// Total discount applied.
    pub discount_total: Money,
    /// Total tax applied.
    pub tax_total: Money,
    /// The amount payment is authorized for.
    pub grand_total: Money,
    /// Currency all amounts are denominated in.
    pub currency: CurrencyCode,
    /// Conversion rate from the store's base currency.
    pub exchange_rate: ExchangeRate,
}

/// The per-line amounts frozen by the price-lock phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineAmounts {
    /// The cart line these amounts belong to.
    pub cart_line_id: CartLineId,
    /// The variant priced.
    pub variant_id: VariantId,
    /// Units priced.
    pub quantity: Quantity,
    /// Locked price per unit.
    pub unit_price: Money,
    /// Locked total for the line.
    pub line_total: Money,
}

/// What a snapshot row captures: the cart totals or one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotBody {
    /// Cart-level totals (the row with no cart line).
    CartTotal(CartTotals),
    /// One cart line's locked amounts.
    Line(LineAmounts),
}

/// One immutable price snapshot row, owned by exactly one checkout lock.
///
/// Fields are private: once constructed, a snapshot exposes its contents
/// read-only. There is deliberately no mutator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    id: SnapshotId,
    lock_id: LockId,
    snapshot_at: DateTime<Utc>,
    body: SnapshotBody,
}

impl PriceSnapshot {
    /// Creates the cart-level row for a lock.
    pub fn cart_total(lock_id: LockId, totals: CartTotals, at: DateTime<Utc>) -> Self {
        Self {
            id: SnapshotId::new(),
            lock_id,
            snapshot_at: at,
            body: SnapshotBody::CartTotal(totals),
        }
    }

    /// Creates a line-level row for a lock.
    pub fn line(lock_id: LockId, amounts: LineAmounts, at: DateTime<Utc>) -> Self {
        Self {
            id: SnapshotId::new(),
            lock_id,
            snapshot_at: at,
            body: SnapshotBody::Line(amounts),
        }
    }

    /// This row's id.
    pub const fn id(&self) -> SnapshotId {
        self.id
    }

    /// The lock this row belongs to.
    pub const fn lock_id(&self) -> LockId {
        self.lock_id
    }

    /// When the amounts were frozen.
    pub const fn snapshot_at(&self) -> DateTime<Utc> {
        self.snapshot_at
    }

    /// What the row captures.
    pub const fn body(&self) -> &SnapshotBody {
        &self.body
    }

    /// The cart line this row prices, `None` for the cart-level row.
    pub const fn cart_line_id(&self) -> Option<CartLineId> {
        match &self.body {
            SnapshotBody::CartTotal(_) => None,
            SnapshotBody::Line(line) => Some(line.cart_line_id),
        }
    }

    /// The frozen cart totals, if this is the cart-level row.
    pub const fn totals(&self) -> Option<&CartTotals> {
        match &self.body {
            SnapshotBody::CartTotal(totals) => Some(totals),
            SnapshotBody::Line(_) => None,
        }
    }
}
