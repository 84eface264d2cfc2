//! Soft, expiring holds against available-to-sell stock.
//!
//! A reservation decrements what a warehouse can promise to other carts
//! without touching physical stock. Reservations are never deleted: release
//! flips the `is_released` tombstone so that totals and audits remain
//! reconstructable after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{HoldId, LockId, Quantity, ReservationId, VariantId, WarehouseId};

/// Who owns a reservation.
///
/// A closed enum rather than an open type-name string, so releasing can
/// match exhaustively on every holder kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ReservationHolder {
    /// Held by a checkout attempt.
    CheckoutLock(LockId),
    /// Held manually by an operator (e.g. a customer-service hold).
    ManualHold(HoldId),
}

/// One hold of `quantity` units of a variant in a warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReservation {
    /// Unique id of this reservation.
    pub id: ReservationId,
    /// The variant held.
    pub variant_id: VariantId,
    /// The warehouse the units are held in.
    pub warehouse_id: WarehouseId,
    /// Units held.
    pub quantity: Quantity,
    /// Who owns the hold.
    pub holder: ReservationHolder,
    /// When the hold was placed.
    pub reserved_at: DateTime<Utc>,
    /// When the hold lapses on its own, independent of its holder's expiry.
    pub expires_at: DateTime<Utc>,
    /// Tombstone: `true` once the hold no longer counts against stock.
    pub is_released: bool,
    /// When the tombstone was set.
    pub released_at: Option<DateTime<Utc>>,
}

impl StockReservation {
    /// Creates an unreleased reservation.
    pub fn new(
        variant_id: VariantId,
        warehouse_id: WarehouseId,
        quantity: Quantity,
        holder: ReservationHolder,
        reserved_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            variant_id,
            warehouse_id,
            quantity,
            holder,
            reserved_at,
            expires_at,
            is_released: false,
            released_at: None,
        }
    }

    /// Whether the hold has lapsed on its own at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Marks the hold released. Idempotent: releasing twice keeps the
    /// original `released_at`.
    pub fn release(&mut self, now: DateTime<Utc>) {
        if !self.is_released {
            self.is_released = true;
            self.released_at = Some(now);
        }
    }
}
