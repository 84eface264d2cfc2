//! Persistence contracts for locks, snapshots, and reservations.
//!
//! Backends implement these traits; the core never assumes a particular
//! storage technology. Two operations carry the protocol's concurrency
//! guarantees and must be atomic in every implementation:
//!
//! - [`CheckoutLockStore::insert`] is find-or-create serialized per cart:
//!   it must refuse to create a second non-terminal lock for a cart.
//! - [`CheckoutLockStore::transition`] is a guarded compare-and-set on
//!   `(lock id, expected state)`: a caller holding a stale view must get
//!   [`StoreError::StateConflict`](crate::errors::StoreError::StateConflict)
//!   back, never a silent overwrite.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StoreResult;
use crate::lock::{CheckoutLock, LockState, LockTransition};
use crate::reservation::{ReservationHolder, StockReservation};
use crate::snapshot::PriceSnapshot;
use crate::types::{CartId, LockId, ReservationId, VariantId, WarehouseId};

/// Store of [`CheckoutLock`] records.
#[async_trait]
pub trait CheckoutLockStore: Send + Sync {
    /// Inserts a new lock, atomically enforcing the one-non-terminal-lock-
    /// per-cart invariant. Returns the stored lock, or
    /// [`StoreError::LockExists`](crate::errors::StoreError::LockExists)
    /// naming the current holder.
    async fn insert(&self, lock: CheckoutLock) -> StoreResult<CheckoutLock>;

    /// Point lookup by lock id.
    async fn get(&self, lock_id: LockId) -> StoreResult<Option<CheckoutLock>>;

    /// The non-terminal lock for a cart, if one exists.
    async fn find_active_for_cart(&self, cart_id: CartId) -> StoreResult<Option<CheckoutLock>>;

    /// Applies `transition` iff the stored lock is still in `expected`
    /// state. Returns the updated lock. Phase-advance legality is enforced
    /// by [`CheckoutLock::apply`] under the same guard.
    async fn transition(
        &self,
        lock_id: LockId,
        expected: LockState,
        transition: LockTransition,
    ) -> StoreResult<CheckoutLock>;

    /// Active locks whose `expires_at` has passed at `now`, oldest expiry
    /// first, at most `limit`.
    async fn list_expired(&self, now: DateTime<Utc>, limit: usize)
        -> StoreResult<Vec<CheckoutLock>>;

    /// Locks created in `[from, to)`, for the diagnostics surface.
    async fn list_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<CheckoutLock>>;
}

/// Store of immutable [`PriceSnapshot`] rows.
///
/// There is intentionally no update operation.
#[async_trait]
pub trait PriceSnapshotStore: Send + Sync {
    /// Persists a batch of rows (one cart-level plus N line rows).
    async fn insert_all(&self, rows: Vec<PriceSnapshot>) -> StoreResult<()>;

    /// All rows belonging to a lock.
    async fn for_lock(&self, lock_id: LockId) -> StoreResult<Vec<PriceSnapshot>>;

    /// Deletes all rows belonging to a lock (rollback path), returning how
    /// many were removed.
    async fn delete_for_lock(&self, lock_id: LockId) -> StoreResult<usize>;
}

/// Store of [`StockReservation`] rows.
#[async_trait]
pub trait StockReservationStore: Send + Sync {
    /// Persists a reservation.
    async fn insert(&self, reservation: StockReservation) -> StoreResult<()>;

    /// Unreleased reservations owned by `holder`.
    async fn unreleased_for_holder(
        &self,
        holder: ReservationHolder,
    ) -> StoreResult<Vec<StockReservation>>;

    /// All reservations (released or not) owned by `holder`, for
    /// diagnostics.
    async fn for_holder(&self, holder: ReservationHolder) -> StoreResult<Vec<StockReservation>>;

    /// Sets the release tombstone. Returns `true` if the reservation was
    /// unreleased, `false` if it was already released (idempotent).
    async fn release(&self, reservation_id: ReservationId, now: DateTime<Utc>)
        -> StoreResult<bool>;

    /// Sum of unreleased quantities for a (variant, warehouse) pair.
    async fn unreleased_quantity(
        &self,
        variant_id: VariantId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<u32>;

    /// Unreleased reservations whose own `expires_at` has passed at `now`,
    /// at most `limit`.
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StockReservation>>;
}

/// The three stores the protocol runs against, grouped for wiring.
#[derive(Clone)]
pub struct CheckoutStores {
    /// Lock records.
    pub locks: Arc<dyn CheckoutLockStore>,
    /// Price snapshot rows.
    pub snapshots: Arc<dyn PriceSnapshotStore>,
    /// Stock reservation rows.
    pub reservations: Arc<dyn StockReservationStore>,
}

impl std::fmt::Debug for CheckoutStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutStores").finish_non_exhaustive()
    }
}
