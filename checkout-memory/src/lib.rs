//! In-memory adapters for the checkout coordination core.
//!
//! This crate provides thread-safe, in-memory implementations of the
//! `checkout-core` store traits and of the inventory-levels collaborator,
//! useful for testing and development scenarios where persistence is not
//! required.
//!
//! The atomicity requirements of the store contracts are met by taking a
//! single write lock around each compound operation: find-or-create of a
//! cart's lock, the guarded state transition, and the inventory
//! check-then-reserve all execute under one `RwLock` write guard.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use checkout_core::collaborators::{InventoryLevels, StockLevel};
use checkout_core::errors::{CheckoutResult, StoreError, StoreResult};
use checkout_core::lock::{CheckoutLock, LockState, LockTransition};
use checkout_core::reservation::{ReservationHolder, StockReservation};
use checkout_core::snapshot::PriceSnapshot;
use checkout_core::store::{CheckoutLockStore, PriceSnapshotStore, StockReservationStore};
use checkout_core::types::{CartId, LockId, Quantity, ReservationId, VariantId, WarehouseId};

#[derive(Default)]
struct LockStoreInner {
    locks: HashMap<LockId, CheckoutLock>,
    // Index of the single non-terminal lock per cart.
    open_by_cart: HashMap<CartId, LockId>,
}

/// Thread-safe in-memory store of checkout locks.
#[derive(Clone, Default)]
pub struct InMemoryLockStore {
    inner: Arc<RwLock<LockStoreInner>>,
}

impl InMemoryLockStore {
    /// Creates a new empty lock store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLockStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CheckoutLockStore for InMemoryLockStore {
    async fn insert(&self, lock: CheckoutLock) -> StoreResult<CheckoutLock> {
        let mut inner = self.inner.write().expect("RwLock poisoned");

        if let Some(&existing_id) = inner.open_by_cart.get(&lock.cart_id) {
            if let Some(existing) = inner.locks.get(&existing_id) {
                if !existing.state.is_terminal() {
                    return Err(StoreError::LockExists {
                        cart_id: lock.cart_id,
                        lock_id: existing.id,
                        holder_session: existing.session_id,
                    });
                }
            }
        }

        inner.open_by_cart.insert(lock.cart_id, lock.id);
        inner.locks.insert(lock.id, lock.clone());
        Ok(lock)
    }

    async fn get(&self, lock_id: LockId) -> StoreResult<Option<CheckoutLock>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner.locks.get(&lock_id).cloned())
    }

    async fn find_active_for_cart(&self, cart_id: CartId) -> StoreResult<Option<CheckoutLock>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        Ok(inner
            .open_by_cart
            .get(&cart_id)
            .and_then(|id| inner.locks.get(id))
            .filter(|lock| !lock.state.is_terminal())
            .cloned())
    }

    async fn transition(
        &self,
        lock_id: LockId,
        expected: LockState,
        transition: LockTransition,
    ) -> StoreResult<CheckoutLock> {
        let mut inner = self.inner.write().expect("RwLock poisoned");

        let lock = inner
            .locks
            .get_mut(&lock_id)
            .ok_or(StoreError::LockNotFound(lock_id))?;
        if lock.state != expected {
            return Err(StoreError::StateConflict {
                lock_id,
                expected,
                actual: lock.state,
            });
        }
        lock.apply(transition)?;
        let updated = lock.clone();

        if updated.state.is_terminal() {
            let stale = inner
                .open_by_cart
                .get(&updated.cart_id)
                .is_some_and(|id| *id == lock_id);
            if stale {
                inner.open_by_cart.remove(&updated.cart_id);
            }
        }
        Ok(updated)
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<CheckoutLock>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut expired: Vec<CheckoutLock> = inner
            .locks
            .values()
            .filter(|lock| lock.is_active() && lock.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|lock| lock.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn list_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<CheckoutLock>> {
        let inner = self.inner.read().expect("RwLock poisoned");
        let mut locks: Vec<CheckoutLock> = inner
            .locks
            .values()
            .filter(|lock| lock.locked_at >= from && lock.locked_at < to)
            .cloned()
            .collect();
        locks.sort_by_key(|lock| lock.id);
        Ok(locks)
    }
}

/// Thread-safe in-memory store of price snapshot rows.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    rows: Arc<RwLock<HashMap<LockId, Vec<PriceSnapshot>>>>,
}

impl InMemorySnapshotStore {
    /// Creates a new empty snapshot store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemorySnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySnapshotStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl PriceSnapshotStore for InMemorySnapshotStore {
    async fn insert_all(&self, rows: Vec<PriceSnapshot>) -> StoreResult<()> {
        let mut stored = self.rows.write().expect("RwLock poisoned");
        for row in rows {
            stored.entry(row.lock_id()).or_default().push(row);
        }
        Ok(())
    }

    async fn for_lock(&self, lock_id: LockId) -> StoreResult<Vec<PriceSnapshot>> {
        let stored = self.rows.read().expect("RwLock poisoned");
        Ok(stored.get(&lock_id).cloned().unwrap_or_default())
    }

    async fn delete_for_lock(&self, lock_id: LockId) -> StoreResult<usize> {
        let mut stored = self.rows.write().expect("RwLock poisoned");
        Ok(stored.remove(&lock_id).map_or(0, |rows| rows.len()))
    }
}

/// Thread-safe in-memory store of stock reservations.
#[derive(Clone, Default)]
pub struct InMemoryReservationStore {
    rows: Arc<RwLock<HashMap<ReservationId, StockReservation>>>,
}

impl InMemoryReservationStore {
    /// Creates a new empty reservation store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryReservationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryReservationStore")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StockReservationStore for InMemoryReservationStore {
    async fn insert(&self, reservation: StockReservation) -> StoreResult<()> {
        let mut rows = self.rows.write().expect("RwLock poisoned");
        rows.insert(reservation.id, reservation);
        Ok(())
    }

    async fn unreleased_for_holder(
        &self,
        holder: ReservationHolder,
    ) -> StoreResult<Vec<StockReservation>> {
        let rows = self.rows.read().expect("RwLock poisoned");
        let mut matching: Vec<StockReservation> = rows
            .values()
            .filter(|r| r.holder == holder && !r.is_released)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.id);
        Ok(matching)
    }

    async fn for_holder(&self, holder: ReservationHolder) -> StoreResult<Vec<StockReservation>> {
        let rows = self.rows.read().expect("RwLock poisoned");
        let mut matching: Vec<StockReservation> = rows
            .values()
            .filter(|r| r.holder == holder)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.id);
        Ok(matching)
    }

    async fn release(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut rows = self.rows.write().expect("RwLock poisoned");
        let reservation = rows
            .get_mut(&reservation_id)
            .ok_or(StoreError::ReservationNotFound(reservation_id))?;
        if reservation.is_released {
            return Ok(false);
        }
        reservation.release(now);
        Ok(true)
    }

    async fn unreleased_quantity(
        &self,
        variant_id: VariantId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<u32> {
        let rows = self.rows.read().expect("RwLock poisoned");
        Ok(rows
            .values()
            .filter(|r| {
                !r.is_released && r.variant_id == variant_id && r.warehouse_id == warehouse_id
            })
            .map(|r| r.quantity.units())
            .sum())
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<StockReservation>> {
        let rows = self.rows.read().expect("RwLock poisoned");
        let mut expired: Vec<StockReservation> = rows
            .values()
            .filter(|r| !r.is_released && r.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Level {
    on_hand: u32,
    reserved: u32,
}

/// Thread-safe in-memory inventory with atomic admission.
///
/// `try_reserve` performs its check-then-increment under the write lock,
/// which is what makes concurrent reservation attempts unable to oversell
/// a (variant, warehouse) pair.
#[derive(Clone, Default)]
pub struct InMemoryInventory {
    levels: Arc<RwLock<HashMap<(VariantId, WarehouseId), Level>>>,
}

impl InMemoryInventory {
    /// Creates a new empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the physical stock for a (variant, warehouse) pair.
    pub fn set_on_hand(&self, variant_id: VariantId, warehouse_id: WarehouseId, on_hand: u32) {
        let mut levels = self.levels.write().expect("RwLock poisoned");
        levels.entry((variant_id, warehouse_id)).or_default().on_hand = on_hand;
    }
}

impl std::fmt::Debug for InMemoryInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryInventory").finish_non_exhaustive()
    }
}

#[async_trait]
impl InventoryLevels for InMemoryInventory {
    async fn levels(
        &self,
        variant_id: VariantId,
        warehouse_id: WarehouseId,
    ) -> CheckoutResult<StockLevel> {
        let levels = self.levels.read().expect("RwLock poisoned");
        let level = levels
            .get(&(variant_id, warehouse_id))
            .copied()
            .unwrap_or_default();
        Ok(StockLevel {
            on_hand: level.on_hand,
            reserved: level.reserved,
        })
    }

    async fn try_reserve(
        &self,
        variant_id: VariantId,
        warehouse_id: WarehouseId,
        quantity: Quantity,
    ) -> CheckoutResult<bool> {
        let mut levels = self.levels.write().expect("RwLock poisoned");
        let level = levels.entry((variant_id, warehouse_id)).or_default();
        let available = level.on_hand.saturating_sub(level.reserved);
        if available < quantity.units() {
            return Ok(false);
        }
        level.reserved += quantity.units();
        Ok(true)
    }

    async fn release(
        &self,
        variant_id: VariantId,
        warehouse_id: WarehouseId,
        quantity: Quantity,
    ) -> CheckoutResult<()> {
        let mut levels = self.levels.write().expect("RwLock poisoned");
        let level = levels.entry((variant_id, warehouse_id)).or_default();
        level.reserved = level.reserved.saturating_sub(quantity.units());
        Ok(())
    }

    async fn commit(
        &self,
        variant_id: VariantId,
        warehouse_id: WarehouseId,
        quantity: Quantity,
    ) -> CheckoutResult<()> {
        let mut levels = self.levels.write().expect("RwLock poisoned");
        let level = levels.entry((variant_id, warehouse_id)).or_default();
        level.reserved = level.reserved.saturating_sub(quantity.units());
        level.on_hand = level.on_hand.saturating_sub(quantity.units());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_core::lock::{FailurePhase, FailureReason};
    use checkout_core::types::SessionId;
    use uuid::Uuid;

    fn new_lock(cart_id: CartId) -> CheckoutLock {
        CheckoutLock::new(cart_id, SessionId::new(Uuid::new_v4()), None, Utc::now())
    }

    async fn activate(store: &InMemoryLockStore, lock: &CheckoutLock) -> CheckoutLock {
        store
            .transition(
                lock.id,
                LockState::Pending,
                LockTransition::Activate {
                    expires_at: Utc::now() + chrono::Duration::minutes(15),
                },
            )
            .await
            .expect("pending lock activates")
    }

    #[tokio::test]
    async fn insert_enforces_one_open_lock_per_cart() {
        let store = InMemoryLockStore::new();
        let cart_id = CartId::new(Uuid::new_v4());

        let first = store.insert(new_lock(cart_id)).await.expect("first insert");
        let err = store
            .insert(new_lock(cart_id))
            .await
            .expect_err("second insert must collide");
        match err {
            StoreError::LockExists { lock_id, .. } => assert_eq!(lock_id, first.id),
            other => panic!("unexpected error: {other:?}"),
        }

        // A different cart is unaffected.
        store
            .insert(new_lock(CartId::new(Uuid::new_v4())))
            .await
            .expect("other cart inserts");
    }

    #[tokio::test]
    async fn terminal_lock_frees_the_cart() {
        let store = InMemoryLockStore::new();
        let cart_id = CartId::new(Uuid::new_v4());

        let lock = store.insert(new_lock(cart_id)).await.expect("insert");
        activate(&store, &lock).await;
        store
            .transition(
                lock.id,
                LockState::Active,
                LockTransition::Fail {
                    at: Utc::now(),
                    reason: FailureReason::new(FailurePhase::UserCancelled, "cancelled"),
                },
            )
            .await
            .expect("active lock fails");

        assert!(store
            .find_active_for_cart(cart_id)
            .await
            .expect("lookup succeeds")
            .is_none());
        store.insert(new_lock(cart_id)).await.expect("cart is free again");
    }

    #[tokio::test]
    async fn transition_is_guarded_by_expected_state() {
        let store = InMemoryLockStore::new();
        let lock = store
            .insert(new_lock(CartId::new(Uuid::new_v4())))
            .await
            .expect("insert");
        activate(&store, &lock).await;

        // A second activation expecting `pending` observes the conflict.
        let err = store
            .transition(
                lock.id,
                LockState::Pending,
                LockTransition::Activate {
                    expires_at: Utc::now(),
                },
            )
            .await
            .expect_err("stale expectation must conflict");
        assert!(matches!(
            err,
            StoreError::StateConflict {
                expected: LockState::Pending,
                actual: LockState::Active,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn list_expired_only_returns_overdue_active_locks() {
        let store = InMemoryLockStore::new();

        let fresh = store
            .insert(new_lock(CartId::new(Uuid::new_v4())))
            .await
            .expect("insert");
        activate(&store, &fresh).await;

        let stale = store
            .insert(new_lock(CartId::new(Uuid::new_v4())))
            .await
            .expect("insert");
        store
            .transition(
                stale.id,
                LockState::Pending,
                LockTransition::Activate {
                    expires_at: Utc::now() - chrono::Duration::minutes(1),
                },
            )
            .await
            .expect("activates with past deadline");

        let expired = store
            .list_expired(Utc::now(), 10)
            .await
            .expect("listing succeeds");
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
    }

    #[tokio::test]
    async fn snapshot_store_deletes_per_lock() {
        use checkout_core::snapshot::CartTotals;
        use checkout_core::types::{CurrencyCode, ExchangeRate, Money};

        let store = InMemorySnapshotStore::new();
        let lock_a = LockId::new();
        let lock_b = LockId::new();
        let totals = CartTotals {
            subtotal: Money::try_new(100).expect("valid"),
            discount_total: Money::zero(),
            tax_total: Money::zero(),
            grand_total: Money::try_new(100).expect("valid"),
            currency: CurrencyCode::try_new("USD").expect("valid"),
            exchange_rate: ExchangeRate::identity(),
        };

        store
            .insert_all(vec![
                PriceSnapshot::cart_total(lock_a, totals.clone(), Utc::now()),
                PriceSnapshot::cart_total(lock_b, totals, Utc::now()),
            ])
            .await
            .expect("insert succeeds");

        assert_eq!(store.delete_for_lock(lock_a).await.expect("delete"), 1);
        assert_eq!(store.for_lock(lock_a).await.expect("query").len(), 0);
        assert_eq!(store.for_lock(lock_b).await.expect("query").len(), 1);
    }

    #[tokio::test]
    async fn reservation_release_is_idempotent() {
        let store = InMemoryReservationStore::new();
        let reservation = StockReservation::new(
            VariantId::new(Uuid::new_v4()),
            WarehouseId::new(Uuid::new_v4()),
            Quantity::try_new(2).expect("valid"),
            ReservationHolder::CheckoutLock(LockId::new()),
            Utc::now(),
            Utc::now() + chrono::Duration::minutes(20),
        );
        store.insert(reservation.clone()).await.expect("insert");

        assert!(store
            .release(reservation.id, Utc::now())
            .await
            .expect("first release"));
        assert!(!store
            .release(reservation.id, Utc::now())
            .await
            .expect("second release is a no-op"));
    }

    #[tokio::test]
    async fn unreleased_quantity_sums_only_live_holds() {
        let store = InMemoryReservationStore::new();
        let variant = VariantId::new(Uuid::new_v4());
        let warehouse = WarehouseId::new(Uuid::new_v4());
        let holder = ReservationHolder::CheckoutLock(LockId::new());

        let mut released = StockReservation::new(
            variant,
            warehouse,
            Quantity::try_new(5).expect("valid"),
            holder,
            Utc::now(),
            Utc::now() + chrono::Duration::minutes(20),
        );
        released.release(Utc::now());
        store.insert(released).await.expect("insert");

        let live = StockReservation::new(
            variant,
            warehouse,
            Quantity::try_new(3).expect("valid"),
            holder,
            Utc::now(),
            Utc::now() + chrono::Duration::minutes(20),
        );
        store.insert(live).await.expect("insert");

        assert_eq!(
            store
                .unreleased_quantity(variant, warehouse)
                .await
                .expect("sum"),
            3
        );
    }

    #[tokio::test]
    async fn inventory_admission_respects_the_ceiling() {
        let inventory = InMemoryInventory::new();
        let variant = VariantId::new(Uuid::new_v4());
        let warehouse = WarehouseId::new(Uuid::new_v4());
        inventory.set_on_hand(variant, warehouse, 5);

        let three = Quantity::try_new(3).expect("valid");
        assert!(inventory
            .try_reserve(variant, warehouse, three)
            .await
            .expect("call succeeds"));
        assert!(
            !inventory
                .try_reserve(variant, warehouse, three)
                .await
                .expect("call succeeds"),
            "only 2 units remain available"
        );

        inventory
            .release(variant, warehouse, three)
            .await
            .expect("release succeeds");
        assert!(inventory
            .try_reserve(variant, warehouse, three)
            .await
            .expect("call succeeds"));
    }

    #[tokio::test]
    async fn commit_consumes_on_hand_and_reserved_together() {
        let inventory = InMemoryInventory::new();
        let variant = VariantId::new(Uuid::new_v4());
        let warehouse = WarehouseId::new(Uuid::new_v4());
        inventory.set_on_hand(variant, warehouse, 5);

        let two = Quantity::try_new(2).expect("valid");
        assert!(inventory
            .try_reserve(variant, warehouse, two)
            .await
            .expect("call succeeds"));
        inventory
            .commit(variant, warehouse, two)
            .await
            .expect("commit succeeds");

        let level = inventory
            .levels(variant, warehouse)
            .await
            .expect("levels succeed");
        assert_eq!(level.on_hand, 3);
        assert_eq!(level.reserved, 0);
        assert_eq!(level.available(), 3);
    }
}
