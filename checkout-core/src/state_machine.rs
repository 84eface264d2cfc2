//! The checkout state machine.
//!
//! Drives an active [`CheckoutLock`] through the four protocol phases in
//! order, persisting each phase's artifacts before advancing. Every phase
//! entry is a guarded compare-and-set on the lock, so an attempt that loses
//! a race against the expiry sweep observes a
//! [`StoreError::StateConflict`](crate::errors::StoreError::StateConflict)
//! on its next write and treats its own work as orphaned instead of
//! committing late.
//!
//! The rollback contract is scoped to the owning lock: release that lock's
//! unreleased reservations, delete that lock's snapshot rows, and touch
//! nothing belonging to any other lock.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::collaborators::{
    AuthorizationOutcome, Cart, CartLine, CheckoutCollaborators, CheckoutEvent, OrderDraft,
    PaymentRequest,
};
use crate::config::CheckoutConfig;
use crate::errors::{CheckoutError, CheckoutResult, StoreError};
use crate::lock::{CheckoutLock, CheckoutPhase, FailureReason, LockState, LockTransition};
use crate::reservation::{ReservationHolder, StockReservation};
use crate::snapshot::{LineAmounts, PriceSnapshot};
use crate::store::CheckoutStores;
use crate::types::{AuthorizationRef, OrderRef, PaymentMethod};
use crate::warehouse::WarehouseSelector;

/// What a rollback removed, for sweep accounting and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Reservations newly released.
    pub reservations_released: usize,
    /// Snapshot rows deleted.
    pub snapshots_deleted: usize,
}

/// Orchestrates one checkout attempt over the stores and collaborators.
#[derive(Clone)]
pub struct CheckoutStateMachine {
    stores: CheckoutStores,
    collaborators: CheckoutCollaborators,
    selector: Arc<dyn WarehouseSelector>,
    config: CheckoutConfig,
}

impl std::fmt::Debug for CheckoutStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutStateMachine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CheckoutStateMachine {
    /// Creates a state machine over the given stores and collaborators.
    pub fn new(
        stores: CheckoutStores,
        collaborators: CheckoutCollaborators,
        selector: Arc<dyn WarehouseSelector>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            stores,
            collaborators,
            selector,
            config,
        }
    }

    /// Runs all phases for an active lock.
    ///
    /// On success the lock is `completed` and the created order's reference
    /// is returned. On any phase failure everything this attempt created is
    /// rolled back, the lock is failed with a structured reason, a
    /// `CheckoutFailed` event is published, and the typed error is
    /// returned to the caller.
    #[instrument(skip_all, fields(lock_id = %lock.id, cart_id = %lock.cart_id))]
    pub async fn run(
        &self,
        lock: &CheckoutLock,
        cart: &Cart,
        payment_method: PaymentMethod,
    ) -> CheckoutResult<OrderRef> {
        match self.execute(lock, cart, payment_method).await {
            Ok(order) => Ok(order),
            Err((phase, err)) => Err(self.fail_attempt(lock, phase, err).await),
        }
    }

    async fn execute(
        &self,
        lock: &CheckoutLock,
        cart: &Cart,
        payment_method: PaymentMethod,
    ) -> Result<OrderRef, (CheckoutPhase, CheckoutError)> {
        use CheckoutPhase::{InventoryReservation, OrderCreation, PaymentAuthorization, PriceLock};

        self.enter_phase(lock, PriceLock)
            .await
            .map_err(|e| (PriceLock, e))?;
        self.lock_prices(lock, cart)
            .await
            .map_err(|e| (PriceLock, e))?;

        self.enter_phase(lock, InventoryReservation)
            .await
            .map_err(|e| (InventoryReservation, e))?;
        let reservations = self
            .reserve_inventory(lock, cart)
            .await
            .map_err(|e| (InventoryReservation, e))?;

        self.enter_phase(lock, PaymentAuthorization)
            .await
            .map_err(|e| (PaymentAuthorization, e))?;
        let authorization = self
            .authorize_payment(lock, payment_method)
            .await
            .map_err(|e| (PaymentAuthorization, e))?;

        self.enter_phase(lock, OrderCreation)
            .await
            .map_err(|e| (OrderCreation, e))?;
        let order = self
            .create_order(lock, authorization, &reservations)
            .await
            .map_err(|e| (OrderCreation, e))?;

        Ok(order)
    }

    /// Guarded phase entry: advances the lock's phase iff it is still
    /// `active`. Losing the guard means the sweep (or a cancel) got there
    /// first and this attempt is orphaned.
    async fn enter_phase(
        &self,
        lock: &CheckoutLock,
        phase: CheckoutPhase,
    ) -> CheckoutResult<CheckoutLock> {
        debug!(phase = %phase, "entering checkout phase");
        self.stores
            .locks
            .transition(
                lock.id,
                LockState::Active,
                LockTransition::AdvancePhase { phase },
            )
            .await
            .map_err(|err| match err {
                StoreError::StateConflict { lock_id, actual, .. } => {
                    CheckoutError::AttemptSuperseded {
                        lock_id,
                        detail: format!("lock moved to {actual} while entering {phase}"),
                    }
                }
                other => other.into(),
            })
    }

    /// Phase 1: compute pricing once and persist the immutable snapshot
    /// rows. Nothing is reserved yet, so failure here needs no
    /// compensation beyond the generic rollback.
    async fn lock_prices(&self, lock: &CheckoutLock, cart: &Cart) -> CheckoutResult<()> {
        let pricing = self.collaborators.pricing.price(cart).await?;
        let now = Utc::now();

        let mut rows = Vec::with_capacity(pricing.lines.len() + 1);
        rows.push(PriceSnapshot::cart_total(lock.id, pricing.totals(), now));
        for line in &pricing.lines {
            rows.push(PriceSnapshot::line(
                lock.id,
                LineAmounts {
                    cart_line_id: line.cart_line_id,
                    variant_id: line.variant_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    line_total: line.line_total,
                },
                now,
            ));
        }
        self.stores.snapshots.insert_all(rows).await?;
        debug!(lines = pricing.lines.len(), "prices locked");
        Ok(())
    }

    /// Phase 2: reserve every cart line. If any line cannot be satisfied,
    /// the reservations created during this same attempt are released
    /// before the error propagates.
    async fn reserve_inventory(
        &self,
        lock: &CheckoutLock,
        cart: &Cart,
    ) -> CheckoutResult<Vec<StockReservation>> {
        let holder = ReservationHolder::CheckoutLock(lock.id);
        let expires_at = Utc::now() + self.config.reservation_ttl();

        let mut created: Vec<StockReservation> = Vec::with_capacity(cart.lines.len());
        for line in &cart.lines {
            match self.reserve_line(line, holder, expires_at).await {
                Ok(reservation) => created.push(reservation),
                Err(err) => {
                    self.release_created(&created).await;
                    return Err(err);
                }
            }
        }
        debug!(reservations = created.len(), "inventory reserved");
        Ok(created)
    }

    /// Reserves one line in the best candidate warehouse that admits it.
    async fn reserve_line(
        &self,
        line: &CartLine,
        holder: ReservationHolder,
        expires_at: chrono::DateTime<Utc>,
    ) -> CheckoutResult<StockReservation> {
        let inventory = self.collaborators.inventory.as_ref();
        let candidates = self
            .selector
            .candidates(line.variant_id, line.quantity, inventory)
            .await?;

        for warehouse_id in candidates {
            let admitted = inventory
                .try_reserve(line.variant_id, warehouse_id, line.quantity)
                .await?;
            if !admitted {
                // Stock moved between selection and admission; next candidate.
                continue;
            }

            let reservation = StockReservation::new(
                line.variant_id,
                warehouse_id,
                line.quantity,
                holder,
                Utc::now(),
                expires_at,
            );
            if let Err(err) = self.stores.reservations.insert(reservation.clone()).await {
                // Undo the admission we just won before surfacing the error.
                if let Err(release_err) = inventory
                    .release(line.variant_id, warehouse_id, line.quantity)
                    .await
                {
                    error!(
                        variant_id = %line.variant_id,
                        warehouse_id = %warehouse_id,
                        error = %release_err,
                        "failed to return admission after reservation insert error"
                    );
                }
                return Err(err.into());
            }
            return Ok(reservation);
        }

        let available = self.best_availability(line).await;
        Err(CheckoutError::InsufficientStock {
            variant_id: line.variant_id,
            requested: line.quantity.units(),
            available,
        })
    }

    /// Best availability across the configured warehouses, for the
    /// insufficient-stock error. Diagnostic only; admission has already
    /// been refused.
    async fn best_availability(&self, line: &CartLine) -> u32 {
        let mut best = 0;
        for &warehouse_id in &self.config.warehouse_priority {
            match self
                .collaborators
                .inventory
                .levels(line.variant_id, warehouse_id)
                .await
            {
                Ok(level) => best = best.max(level.available()),
                Err(err) => {
                    warn!(warehouse_id = %warehouse_id, error = %err, "availability probe failed");
                }
            }
        }
        best
    }

    /// Phase 3: authorize payment against the locked grand total. The
    /// amount is read from the cart-level snapshot, never re-derived.
    async fn authorize_payment(
        &self,
        lock: &CheckoutLock,
        payment_method: PaymentMethod,
    ) -> CheckoutResult<AuthorizationRef> {
        let snapshots = self.stores.snapshots.for_lock(lock.id).await?;
        let totals = snapshots
            .iter()
            .find_map(PriceSnapshot::totals)
            .ok_or_else(|| {
                CheckoutError::PriceLock(format!("no cart-level snapshot for lock {}", lock.id))
            })?;

        let request = PaymentRequest {
            amount: totals.grand_total,
            currency: totals.currency.clone(),
            method: payment_method,
        };
        match self.collaborators.payments.authorize(&request).await? {
            AuthorizationOutcome::Authorized { reference } => {
                debug!(authorization = %reference, "payment authorized");
                Ok(reference)
            }
            AuthorizationOutcome::Declined { reason } => {
                Err(CheckoutError::PaymentDeclined(reason))
            }
        }
    }

    /// Phase 4: persist the order, commit the reserved stock, and complete
    /// the lock.
    async fn create_order(
        &self,
        lock: &CheckoutLock,
        authorization: AuthorizationRef,
        reservations: &[StockReservation],
    ) -> CheckoutResult<OrderRef> {
        let snapshots = self.stores.snapshots.for_lock(lock.id).await?;
        let draft = OrderDraft {
            lock_id: lock.id,
            cart_id: lock.cart_id,
            user_id: lock.user_id,
            snapshots,
            authorization: authorization.clone(),
        };
        let order = self
            .collaborators
            .orders
            .create_order(&draft)
            .await
            .map_err(|err| match err {
                already @ CheckoutError::OrderCreation { .. } => already,
                other => CheckoutError::OrderCreation {
                    message: other.to_string(),
                    authorization: authorization.clone(),
                },
            })?;

        // The stock now belongs to the order: consume each hold instead of
        // returning it. Failures here are reconcilable (the reservation
        // sweep picks up stragglers), so they do not fail the checkout.
        let now = Utc::now();
        for reservation in reservations {
            if let Err(err) = self
                .collaborators
                .inventory
                .commit(
                    reservation.variant_id,
                    reservation.warehouse_id,
                    reservation.quantity,
                )
                .await
            {
                error!(reservation_id = %reservation.id, error = %err, "stock commit failed");
            }
            if let Err(err) = self.stores.reservations.release(reservation.id, now).await {
                error!(reservation_id = %reservation.id, error = %err, "reservation release failed");
            }
        }

        self.stores
            .locks
            .transition(
                lock.id,
                LockState::Active,
                LockTransition::Complete { at: Utc::now() },
            )
            .await
            .map_err(|err| match err {
                StoreError::StateConflict { lock_id, actual, .. } => {
                    CheckoutError::AttemptSuperseded {
                        lock_id,
                        detail: format!("lock moved to {actual} before completion"),
                    }
                }
                other => other.into(),
            })?;

        self.collaborators
            .events
            .publish(CheckoutEvent::CheckoutCompleted {
                lock_id: lock.id,
                cart_id: lock.cart_id,
                order: order.clone(),
            })
            .await;
        Ok(order)
    }

    /// Converts a phase failure into a rolled-back, failed lock and hands
    /// the original error back to the caller.
    async fn fail_attempt(
        &self,
        lock: &CheckoutLock,
        phase: CheckoutPhase,
        err: CheckoutError,
    ) -> CheckoutError {
        warn!(phase = %phase, error = %err, "checkout phase failed; rolling back");

        if let Err(rollback_err) = self.rollback(lock).await {
            // The original failure still wins; the sweep retries cleanup.
            error!(error = %rollback_err, "rollback after phase failure incomplete");
        }

        let reason = Self::failure_reason(phase, &err);
        match self
            .stores
            .locks
            .transition(
                lock.id,
                LockState::Active,
                LockTransition::Fail {
                    at: Utc::now(),
                    reason: reason.clone(),
                },
            )
            .await
        {
            Ok(failed) => {
                self.collaborators
                    .events
                    .publish(CheckoutEvent::CheckoutFailed {
                        lock_id: failed.id,
                        cart_id: failed.cart_id,
                        reason,
                    })
                    .await;
            }
            Err(StoreError::StateConflict { actual, .. }) => {
                // The sweep or a cancel already failed the lock and
                // published the event; this attempt was orphaned.
                debug!(actual = %actual, "lock already terminal after phase failure");
            }
            Err(store_err) => {
                error!(error = %store_err, "failed to record checkout failure");
            }
        }
        err
    }

    /// The structured reason recorded on the lock for a phase failure.
    fn failure_reason(phase: CheckoutPhase, err: &CheckoutError) -> FailureReason {
        let mut reason = FailureReason::new(phase, err.to_string());
        if let CheckoutError::OrderCreation { authorization, .. } = err {
            // Payment is already held; flag the lock for reconciliation.
            reason = reason.with_context(serde_json::json!({
                "order_pending": true,
                "authorization": authorization.as_ref(),
            }));
        }
        reason
    }

    /// Releases everything attributed to `lock` that this or any earlier
    /// attempt at the same lock created: unreleased reservations (returning
    /// their stock) and snapshot rows. Artifacts of other locks are never
    /// touched. Idempotent.
    pub async fn rollback(&self, lock: &CheckoutLock) -> CheckoutResult<RollbackReport> {
        let holder = ReservationHolder::CheckoutLock(lock.id);
        let unreleased = self.stores.reservations.unreleased_for_holder(holder).await?;

        let mut report = RollbackReport::default();
        let now = Utc::now();
        for reservation in &unreleased {
            self.collaborators
                .inventory
                .release(
                    reservation.variant_id,
                    reservation.warehouse_id,
                    reservation.quantity,
                )
                .await?;
            if self.stores.reservations.release(reservation.id, now).await? {
                report.reservations_released += 1;
            }
        }

        report.snapshots_deleted = self.stores.snapshots.delete_for_lock(lock.id).await?;
        debug!(
            released = report.reservations_released,
            snapshots = report.snapshots_deleted,
            "rollback complete"
        );
        Ok(report)
    }

    /// Best-effort release of reservations created mid-phase, before the
    /// phase error propagates.
    async fn release_created(&self, created: &[StockReservation]) {
        let now = Utc::now();
        for reservation in created {
            if let Err(err) = self
                .collaborators
                .inventory
                .release(
                    reservation.variant_id,
                    reservation.warehouse_id,
                    reservation.quantity,
                )
                .await
            {
                error!(reservation_id = %reservation.id, error = %err, "intra-phase stock release failed");
            }
            if let Err(err) = self.stores.reservations.release(reservation.id, now).await {
                error!(reservation_id = %reservation.id, error = %err, "intra-phase reservation release failed");
            }
        }
    }
}
