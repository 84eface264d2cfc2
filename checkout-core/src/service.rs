//! The public entry point of the checkout coordination core.
//!
//! [`CheckoutService`] owns exclusivity (one non-terminal lock per cart),
//! runs the state machine for new attempts, answers status queries, and
//! sweeps expired locks and reservations.
//!
//! Race arbitration: every terminal transition made here is a guarded
//! compare-and-set expecting `active`. The sweep (and cancel) fail the lock
//! *first* and roll back second, so an in-flight attempt discovers the loss
//! at its next guarded write and cleans up after itself.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{CheckoutCollaborators, CheckoutEvent};
use crate::config::CheckoutConfig;
use crate::diagnostics::{CheckoutStats, LockDetail};
use crate::errors::{CheckoutError, CheckoutResult, StoreError};
use crate::lock::{CheckoutLock, FailurePhase, FailureReason, LockState, LockTransition};
use crate::lock::CheckoutPhase;
use crate::reservation::ReservationHolder;
use crate::state_machine::CheckoutStateMachine;
use crate::store::CheckoutStores;
use crate::types::{CartId, LockId, OrderRef, PaymentMethod, SessionId, UserId};
use crate::warehouse::{PriorityOrder, WarehouseSelector};
use serde::Serialize;

/// Everything a caller supplies to start a checkout.
///
/// Session and user identity are explicit parameters; the core never reads
/// ambient request state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    /// The cart to check out.
    pub cart_id: CartId,
    /// The session requesting the checkout.
    pub session_id: SessionId,
    /// The authenticated user, if any.
    pub user_id: Option<UserId>,
    /// The payment method to authorize against.
    pub payment_method: PaymentMethod,
}

/// A completed checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSuccess {
    /// The lock that drove the attempt (now `completed`).
    pub lock_id: LockId,
    /// The order the attempt produced.
    pub order: OrderRef,
}

/// Answer to a status poll for a cart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CheckoutStatus {
    /// The cart reader has no cart with this id.
    NoCart,
    /// The cart exists; details of its lock, if any.
    Report(StatusReport),
}

/// Lock details reported by a status poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Whether an active, unexpired lock currently holds the cart.
    pub locked: bool,
    /// Whether a new checkout could start now.
    pub can_checkout: bool,
    /// The lock's state, if a non-terminal lock exists.
    pub state: Option<LockState>,
    /// Stable snake_case name of `state`.
    pub state_name: Option<String>,
    /// The phase the lock is in or last attempted.
    pub phase: Option<CheckoutPhase>,
    /// When the lock expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    /// The report for a cart with no lock at all.
    pub fn unlocked() -> Self {
        Self {
            locked: false,
            can_checkout: true,
            state: None,
            state_name: None,
            phase: None,
            expires_at: None,
        }
    }
}

/// Counts returned by the combined periodic sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Expired locks transitioned to `failed` by this invocation.
    pub expired_locks: usize,
    /// Orphaned reservations newly released by this invocation.
    pub expired_reservations: usize,
}

/// Coordinates checkout attempts over a set of stores and collaborators.
#[derive(Clone)]
pub struct CheckoutService {
    stores: CheckoutStores,
    collaborators: CheckoutCollaborators,
    machine: CheckoutStateMachine,
    config: CheckoutConfig,
}

impl std::fmt::Debug for CheckoutService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CheckoutService {
    /// Creates a service using the default priority-order warehouse policy
    /// configured in `config`.
    pub fn new(
        stores: CheckoutStores,
        collaborators: CheckoutCollaborators,
        config: CheckoutConfig,
    ) -> Self {
        let selector: Arc<dyn WarehouseSelector> =
            Arc::new(PriorityOrder::new(config.warehouse_priority.clone()));
        Self::with_selector(stores, collaborators, config, selector)
    }

    /// Creates a service with a custom warehouse selection policy.
    pub fn with_selector(
        stores: CheckoutStores,
        collaborators: CheckoutCollaborators,
        config: CheckoutConfig,
        selector: Arc<dyn WarehouseSelector>,
    ) -> Self {
        let machine = CheckoutStateMachine::new(
            stores.clone(),
            collaborators.clone(),
            selector,
            config.clone(),
        );
        Self {
            stores,
            collaborators,
            machine,
            config,
        }
    }

    /// Starts a checkout attempt for a cart and drives it to completion.
    ///
    /// Acquires the cart's lock atomically, activates it with the
    /// configured TTL, publishes `CheckoutStarted`, and runs all four
    /// phases synchronously. Fails with
    /// [`CheckoutError::ConcurrentCheckout`] if another session already
    /// holds an active, unexpired lock for this cart; a stale (expired but
    /// unswept) lock is swept inline and the attempt proceeds.
    #[instrument(skip_all, fields(cart_id = %request.cart_id, session_id = %request.session_id))]
    pub async fn start_checkout(&self, request: CheckoutRequest) -> CheckoutResult<CheckoutSuccess> {
        let cart = self
            .collaborators
            .carts
            .cart(request.cart_id)
            .await?
            .ok_or(CheckoutError::CartNotFound(request.cart_id))?;
        if cart.lines.is_empty() {
            return Err(CheckoutError::CartEmpty(cart.id));
        }

        let lock = self.acquire_lock(&request).await?;

        let expires_at = Utc::now() + self.config.lock_ttl;
        let active = self
            .stores
            .locks
            .transition(
                lock.id,
                LockState::Pending,
                LockTransition::Activate { expires_at },
            )
            .await?;
        info!(lock_id = %active.id, %expires_at, "checkout started");

        self.collaborators
            .events
            .publish(CheckoutEvent::CheckoutStarted {
                lock_id: active.id,
                cart_id: active.cart_id,
                session_id: active.session_id,
                expires_at,
            })
            .await;

        let order = self
            .machine
            .run(&active, &cart, request.payment_method.clone())
            .await?;
        Ok(CheckoutSuccess {
            lock_id: active.id,
            order,
        })
    }

    /// Atomic find-or-create of the cart's lock, sweeping a stale holder
    /// inline. At most one retry after a sweep, so two live contenders
    /// still resolve to exactly one winner.
    async fn acquire_lock(&self, request: &CheckoutRequest) -> CheckoutResult<CheckoutLock> {
        for attempt in 0..2 {
            let candidate = CheckoutLock::new(
                request.cart_id,
                request.session_id,
                request.user_id,
                Utc::now(),
            );
            match self.stores.locks.insert(candidate).await {
                Ok(lock) => return Ok(lock),
                Err(StoreError::LockExists {
                    lock_id,
                    holder_session,
                    cart_id,
                }) => {
                    let holder = self.stores.locks.get(lock_id).await?;
                    if let Some(holder) = holder {
                        if holder.is_expired(Utc::now()) && attempt == 0 {
                            debug!(lock_id = %holder.id, "sweeping stale lock before retry");
                            self.expire_lock(&holder).await;
                            continue;
                        }
                        if holder.session_id == request.session_id {
                            return Err(CheckoutError::CheckoutInProgress {
                                cart_id,
                                lock_id: holder.id,
                            });
                        }
                    }
                    return Err(CheckoutError::ConcurrentCheckout {
                        cart_id,
                        holder_session,
                    });
                }
                Err(other) => return Err(other.into()),
            }
        }
        // Second insert also collided; report the cart as contended.
        let holder = self.stores.locks.find_active_for_cart(request.cart_id).await?;
        Err(match holder {
            Some(lock) => CheckoutError::ConcurrentCheckout {
                cart_id: request.cart_id,
                holder_session: lock.session_id,
            },
            None => CheckoutError::Store(StoreError::Backend(
                "lock acquisition raced repeatedly".to_owned(),
            )),
        })
    }

    /// Whether an active, unexpired lock currently holds the cart.
    ///
    /// Cart mutation paths call this and reject writes with
    /// [`CheckoutError::CartLocked`] while it returns `true`.
    pub async fn is_cart_locked(&self, cart_id: CartId) -> CheckoutResult<bool> {
        let lock = self.stores.locks.find_active_for_cart(cart_id).await?;
        Ok(lock.is_some_and(|l| l.is_enforceable(Utc::now())))
    }

    /// The current checkout status of a cart, for polling.
    pub async fn checkout_status(&self, cart_id: CartId) -> CheckoutResult<CheckoutStatus> {
        if self.collaborators.carts.cart(cart_id).await?.is_none() {
            return Ok(CheckoutStatus::NoCart);
        }
        let lock = self.stores.locks.find_active_for_cart(cart_id).await?;
        Ok(CheckoutStatus::Report(match lock {
            None => StatusReport::unlocked(),
            Some(lock) => {
                let locked = lock.is_enforceable(Utc::now());
                StatusReport {
                    locked,
                    can_checkout: !locked,
                    state: Some(lock.state),
                    state_name: Some(lock.state.name().to_owned()),
                    phase: lock.phase,
                    expires_at: lock.expires_at,
                }
            }
        }))
    }

    /// User-initiated abort of the cart's active checkout. Idempotent:
    /// returns `false` when there is nothing to cancel.
    #[instrument(skip(self), fields(cart_id = %cart_id))]
    pub async fn cancel_checkout(&self, cart_id: CartId) -> CheckoutResult<bool> {
        let Some(lock) = self.stores.locks.find_active_for_cart(cart_id).await? else {
            return Ok(false);
        };

        let reason = FailureReason::new(FailurePhase::UserCancelled, "cancelled by user");
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
                if let Err(err) = self.machine.rollback(&failed).await {
                    warn!(lock_id = %failed.id, error = %err, "rollback after cancel incomplete");
                }
                self.collaborators
                    .events
                    .publish(CheckoutEvent::CheckoutFailed {
                        lock_id: failed.id,
                        cart_id: failed.cart_id,
                        reason,
                    })
                    .await;
                info!(lock_id = %failed.id, "checkout cancelled");
                Ok(true)
            }
            // Lost the race to completion or the sweep; nothing to cancel.
            Err(StoreError::StateConflict { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Sweeps active locks whose TTL has passed: each is failed with
    /// reason `expired`, rolled back, and announced. Returns how many
    /// locks this invocation transitioned.
    ///
    /// Idempotent and safe to run concurrently with itself: the guarded
    /// transition ensures each expired lock is processed at most once, and
    /// one lock's cleanup failure never blocks the rest.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_locks(&self) -> CheckoutResult<usize> {
        let now = Utc::now();
        let expired = self
            .stores
            .locks
            .list_expired(now, self.config.sweep_limit)
            .await?;

        let mut processed = 0;
        for lock in expired {
            if self.expire_lock(&lock).await {
                processed += 1;
            }
        }
        if processed > 0 {
            info!(processed, "expired checkout locks swept");
        }
        Ok(processed)
    }

    /// Fails one expired lock and rolls it back. Returns whether this call
    /// won the terminal transition.
    async fn expire_lock(&self, lock: &CheckoutLock) -> bool {
        let reason = FailureReason::new(FailurePhase::Expired, "checkout lock expired");
        let failed = match self
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
            Ok(failed) => failed,
            Err(StoreError::StateConflict { .. }) => return false,
            Err(err) => {
                warn!(lock_id = %lock.id, error = %err, "expiry transition failed");
                return false;
            }
        };

        if let Err(err) = self.machine.rollback(&failed).await {
            warn!(lock_id = %failed.id, error = %err, "rollback of expired lock incomplete");
        }
        self.collaborators
            .events
            .publish(CheckoutEvent::CheckoutFailed {
                lock_id: failed.id,
                cart_id: failed.cart_id,
                reason,
            })
            .await;
        true
    }

    /// Releases reservations whose own expiry passed without their holder
    /// cleaning them up. Returns how many were newly released.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_reservations(&self) -> CheckoutResult<usize> {
        let now = Utc::now();
        let expired = self
            .stores
            .reservations
            .list_expired(now, self.config.sweep_limit)
            .await?;

        let mut released = 0;
        for reservation in expired {
            match self.stores.reservations.release(reservation.id, now).await {
                Ok(true) => {
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
                        warn!(reservation_id = %reservation.id, error = %err, "stock release failed during sweep");
                    }
                    released += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(reservation_id = %reservation.id, error = %err, "reservation sweep failed; continuing");
                }
            }
        }
        if released > 0 {
            info!(released, "orphaned reservations swept");
        }
        Ok(released)
    }

    /// Runs both sweeps, for periodic ops invocation.
    pub async fn cleanup(&self) -> CheckoutResult<CleanupReport> {
        Ok(CleanupReport {
            expired_locks: self.cleanup_expired_locks().await?,
            expired_reservations: self.cleanup_expired_reservations().await?,
        })
    }

    /// Full detail for one lock: the record plus its snapshots and
    /// reservations (released ones included).
    pub async fn lock_detail(&self, lock_id: LockId) -> CheckoutResult<Option<LockDetail>> {
        let Some(lock) = self.stores.locks.get(lock_id).await? else {
            return Ok(None);
        };
        let snapshots = self.stores.snapshots.for_lock(lock_id).await?;
        let reservations = self
            .stores
            .reservations
            .for_holder(ReservationHolder::CheckoutLock(lock_id))
            .await?;
        Ok(Some(LockDetail {
            lock,
            snapshots,
            reservations,
        }))
    }

    /// Aggregate counts and a failure-phase histogram over locks created
    /// in `[from, to)`.
    pub async fn stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CheckoutResult<CheckoutStats> {
        let locks = self.stores.locks.list_in_window(from, to).await?;
        let mut stats = CheckoutStats::default();
        let now = Utc::now();
        for lock in locks {
            match lock.state {
                LockState::Completed => stats.completed += 1,
                LockState::Failed => {
                    stats.failed += 1;
                    if let Some(reason) = &lock.failure_reason {
                        *stats
                            .failures_by_phase
                            .entry(reason.phase.name().to_owned())
                            .or_insert(0) += 1;
                    }
                }
                LockState::Active if lock.is_expired(now) => stats.expired += 1,
                LockState::Pending | LockState::Active => stats.active += 1,
            }
        }
        Ok(stats)
    }
}
