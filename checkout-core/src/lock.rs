//! The checkout lock aggregate.
//!
//! A [`CheckoutLock`] is the record of exclusive, time-bounded ownership of a
//! cart while an order is being placed. It carries a coarse [`LockState`]
//! (`pending → active → completed | failed`) and a finer-grained
//! [`CheckoutPhase`] recording which protocol step is executing or was last
//! attempted. Terminal states are absorbing: no transition ever leaves
//! `completed` or `failed`.
//!
//! All mutation goes through [`LockTransition`] values applied by a store's
//! guarded compare-and-set, so the transition legality rules in this module
//! are the single source of truth for the lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CartId, LockId, SessionId, UserId};

/// Coarse lifecycle state of a checkout lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// Created but not yet activated; transient.
    Pending,
    /// Holding the cart; the state machine is (or was) executing phases.
    Active,
    /// Checkout succeeded and an order was produced. Terminal.
    Completed,
    /// Checkout failed or was cancelled/expired. Terminal.
    Failed,
}

impl LockState {
    /// Whether this state permits no further transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the transition `self → next` is legal.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Pending | Self::Active, Self::Failed)
        )
    }

    /// Stable snake_case name, as exposed by the status surface.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The ordered protocol steps a checkout attempt executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutPhase {
    /// Compute pricing once and persist immutable snapshots.
    PriceLock,
    /// Reserve stock per cart line across warehouses.
    InventoryReservation,
    /// Authorize payment for the locked grand total.
    PaymentAuthorization,
    /// Persist the order and commit the reserved stock.
    OrderCreation,
}

impl CheckoutPhase {
    /// All phases in execution order.
    pub const ALL: [Self; 4] = [
        Self::PriceLock,
        Self::InventoryReservation,
        Self::PaymentAuthorization,
        Self::OrderCreation,
    ];

    /// The first phase of every attempt.
    pub const fn first() -> Self {
        Self::PriceLock
    }

    /// The phase following this one, if any.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::PriceLock => Some(Self::InventoryReservation),
            Self::InventoryReservation => Some(Self::PaymentAuthorization),
            Self::PaymentAuthorization => Some(Self::OrderCreation),
            Self::OrderCreation => None,
        }
    }

    /// Stable snake_case name, as recorded in failure reasons.
    pub const fn name(self) -> &'static str {
        match self {
            Self::PriceLock => "price_lock",
            Self::InventoryReservation => "inventory_reservation",
            Self::PaymentAuthorization => "payment_authorization",
            Self::OrderCreation => "order_creation",
        }
    }
}

impl std::fmt::Display for CheckoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a failed lock failed.
///
/// Protocol phases map one-to-one; `Expired` and `UserCancelled` cover the
/// two administrative paths that fail a lock from outside the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    /// Failed while computing or persisting price snapshots.
    PriceLock,
    /// Failed while reserving stock.
    InventoryReservation,
    /// Failed while authorizing payment.
    PaymentAuthorization,
    /// Failed while persisting the order (payment already authorized).
    OrderCreation,
    /// Swept by the expiry cleanup after `expires_at` passed.
    Expired,
    /// Aborted by the owning user.
    UserCancelled,
}

impl FailurePhase {
    /// Stable snake_case name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::PriceLock => "price_lock",
            Self::InventoryReservation => "inventory_reservation",
            Self::PaymentAuthorization => "payment_authorization",
            Self::OrderCreation => "order_creation",
            Self::Expired => "expired",
            Self::UserCancelled => "user_cancelled",
        }
    }
}

impl From<CheckoutPhase> for FailurePhase {
    fn from(phase: CheckoutPhase) -> Self {
        match phase {
            CheckoutPhase::PriceLock => Self::PriceLock,
            CheckoutPhase::InventoryReservation => Self::InventoryReservation,
            CheckoutPhase::PaymentAuthorization => Self::PaymentAuthorization,
            CheckoutPhase::OrderCreation => Self::OrderCreation,
        }
    }
}

impl std::fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured record of why a lock failed. Never discarded once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    /// The phase (or administrative path) that failed.
    pub phase: FailurePhase,
    /// Human-readable description of the underlying error.
    pub message: String,
    /// Structured context for reconciliation and diagnostics.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl FailureReason {
    /// Creates a reason with no structured context.
    pub fn new(phase: impl Into<FailurePhase>, message: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            message: message.into(),
            context: serde_json::Value::Null,
        }
    }

    /// Attaches structured context to the reason.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// An attempted transition that the lifecycle rules reject.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The coarse state transition is not permitted.
    #[error("illegal lock state transition: {from} -> {to}")]
    InvalidState {
        /// State the lock was in.
        from: LockState,
        /// State the transition tried to reach.
        to: LockState,
    },
    /// Phases must advance strictly in protocol order.
    #[error("non-sequential phase advance: {current:?} -> {requested}")]
    NonSequentialPhase {
        /// Phase currently recorded on the lock.
        current: Option<CheckoutPhase>,
        /// Phase the transition tried to enter.
        requested: CheckoutPhase,
    },
}

/// A state/phase mutation applied to a lock through a guarded store update.
#[derive(Debug, Clone, PartialEq)]
pub enum LockTransition {
    /// `pending → active`, stamping the expiry deadline.
    Activate {
        /// When the lock stops being enforceable.
        expires_at: DateTime<Utc>,
    },
    /// Enter the next protocol phase while `active`.
    AdvancePhase {
        /// The phase being entered; must be the successor of the current one.
        phase: CheckoutPhase,
    },
    /// `active → completed`, stamping the completion time.
    Complete {
        /// When checkout completed.
        at: DateTime<Utc>,
    },
    /// `pending|active → failed`, recording the structured reason.
    Fail {
        /// When the failure was recorded.
        at: DateTime<Utc>,
        /// Why the lock failed.
        reason: FailureReason,
    },
}

/// One checkout attempt's exclusive hold on a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutLock {
    /// Unique id of this lock.
    pub id: LockId,
    /// The cart this lock owns. At most one non-terminal lock per cart.
    pub cart_id: CartId,
    /// The session that started the checkout.
    pub session_id: SessionId,
    /// The authenticated user, if any.
    pub user_id: Option<UserId>,
    /// Coarse lifecycle state.
    pub state: LockState,
    /// Finest phase entered so far, `None` before the first phase.
    pub phase: Option<CheckoutPhase>,
    /// When the lock was created.
    pub locked_at: DateTime<Utc>,
    /// Expiry deadline; always set once the lock is `active`.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the lock reached `completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the lock reached `failed`.
    pub failed_at: Option<DateTime<Utc>>,
    /// Why the lock failed, when it did.
    pub failure_reason: Option<FailureReason>,
}

impl CheckoutLock {
    /// Creates a new `pending` lock for the given cart and session.
    pub fn new(
        cart_id: CartId,
        session_id: SessionId,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LockId::new(),
            cart_id,
            session_id,
            user_id,
            state: LockState::Pending,
            phase: None,
            locked_at: now,
            expires_at: None,
            completed_at: None,
            failed_at: None,
            failure_reason: None,
        }
    }

    /// Whether the lock is currently `active`.
    pub fn is_active(&self) -> bool {
        self.state == LockState::Active
    }

    /// Whether the lock's expiry deadline has passed at `now`.
    ///
    /// A lock with no deadline (still `pending`) is never expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    /// Whether the lock reached `completed`.
    pub fn is_completed(&self) -> bool {
        self.state == LockState::Completed
    }

    /// Whether the lock reached `failed`.
    pub fn is_failed(&self) -> bool {
        self.state == LockState::Failed
    }

    /// Whether the lock currently prevents cart mutation at `now`.
    pub fn is_enforceable(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && !self.is_expired(now)
    }

    /// Applies a transition, enforcing lifecycle legality.
    ///
    /// Stores call this under their own concurrency guard; the legality
    /// rules here are deliberately independent of any storage backend.
    pub fn apply(&mut self, transition: LockTransition) -> Result<(), TransitionError> {
        match transition {
            LockTransition::Activate { expires_at } => {
                self.check_state(LockState::Active)?;
                self.state = LockState::Active;
                self.expires_at = Some(expires_at);
                Ok(())
            }
            LockTransition::AdvancePhase { phase } => {
                if self.state != LockState::Active {
                    return Err(TransitionError::InvalidState {
                        from: self.state,
                        to: LockState::Active,
                    });
                }
                let expected = self
                    .phase
                    .map_or(Some(CheckoutPhase::first()), CheckoutPhase::next);
                if expected != Some(phase) {
                    return Err(TransitionError::NonSequentialPhase {
                        current: self.phase,
                        requested: phase,
                    });
                }
                self.phase = Some(phase);
                Ok(())
            }
            LockTransition::Complete { at } => {
                self.check_state(LockState::Completed)?;
                self.state = LockState::Completed;
                self.completed_at = Some(at);
                Ok(())
            }
            LockTransition::Fail { at, reason } => {
                self.check_state(LockState::Failed)?;
                self.state = LockState::Failed;
                self.failed_at = Some(at);
                self.failure_reason = Some(reason);
                Ok(())
            }
        }
    }

    fn check_state(&self, to: LockState) -> Result<(), TransitionError> {
        if self.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(TransitionError::InvalidState {
                from: self.state,
                to,
            })
        }
    }
}
