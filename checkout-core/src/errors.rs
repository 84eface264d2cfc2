//! Error types for the checkout coordination core.
//!
//! Two layers, mirroring the boundary between protocol and persistence:
//!
//! - [`CheckoutError`]: business/protocol failures surfaced to callers of
//!   the service. Variants map onto the checkout failure taxonomy so that
//!   controllers can choose user-facing messaging without string matching.
//! - [`StoreError`]: persistence-layer failures, including the
//!   compare-and-set conflicts that arbitrate races between the state
//!   machine and the expiry sweep.
//!
//! Every phase failure carries enough structure to attribute it to a
//! [`CheckoutPhase`]; see [`CheckoutError::phase`].

use thiserror::Error;

use crate::lock::{CheckoutPhase, LockState, TransitionError};
use crate::types::{CartId, LockId, ReservationId, SessionId, VariantId};

/// Result alias for protocol-level operations.
pub type CheckoutResult<T> = Result<T, CheckoutError>;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures surfaced by the checkout service and state machine.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Another session already holds an active checkout lock for this cart.
    /// User-recoverable: retry once the other checkout finishes or expires.
    #[error("cart {cart_id} is already being checked out by another session")]
    ConcurrentCheckout {
        /// The contested cart.
        cart_id: CartId,
        /// The session holding the existing lock.
        holder_session: SessionId,
    },

    /// This session already has a checkout in flight for the cart.
    /// Callers should poll status rather than start again.
    #[error("checkout already in progress for cart {cart_id} under this session")]
    CheckoutInProgress {
        /// The cart being checked out.
        cart_id: CartId,
        /// The in-flight lock.
        lock_id: LockId,
    },

    /// A cart line could not be reserved in any warehouse.
    /// User-recoverable: adjust the cart and retry.
    #[error("insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// The variant that could not be reserved.
        variant_id: VariantId,
        /// Units the cart line needs.
        requested: u32,
        /// Best availability seen across candidate warehouses.
        available: u32,
    },

    /// The pricing engine failed while computing the locked totals.
    /// Transient; retrying the checkout is reasonable.
    #[error("price lock failed: {0}")]
    PriceLock(String),

    /// The payment gateway declined the authorization. Terminal for this
    /// attempt; the user must retry with a different payment method.
    #[error("payment declined: {0}")]
    PaymentDeclined(String),

    /// The payment gateway errored before producing a decision.
    #[error("payment gateway error: {0}")]
    PaymentGateway(String),

    /// Order persistence failed after payment was authorized. The
    /// authorization reference is carried here and preserved in the lock's
    /// failure reason; it must be reconciled, never silently dropped.
    #[error("order creation failed after payment authorization {authorization}: {message}")]
    OrderCreation {
        /// What went wrong writing the order.
        message: String,
        /// The authorization that was already obtained.
        authorization: crate::types::AuthorizationRef,
    },

    /// The cart reader has no cart with this id.
    #[error("cart {0} not found")]
    CartNotFound(CartId),

    /// The cart exists but has no lines to check out.
    #[error("cart {0} is empty")]
    CartEmpty(CartId),

    /// A cart mutation was rejected because an active lock holds the cart.
    #[error("cart {0} is locked by an active checkout")]
    CartLocked(CartId),

    /// No active lock exists for the cart.
    #[error("no active checkout lock for cart {0}")]
    NoActiveLock(CartId),

    /// The attempt lost a compare-and-set race (typically against the
    /// expiry sweep) and its work was rolled back as orphaned.
    #[error("checkout attempt for lock {lock_id} was superseded: {detail}")]
    AttemptSuperseded {
        /// The lock whose attempt lost the race.
        lock_id: LockId,
        /// What the guarded update observed.
        detail: String,
    },

    /// A persistence-layer failure.
    #[error("checkout store error: {0}")]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// The protocol phase this failure is attributed to, if any.
    pub const fn phase(&self) -> Option<CheckoutPhase> {
        match self {
            Self::PriceLock(_) => Some(CheckoutPhase::PriceLock),
            Self::InsufficientStock { .. } => Some(CheckoutPhase::InventoryReservation),
            Self::PaymentDeclined(_) | Self::PaymentGateway(_) => {
                Some(CheckoutPhase::PaymentAuthorization)
            }
            Self::OrderCreation { .. } => Some(CheckoutPhase::OrderCreation),
            _ => None,
        }
    }

    /// Whether the user can recover by adjusting their input and retrying.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentCheckout { .. }
                | Self::CheckoutInProgress { .. }
                | Self::InsufficientStock { .. }
                | Self::PriceLock(_)
                | Self::PaymentDeclined(_)
                | Self::CartEmpty(_)
        )
    }

    /// The message shown to the customer.
    ///
    /// Phase-appropriate wording rather than raw error text; an order
    /// persistence failure after a successful authorization reads as
    /// "order pending" so the customer is not told a charge failed when
    /// it did not.
    pub fn user_message(&self) -> String {
        match self {
            Self::ConcurrentCheckout { .. } | Self::CheckoutInProgress { .. } => {
                "This cart is already being checked out. Please wait for the \
                 current checkout to finish."
                    .to_owned()
            }
            Self::InsufficientStock { requested, available, .. } => format!(
                "An item in your cart is no longer available in the requested \
                 quantity ({requested} requested, {available} available)."
            ),
            Self::PriceLock(_) => {
                "We could not confirm current prices. Please try again.".to_owned()
            }
            Self::PaymentDeclined(_) => {
                "Your payment was declined. Please try a different payment method.".to_owned()
            }
            Self::PaymentGateway(_) => {
                "We could not reach the payment provider. Please try again.".to_owned()
            }
            Self::OrderCreation { .. } => {
                "Your payment was authorized and your order is pending \
                 confirmation. You have not been charged twice."
                    .to_owned()
            }
            Self::CartNotFound(_) => "This cart no longer exists.".to_owned(),
            Self::CartEmpty(_) => "Your cart is empty.".to_owned(),
            Self::CartLocked(_) => {
                "This cart cannot be changed while checkout is in progress.".to_owned()
            }
            Self::NoActiveLock(_) => "There is no checkout in progress for this cart.".to_owned(),
            Self::AttemptSuperseded { .. } => {
                "This checkout attempt timed out. Please try again.".to_owned()
            }
            Self::Store(_) => "Something went wrong. Please try again.".to_owned(),
        }
    }
}

/// Failures from the persistence layer backing the checkout stores.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// No lock with the given id exists.
    #[error("checkout lock {0} not found")]
    LockNotFound(LockId),

    /// A non-terminal lock already exists for the cart; the atomic
    /// find-or-create refused to create a second one.
    #[error("a non-terminal checkout lock already exists for cart {cart_id}")]
    LockExists {
        /// The cart whose lock already exists.
        cart_id: CartId,
        /// The lock currently holding the cart.
        lock_id: LockId,
        /// The session owning the existing lock.
        holder_session: SessionId,
    },

    /// A guarded update observed a different state than expected. The
    /// caller's view of the lock is stale: it lost a race and must treat
    /// its in-flight work as orphaned.
    #[error("state conflict on lock {lock_id}: expected {expected}, found {actual}")]
    StateConflict {
        /// The lock being updated.
        lock_id: LockId,
        /// The state the caller expected.
        expected: LockState,
        /// The state actually stored.
        actual: LockState,
    },

    /// The requested transition is illegal under the lock lifecycle rules.
    #[error("illegal lock transition: {0}")]
    IllegalTransition(#[from] TransitionError),

    /// No reservation with the given id exists.
    #[error("stock reservation {0} not found")]
    ReservationNotFound(ReservationId),

    /// A backend-specific failure (I/O, connection, serialization).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this error means the caller lost an optimistic-concurrency
    /// race rather than hit an infrastructure fault.
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::StateConflict { .. } | Self::LockExists { .. } | Self::IllegalTransition(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn phase_attribution_covers_the_taxonomy() {
        let variant = VariantId::new(Uuid::new_v4());
        assert_eq!(
            CheckoutError::PriceLock("boom".into()).phase(),
            Some(CheckoutPhase::PriceLock)
        );
        assert_eq!(
            CheckoutError::InsufficientStock {
                variant_id: variant,
                requested: 5,
                available: 3
            }
            .phase(),
            Some(CheckoutPhase::InventoryReservation)
        );
        assert_eq!(
            CheckoutError::PaymentDeclined("card declined".into()).phase(),
            Some(CheckoutPhase::PaymentAuthorization)
        );
        assert_eq!(
            CheckoutError::OrderCreation {
                message: "db down".into(),
                authorization: crate::types::AuthorizationRef::try_new("auth-1").expect("valid"),
            }
            .phase(),
            Some(CheckoutPhase::OrderCreation)
        );
        assert_eq!(
            CheckoutError::CartNotFound(CartId::new(Uuid::new_v4())).phase(),
            None
        );
    }

    #[test]
    fn order_creation_reads_as_order_pending() {
        let message = CheckoutError::OrderCreation {
            message: "writer down".into(),
            authorization: crate::types::AuthorizationRef::try_new("auth-1").expect("valid"),
        }
        .user_message();
        assert!(message.contains("pending"));
        assert!(!message.to_lowercase().contains("failed"));
    }

    #[test]
    fn conflict_classification() {
        let lock_id = LockId::new();
        assert!(StoreError::StateConflict {
            lock_id,
            expected: LockState::Active,
            actual: LockState::Failed,
        }
        .is_conflict());
        assert!(!StoreError::Backend("io".into()).is_conflict());
    }
}
