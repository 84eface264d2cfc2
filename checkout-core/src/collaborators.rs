//! Contracts of the external collaborators the protocol consumes.
//!
//! The core coordinates; it does not price carts, move money, or persist
//! orders. Each of those concerns sits behind a trait here, implemented by
//! the surrounding platform (or by mocks in tests). Collaborator failures
//! are reported in the checkout error taxonomy so the state machine can
//! attribute them to the right phase.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CheckoutResult;
use crate::lock::FailureReason;
use crate::snapshot::CartTotals;
use crate::types::{
    AuthorizationRef, CartId, CartLineId, CurrencyCode, ExchangeRate, LockId, Money, OrderRef,
    PaymentMethod, Quantity, SessionId, UserId, VariantId, WarehouseId,
};

/// One line of a cart: a variant and how many units of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// The line's id within its cart.
    pub id: CartLineId,
    /// The variant being bought.
    pub variant_id: VariantId,
    /// Units being bought.
    pub quantity: Quantity,
}

/// A cart as read at the start of a checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    /// The cart's id.
    pub id: CartId,
    /// Current lines.
    pub lines: Vec<CartLine>,
}

/// Read-only access to cart contents.
#[async_trait]
pub trait CartReader: Send + Sync {
    /// The cart's current lines, or `None` if no such cart exists.
    async fn cart(&self, cart_id: CartId) -> CheckoutResult<Option<Cart>>;
}

/// One line's computed pricing, as returned by the pricing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinePricing {
    /// The cart line priced.
    pub cart_line_id: CartLineId,
    /// The variant priced.
    pub variant_id: VariantId,
    /// Units priced.
    pub quantity: Quantity,
    /// Price per unit.
    pub unit_price: Money,
    /// Total for the line.
    pub line_total: Money,
}

/// The pricing engine's full output for a cart: totals plus a per-line
/// breakdown. Consumed exactly once per checkout attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingBreakdown {
    /// Sum of line totals before discounts and tax.
    pub subtotal: Money,
    /// Total discount applied.
    pub discount_total: Money,
    /// Total tax applied.
    pub tax_total: Money,
    /// Amount to authorize.
    pub grand_total: Money,
    /// Currency of all amounts.
    pub currency: CurrencyCode,
    /// Conversion rate from the base currency.
    pub exchange_rate: ExchangeRate,
    /// Per-line breakdown.
    pub lines: Vec<LinePricing>,
}

impl PricingBreakdown {
    /// The cart-level totals, as frozen into the cart snapshot row.
    pub fn totals(&self) -> CartTotals {
        CartTotals {
            subtotal: self.subtotal,
            discount_total: self.discount_total,
            tax_total: self.tax_total,
            grand_total: self.grand_total,
            currency: self.currency.clone(),
            exchange_rate: self.exchange_rate,
        }
    }
}

/// Computes pricing for a cart. Pricing-rule evaluation, tax, and shipping
/// live behind this trait; the core only captures the result.
#[async_trait]
pub trait PricingEngine: Send + Sync {
    /// Prices the cart. Failures surface as
    /// [`CheckoutError::PriceLock`](crate::errors::CheckoutError::PriceLock).
    async fn price(&self, cart: &Cart) -> CheckoutResult<PricingBreakdown>;
}

/// A warehouse's stock position for one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    /// Physical units on hand.
    pub on_hand: u32,
    /// Units already promised to reservations.
    pub reserved: u32,
}

impl StockLevel {
    /// Units still available to sell.
    pub const fn available(self) -> u32 {
        self.on_hand.saturating_sub(self.reserved)
    }
}

/// Inventory admission control.
///
/// `try_reserve` is the serialization point for check-then-reserve: it must
/// be atomic per (variant, warehouse) so concurrent checkouts cannot
/// oversell the same stock.
#[async_trait]
pub trait InventoryLevels: Send + Sync {
    /// The current stock position for a variant in a warehouse.
    async fn levels(&self, variant_id: VariantId, warehouse_id: WarehouseId)
        -> CheckoutResult<StockLevel>;

    /// Atomically increments the reserved count by `quantity` iff
    /// `available >= quantity`. Returns whether the hold was admitted.
    async fn try_reserve(
        &self,
        variant_id: VariantId,
        warehouse_id: WarehouseId,
        quantity: Quantity,
    ) -> CheckoutResult<bool>;

    /// Returns `quantity` units to the available pool (rollback path).
    async fn release(
        &self,
        variant_id: VariantId,
        warehouse_id: WarehouseId,
        quantity: Quantity,
    ) -> CheckoutResult<()>;

    /// Converts a hold into committed stock: the reserved count and the
    /// on-hand count both drop by `quantity` (order-creation path).
    async fn commit(
        &self,
        variant_id: VariantId,
        warehouse_id: WarehouseId,
        quantity: Quantity,
    ) -> CheckoutResult<()>;
}

/// What the customer is paying with, and how much.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Amount to authorize, from the locked cart snapshot.
    pub amount: Money,
    /// Currency of the amount.
    pub currency: CurrencyCode,
    /// The selected payment method.
    pub method: PaymentMethod,
}

/// The gateway's decision on an authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationOutcome {
    /// Funds are held; capture happens after order creation.
    Authorized {
        /// Gateway reference for capture and reconciliation.
        reference: AuthorizationRef,
    },
    /// The gateway refused the charge.
    Declined {
        /// Gateway-supplied decline reason.
        reason: String,
    },
}

/// Drives the payment gateway's authorize contract. Capture is out of
/// scope for the core.
#[async_trait]
pub trait PaymentAuthorizer: Send + Sync {
    /// Requests an authorization. Gateway transport failures surface as
    /// [`CheckoutError::PaymentGateway`](crate::errors::CheckoutError::PaymentGateway);
    /// a decline is a successful call returning
    /// [`AuthorizationOutcome::Declined`].
    async fn authorize(&self, request: &PaymentRequest) -> CheckoutResult<AuthorizationOutcome>;
}

/// Everything the order collaborator needs to persist an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    /// The lock that produced this order.
    pub lock_id: LockId,
    /// The cart being converted.
    pub cart_id: CartId,
    /// The buying user, if authenticated.
    pub user_id: Option<UserId>,
    /// Locked totals and line amounts.
    pub snapshots: Vec<crate::snapshot::PriceSnapshot>,
    /// The payment authorization backing the order.
    pub authorization: AuthorizationRef,
}

/// Persists orders from completed checkouts.
#[async_trait]
pub trait OrderWriter: Send + Sync {
    /// Persists the order and returns its reference. Failures surface as
    /// [`CheckoutError::OrderCreation`](crate::errors::CheckoutError::OrderCreation).
    async fn create_order(&self, draft: &OrderDraft) -> CheckoutResult<OrderRef>;
}

/// Lifecycle notifications published to external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum CheckoutEvent {
    /// A checkout attempt acquired its lock and began executing.
    CheckoutStarted {
        /// The new lock.
        lock_id: LockId,
        /// The locked cart.
        cart_id: CartId,
        /// The owning session.
        session_id: SessionId,
        /// When the lock expires.
        expires_at: DateTime<Utc>,
    },
    /// A checkout attempt produced an order.
    CheckoutCompleted {
        /// The completed lock.
        lock_id: LockId,
        /// The cart that was checked out.
        cart_id: CartId,
        /// The created order.
        order: OrderRef,
    },
    /// A checkout attempt failed, was cancelled, or expired.
    CheckoutFailed {
        /// The failed lock.
        lock_id: LockId,
        /// The cart whose checkout failed.
        cart_id: CartId,
        /// The structured reason recorded on the lock.
        reason: FailureReason,
    },
}

/// Receives checkout lifecycle events. Publication is fire-and-forget: the
/// core never awaits a business response and never fails a checkout over a
/// notification.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes one event.
    async fn publish(&self, event: CheckoutEvent);
}

/// The collaborators the protocol runs against, grouped for wiring.
#[derive(Clone)]
pub struct CheckoutCollaborators {
    /// Cart contents.
    pub carts: Arc<dyn CartReader>,
    /// Pricing computation.
    pub pricing: Arc<dyn PricingEngine>,
    /// Inventory admission.
    pub inventory: Arc<dyn InventoryLevels>,
    /// Payment authorization.
    pub payments: Arc<dyn PaymentAuthorizer>,
    /// Order persistence.
    pub orders: Arc<dyn OrderWriter>,
    /// Lifecycle notifications.
    pub events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for CheckoutCollaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutCollaborators").finish_non_exhaustive()
    }
}
