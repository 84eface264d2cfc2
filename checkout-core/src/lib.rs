//! Checkout coordination core.
//!
//! A short-lived, distributed-transaction-like protocol for placing
//! orders: lock the cart, freeze its prices, reserve stock across
//! warehouses, authorize payment, and create the order — with the
//! guarantee that a failure at any step leaves no dangling holds on money
//! or stock.
//!
//! # Architecture
//!
//! - [`lock::CheckoutLock`] — the aggregate: one record per checkout
//!   attempt, with state, phase, owning session, and expiry.
//! - [`snapshot::PriceSnapshot`] / [`reservation::StockReservation`] — the
//!   artifacts each phase persists: immutable price rows and soft,
//!   expiring stock holds.
//! - [`state_machine::CheckoutStateMachine`] — drives the phases in order
//!   and performs compensating rollback on failure.
//! - [`service::CheckoutService`] — the entry point: exclusivity, status,
//!   cancel, and the periodic expiry sweep.
//!
//! Storage sits behind the traits in [`store`]; external systems (cart,
//! pricing, inventory, payment, orders, events) behind the traits in
//! [`collaborators`]. The `checkout-memory` crate provides in-memory
//! implementations for tests and development.
//!
//! # Concurrency model
//!
//! Each attempt runs synchronously in its caller. Races — two sessions
//! contending for a cart, or the expiry sweep against an in-flight phase —
//! are arbitrated by two atomic store operations: find-or-create of the
//! cart's lock, and a compare-and-set guarded on the lock's expected
//! state. An attempt that loses a guard treats its work as orphaned and
//! rolls it back rather than committing late.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collaborators;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod lock;
pub mod reservation;
pub mod service;
pub mod snapshot;
pub mod state_machine;
pub mod store;
pub mod types;
pub mod warehouse;

pub use collaborators::{
    AuthorizationOutcome, Cart, CartLine, CartReader, CheckoutCollaborators, CheckoutEvent,
    EventSink, InventoryLevels, LinePricing, OrderDraft, OrderWriter, PaymentAuthorizer,
    PaymentRequest, PricingBreakdown, PricingEngine, StockLevel,
};
pub use config::CheckoutConfig;
pub use diagnostics::{CheckoutStats, LockDetail};
pub use errors::{CheckoutError, CheckoutResult, StoreError, StoreResult};
pub use lock::{
    CheckoutLock, CheckoutPhase, FailurePhase, FailureReason, LockState, LockTransition,
    TransitionError,
};
pub use reservation::{ReservationHolder, StockReservation};
pub use service::{
    CheckoutRequest, CheckoutService, CheckoutStatus, CheckoutSuccess, CleanupReport, StatusReport,
};
pub use snapshot::{CartTotals, LineAmounts, PriceSnapshot, SnapshotBody};
pub use state_machine::{CheckoutStateMachine, RollbackReport};
pub use store::{CheckoutLockStore, CheckoutStores, PriceSnapshotStore, StockReservationStore};
pub use types::{
    AuthorizationRef, CartId, CartLineId, CurrencyCode, ExchangeRate, HoldId, LockId, Money,
    OrderRef, PaymentMethod, Quantity, ReservationId, SessionId, SnapshotId, UserId, VariantId,
    WarehouseId,
};
pub use warehouse::{PriorityOrder, WarehouseSelector};
