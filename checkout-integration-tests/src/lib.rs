//! Shared fixtures for the checkout integration tests: mock collaborators
//! and a pre-wired platform of in-memory stores.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use checkout_core::collaborators::{
    AuthorizationOutcome, Cart, CartLine, CartReader, CheckoutCollaborators, CheckoutEvent,
    EventSink, LinePricing, OrderDraft, OrderWriter, PaymentAuthorizer, PaymentRequest,
    PricingBreakdown, PricingEngine,
};
use checkout_core::config::CheckoutConfig;
use checkout_core::errors::{CheckoutError, CheckoutResult};
use checkout_core::lock::CheckoutLock;
use checkout_core::service::{CheckoutRequest, CheckoutService};
use checkout_core::store::{CheckoutLockStore, CheckoutStores};
use checkout_core::types::{
    AuthorizationRef, CartId, CartLineId, CurrencyCode, ExchangeRate, Money, OrderRef,
    PaymentMethod, Quantity, SessionId, VariantId, WarehouseId,
};
use checkout_memory::{
    InMemoryInventory, InMemoryLockStore, InMemoryReservationStore, InMemorySnapshotStore,
};

/// Cart reader backed by a map, seeded by tests.
#[derive(Default)]
pub struct StaticCartReader {
    carts: RwLock<HashMap<CartId, Cart>>,
}

impl StaticCartReader {
    /// Registers a cart.
    pub fn put(&self, cart: Cart) {
        self.carts
            .write()
            .expect("RwLock poisoned")
            .insert(cart.id, cart);
    }
}

#[async_trait]
impl CartReader for StaticCartReader {
    async fn cart(&self, cart_id: CartId) -> CheckoutResult<Option<Cart>> {
        Ok(self
            .carts
            .read()
            .expect("RwLock poisoned")
            .get(&cart_id)
            .cloned())
    }
}

/// Pricing engine that charges a flat unit price per unit, with a switch to
/// simulate an outage.
pub struct FlatPricingEngine {
    unit_price: Money,
    currency: CurrencyCode,
    fail: AtomicBool,
}

impl FlatPricingEngine {
    /// A USD engine charging `unit_price_minor` per unit.
    pub fn new(unit_price_minor: i64) -> Self {
        Self {
            unit_price: Money::try_new(unit_price_minor).expect("valid test price"),
            currency: CurrencyCode::try_new("USD").expect("valid currency"),
            fail: AtomicBool::new(false),
        }
    }

    /// Makes the next (and all later) pricing calls fail.
    pub fn fail_from_now_on(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PricingEngine for FlatPricingEngine {
    async fn price(&self, cart: &Cart) -> CheckoutResult<PricingBreakdown> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CheckoutError::PriceLock(
                "pricing engine unavailable".to_owned(),
            ));
        }

        let unit = self.unit_price.minor_units();
        let mut lines = Vec::with_capacity(cart.lines.len());
        let mut subtotal = 0i64;
        for line in &cart.lines {
            let line_total = unit * i64::from(line.quantity.units());
            subtotal += line_total;
            lines.push(LinePricing {
                cart_line_id: line.id,
                variant_id: line.variant_id,
                quantity: line.quantity,
                unit_price: self.unit_price,
                line_total: Money::try_new(line_total).expect("valid test total"),
            });
        }
        Ok(PricingBreakdown {
            subtotal: Money::try_new(subtotal).expect("valid test subtotal"),
            discount_total: Money::zero(),
            tax_total: Money::zero(),
            grand_total: Money::try_new(subtotal).expect("valid test total"),
            currency: self.currency.clone(),
            exchange_rate: ExchangeRate::identity(),
            lines,
        })
    }
}

/// One scripted response from the payment authorizer.
#[derive(Debug, Clone)]
pub enum AuthorizeBehavior {
    /// Authorize with a generated reference.
    Approve,
    /// Decline with the given reason.
    Decline(String),
    /// Fail with a gateway transport error.
    GatewayError(String),
}

/// Payment authorizer driven by a script of behaviors; approves by default.
/// An optional per-call delay lets tests hold a checkout in flight.
#[derive(Default)]
pub struct ScriptedAuthorizer {
    script: Mutex<VecDeque<AuthorizeBehavior>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU64,
}

impl ScriptedAuthorizer {
    /// An authorizer that approves everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a behavior for the next unscripted call.
    pub fn push(&self, behavior: AuthorizeBehavior) {
        self.script
            .lock()
            .expect("mutex poisoned")
            .push_back(behavior);
    }

    /// Delays every authorization by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("mutex poisoned") = Some(delay);
    }

    /// How many authorizations were requested.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentAuthorizer for ScriptedAuthorizer {
    async fn authorize(&self, _request: &PaymentRequest) -> CheckoutResult<AuthorizationOutcome> {
        let delay = *self.delay.lock().expect("mutex poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let behavior = self
            .script
            .lock()
            .expect("mutex poisoned")
            .pop_front()
            .unwrap_or(AuthorizeBehavior::Approve);
        match behavior {
            AuthorizeBehavior::Approve => Ok(AuthorizationOutcome::Authorized {
                reference: AuthorizationRef::try_new(format!("auth-{}", Uuid::new_v4()))
                    .expect("valid reference"),
            }),
            AuthorizeBehavior::Decline(reason) => Ok(AuthorizationOutcome::Declined { reason }),
            AuthorizeBehavior::GatewayError(message) => {
                Err(CheckoutError::PaymentGateway(message))
            }
        }
    }
}

/// Order writer that records drafts and can be told to fail once.
#[derive(Default)]
pub struct RecordingOrderWriter {
    orders: Mutex<Vec<OrderDraft>>,
    fail_next: AtomicBool,
    sequence: AtomicU64,
}

impl RecordingOrderWriter {
    /// A writer that persists everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `create_order` call fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// The drafts persisted so far.
    pub fn orders(&self) -> Vec<OrderDraft> {
        self.orders.lock().expect("mutex poisoned").clone()
    }
}

#[async_trait]
impl OrderWriter for RecordingOrderWriter {
    async fn create_order(&self, draft: &OrderDraft) -> CheckoutResult<OrderRef> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CheckoutError::OrderCreation {
                message: "order database unavailable".to_owned(),
                authorization: draft.authorization.clone(),
            });
        }
        self.orders
            .lock()
            .expect("mutex poisoned")
            .push(draft.clone());
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OrderRef::try_new(format!("order-{n}")).expect("valid reference"))
    }
}

/// Event sink that records everything it is given.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<CheckoutEvent>>,
}

impl RecordingEventSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far.
    pub fn events(&self) -> Vec<CheckoutEvent> {
        self.events.lock().expect("mutex poisoned").clone()
    }

    /// The event tags published so far, in order.
    pub fn tags(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .map(|event| match event {
                CheckoutEvent::CheckoutStarted { .. } => "checkout_started",
                CheckoutEvent::CheckoutCompleted { .. } => "checkout_completed",
                CheckoutEvent::CheckoutFailed { .. } => "checkout_failed",
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: CheckoutEvent) {
        self.events.lock().expect("mutex poisoned").push(event);
    }
}

/// A fully wired platform: in-memory stores, mock collaborators, and a
/// service with two prioritized warehouses.
pub struct TestPlatform {
    /// Lock store.
    pub locks: Arc<InMemoryLockStore>,
    /// Snapshot store.
    pub snapshots: Arc<InMemorySnapshotStore>,
    /// Reservation store.
    pub reservations: Arc<InMemoryReservationStore>,
    /// Inventory collaborator.
    pub inventory: Arc<InMemoryInventory>,
    /// Cart reader.
    pub carts: Arc<StaticCartReader>,
    /// Pricing engine (1000 minor units per unit).
    pub pricing: Arc<FlatPricingEngine>,
    /// Payment authorizer.
    pub payments: Arc<ScriptedAuthorizer>,
    /// Order writer.
    pub orders: Arc<RecordingOrderWriter>,
    /// Event sink.
    pub events: Arc<RecordingEventSink>,
    /// The two warehouses, highest priority first.
    pub warehouses: [WarehouseId; 2],
    /// Service config.
    pub config: CheckoutConfig,
    /// The service under test.
    pub service: CheckoutService,
}

impl TestPlatform {
    /// Wires up a fresh platform.
    pub fn new() -> Self {
        let warehouses = [
            WarehouseId::new(Uuid::new_v4()),
            WarehouseId::new(Uuid::new_v4()),
        ];
        let locks = Arc::new(InMemoryLockStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let reservations = Arc::new(InMemoryReservationStore::new());
        let inventory = Arc::new(InMemoryInventory::new());
        let carts = Arc::new(StaticCartReader::default());
        let pricing = Arc::new(FlatPricingEngine::new(1_000));
        let payments = Arc::new(ScriptedAuthorizer::new());
        let orders = Arc::new(RecordingOrderWriter::new());
        let events = Arc::new(RecordingEventSink::new());
        let config = CheckoutConfig::default().with_warehouse_priority(warehouses.to_vec());

        let stores = CheckoutStores {
            locks: locks.clone(),
            snapshots: snapshots.clone(),
            reservations: reservations.clone(),
        };
        let collaborators = CheckoutCollaborators {
            carts: carts.clone(),
            pricing: pricing.clone(),
            inventory: inventory.clone(),
            payments: payments.clone(),
            orders: orders.clone(),
            events: events.clone(),
        };
        let service = CheckoutService::new(stores, collaborators, config.clone());

        Self {
            locks,
            snapshots,
            reservations,
            inventory,
            carts,
            pricing,
            payments,
            orders,
            events,
            warehouses,
            config,
            service,
        }
    }

    /// The store bundle, for building a state machine directly.
    pub fn stores(&self) -> CheckoutStores {
        CheckoutStores {
            locks: self.locks.clone(),
            snapshots: self.snapshots.clone(),
            reservations: self.reservations.clone(),
        }
    }

    /// The collaborator bundle, for building a state machine directly.
    pub fn collaborators(&self) -> CheckoutCollaborators {
        CheckoutCollaborators {
            carts: self.carts.clone(),
            pricing: self.pricing.clone(),
            inventory: self.inventory.clone(),
            payments: self.payments.clone(),
            orders: self.orders.clone(),
            events: self.events.clone(),
        }
    }

    /// Registers a cart with one line per `(variant, quantity)` pair.
    pub fn add_cart(&self, lines: &[(VariantId, u32)]) -> Cart {
        let cart = Cart {
            id: CartId::new(Uuid::new_v4()),
            lines: lines
                .iter()
                .map(|&(variant_id, quantity)| CartLine {
                    id: CartLineId::new(Uuid::new_v4()),
                    variant_id,
                    quantity: Quantity::try_new(quantity).expect("valid test quantity"),
                })
                .collect(),
        };
        self.carts.put(cart.clone());
        cart
    }

    /// A checkout request for `cart` from a fresh session.
    pub fn request(&self, cart: &Cart) -> CheckoutRequest {
        CheckoutRequest {
            cart_id: cart.id,
            session_id: SessionId::new(Uuid::new_v4()),
            user_id: None,
            payment_method: PaymentMethod::try_new("card-visa").expect("valid method"),
        }
    }

    /// Seeds stock in the warehouse at `index` (0 = highest priority).
    pub fn stock(&self, variant_id: VariantId, index: usize, on_hand: u32) {
        self.inventory
            .set_on_hand(variant_id, self.warehouses[index], on_hand);
    }

    /// The single lock in the store; panics unless exactly one exists.
    pub async fn only_lock(&self) -> CheckoutLock {
        let locks = self
            .locks
            .list_in_window(
                Utc::now() - chrono::Duration::hours(1),
                Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .expect("lock listing succeeds");
        assert_eq!(locks.len(), 1, "expected exactly one lock");
        locks[0].clone()
    }
}

impl Default for TestPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// A fresh variant id.
pub fn variant() -> VariantId {
    VariantId::new(Uuid::new_v4())
}
