//! Core identifier and value types for the checkout coordination core.
//!
//! All types use smart constructors so that invalid values cannot be
//! constructed, following the "parse, don't validate" principle. Entity
//! identifiers created by this crate (locks, reservations, snapshots) are
//! UUIDv7 so that they sort in creation order; identifiers owned by
//! external collaborators (carts, variants, warehouses) are opaque UUIDs.

use nutype::nutype;
use uuid::Uuid;

/// Identifier of a shopping cart, owned by the cart collaborator.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Deref,
    Display,
    Serialize,
    Deserialize
))]
pub struct CartId(Uuid);

/// Identifier of the session that owns a checkout attempt.
///
/// Session identity is always passed explicitly into the service; the core
/// never reads ambient request state.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    AsRef,
    Deref,
    Display,
    Serialize,
    Deserialize
))]
pub struct SessionId(Uuid);

/// Identifier of an authenticated user, when one is present.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    AsRef,
    Deref,
    Display,
    Serialize,
    Deserialize
))]
pub struct UserId(Uuid);

/// Identifier of a single line within a cart.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    AsRef,
    Deref,
    Display,
    Serialize,
    Deserialize
))]
pub struct CartLineId(Uuid);

/// Identifier of a sellable product variant.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Deref,
    Display,
    Serialize,
    Deserialize
))]
pub struct VariantId(Uuid);

/// Identifier of a warehouse holding physical stock.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Deref,
    Display,
    Serialize,
    Deserialize
))]
pub struct WarehouseId(Uuid);

/// Identifier of a manual inventory hold placed outside the checkout flow.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    AsRef,
    Deref,
    Display,
    Serialize,
    Deserialize
))]
pub struct HoldId(Uuid);

/// Identifier of a checkout lock, guaranteed to be UUIDv7.
///
/// The v7 format gives lock ids a monotonic sort order matching creation
/// time, which the diagnostics surface relies on.
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct LockId(Uuid);

impl LockId {
    /// Creates a new `LockId` with the current timestamp.
    pub fn new() -> Self {
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for LockId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of a stock reservation, guaranteed to be UUIDv7.
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new `ReservationId` with the current timestamp.
    pub fn new() -> Self {
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of a price snapshot row, guaranteed to be UUIDv7.
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    /// Creates a new `SnapshotId` with the current timestamp.
    pub fn new() -> Self {
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

/// A positive quantity of units of a variant.
///
/// Zero-quantity lines cannot exist, so the type refuses to construct them.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Into,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Quantity(u32);

impl Quantity {
    /// The quantity as a plain unit count.
    pub fn units(self) -> u32 {
        self.into()
    }
}

/// A non-negative monetary amount in minor units (e.g. cents).
///
/// Amounts in snapshots and payment requests are always denominated in the
/// currency captured alongside them; `Money` itself is currency-agnostic.
#[nutype(
    validate(greater_or_equal = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Money(i64);

impl Money {
    /// A zero amount.
    pub fn zero() -> Self {
        Self::try_new(0).expect("zero is a valid amount")
    }

    /// The amount in minor units.
    pub fn minor_units(self) -> i64 {
        self.into()
    }
}

/// An ISO 4217 currency code, normalized to uppercase.
#[nutype(
    sanitize(trim, uppercase),
    validate(len_char_min = 3, len_char_max = 3),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct CurrencyCode(String);

/// The exchange rate applied when the pricing currency differs from the
/// store's base currency. Always finite and strictly positive.
#[nutype(
    validate(finite, greater = 0.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Into, Display, Serialize, Deserialize)
)]
pub struct ExchangeRate(f64);

impl ExchangeRate {
    /// The identity rate, used when no conversion applies.
    pub fn identity() -> Self {
        Self::try_new(1.0).expect("1.0 is a valid exchange rate")
    }
}

/// Opaque reference to a payment authorization held at the gateway.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct AuthorizationRef(String);

/// Opaque reference to an order persisted by the order collaborator.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct OrderRef(String);

/// An opaque token identifying the payment method the customer selected.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct PaymentMethod(String);
