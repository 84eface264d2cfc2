//! Read-only diagnostics structures for ops tooling.

use std::collections::HashMap;

use serde::Serialize;

use crate::lock::CheckoutLock;
use crate::reservation::StockReservation;
use crate::snapshot::PriceSnapshot;

/// Everything attributed to one lock: the record, its snapshot rows, and
/// its reservations (released ones included, since they are tombstoned
/// rather than deleted).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockDetail {
    /// The lock record.
    pub lock: CheckoutLock,
    /// Snapshot rows still attributed to the lock.
    pub snapshots: Vec<PriceSnapshot>,
    /// All reservations ever owned by the lock.
    pub reservations: Vec<StockReservation>,
}

/// Aggregate lock counts over a time window, plus a histogram of which
/// phase failures happened in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckoutStats {
    /// Non-terminal locks still within their TTL.
    pub active: usize,
    /// Active locks past expiry and not yet swept.
    pub expired: usize,
    /// Locks that completed.
    pub completed: usize,
    /// Locks that failed (any reason).
    pub failed: usize,
    /// Failure counts keyed by failure-phase name.
    pub failures_by_phase: HashMap<String, usize>,
}
