//! Configuration for the checkout service.

use chrono::Duration;

use crate::types::WarehouseId;

/// Tunable parameters of the checkout protocol.
///
/// # Example
///
/// ```rust,ignore
/// let config = CheckoutConfig::default()
///     .with_lock_ttl(Duration::minutes(10))
///     .with_warehouse_priority(vec![primary, overflow]);
/// ```
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// How long an active lock holds its cart before the sweep may fail it.
    pub lock_ttl: Duration,
    /// Safety margin added to the lock TTL for reservation expiry, so the
    /// lock always expires first and the sweep releases holds before they
    /// lapse on their own.
    pub reservation_margin: Duration,
    /// Maximum locks (or reservations) processed per sweep invocation.
    pub sweep_limit: usize,
    /// Warehouse priority order used by the default selection policy.
    pub warehouse_priority: Vec<WarehouseId>,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::minutes(15),
            reservation_margin: Duration::minutes(5),
            sweep_limit: 100,
            warehouse_priority: Vec::new(),
        }
    }
}

impl CheckoutConfig {
    /// Sets the lock TTL.
    #[must_use]
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Sets the reservation expiry margin.
    #[must_use]
    pub fn with_reservation_margin(mut self, margin: Duration) -> Self {
        self.reservation_margin = margin;
        self
    }

    /// Sets the per-invocation sweep limit.
    #[must_use]
    pub fn with_sweep_limit(mut self, limit: usize) -> Self {
        self.sweep_limit = limit;
        self
    }

    /// Sets the warehouse priority order.
    #[must_use]
    pub fn with_warehouse_priority(mut self, priority: Vec<WarehouseId>) -> Self {
        self.warehouse_priority = priority;
        self
    }

    /// How long a reservation placed now should live.
    pub fn reservation_ttl(&self) -> Duration {
        self.lock_ttl + self.reservation_margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn defaults_are_sensible() {
        let config = CheckoutConfig::default();
        assert_eq!(config.lock_ttl, Duration::minutes(15));
        assert_eq!(config.reservation_ttl(), Duration::minutes(20));
        assert_eq!(config.sweep_limit, 100);
    }

    #[test]
    fn builder_methods_chain() {
        let warehouse = WarehouseId::new(Uuid::new_v4());
        let config = CheckoutConfig::default()
            .with_lock_ttl(Duration::minutes(5))
            .with_reservation_margin(Duration::minutes(1))
            .with_sweep_limit(10)
            .with_warehouse_priority(vec![warehouse]);
        assert_eq!(config.reservation_ttl(), Duration::minutes(6));
        assert_eq!(config.warehouse_priority, vec![warehouse]);
    }
}
