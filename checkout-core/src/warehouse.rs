//! Warehouse selection for the inventory-reservation phase.
//!
//! Which warehouse serves a cart line is policy, not protocol, so it sits
//! behind a trait. The shipped [`PriorityOrder`] policy walks a configured
//! priority list and keeps only warehouses whose available stock covers the
//! whole line; the state machine then attempts atomic admission against
//! each candidate in order. Lines are never split across warehouses.

use async_trait::async_trait;

use crate::collaborators::InventoryLevels;
use crate::errors::CheckoutResult;
use crate::types::{Quantity, VariantId, WarehouseId};

/// Chooses candidate warehouses for one cart line.
#[async_trait]
pub trait WarehouseSelector: Send + Sync {
    /// Warehouses able to satisfy `needed` units of `variant_id` at query
    /// time, best candidate first. Admission is re-checked atomically by
    /// the caller, so a returned candidate may still be refused.
    async fn candidates(
        &self,
        variant_id: VariantId,
        needed: Quantity,
        inventory: &dyn InventoryLevels,
    ) -> CheckoutResult<Vec<WarehouseId>>;
}

/// Deterministic highest-priority-first selection.
#[derive(Debug, Clone, Default)]
pub struct PriorityOrder {
    priority: Vec<WarehouseId>,
}

impl PriorityOrder {
    /// Creates a policy that prefers warehouses in the order given.
    pub fn new(priority: Vec<WarehouseId>) -> Self {
        Self { priority }
    }
}

#[async_trait]
impl WarehouseSelector for PriorityOrder {
    async fn candidates(
        &self,
        variant_id: VariantId,
        needed: Quantity,
        inventory: &dyn InventoryLevels,
    ) -> CheckoutResult<Vec<WarehouseId>> {
        let mut candidates = Vec::new();
        for &warehouse_id in &self.priority {
            let level = inventory.levels(variant_id, warehouse_id).await?;
            if level.available() >= needed.units() {
                candidates.push(warehouse_id);
            }
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StockLevel;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FixedLevels {
        levels: Mutex<HashMap<WarehouseId, StockLevel>>,
    }

    #[async_trait]
    impl InventoryLevels for FixedLevels {
        async fn levels(
            &self,
            _variant_id: VariantId,
            warehouse_id: WarehouseId,
        ) -> CheckoutResult<StockLevel> {
            Ok(self
                .levels
                .lock()
                .expect("mutex poisoned")
                .get(&warehouse_id)
                .copied()
                .unwrap_or(StockLevel {
                    on_hand: 0,
                    reserved: 0,
                }))
        }

        async fn try_reserve(
            &self,
            _variant_id: VariantId,
            _warehouse_id: WarehouseId,
            _quantity: Quantity,
        ) -> CheckoutResult<bool> {
            Ok(false)
        }

        async fn release(
            &self,
            _variant_id: VariantId,
            _warehouse_id: WarehouseId,
            _quantity: Quantity,
        ) -> CheckoutResult<()> {
            Ok(())
        }

        async fn commit(
            &self,
            _variant_id: VariantId,
            _warehouse_id: WarehouseId,
            _quantity: Quantity,
        ) -> CheckoutResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn priority_order_is_deterministic_and_filters_by_availability() {
        let first = WarehouseId::new(Uuid::new_v4());
        let second = WarehouseId::new(Uuid::new_v4());
        let third = WarehouseId::new(Uuid::new_v4());

        let mut levels = HashMap::new();
        levels.insert(
            first,
            StockLevel {
                on_hand: 2,
                reserved: 0,
            },
        );
        levels.insert(
            second,
            StockLevel {
                on_hand: 10,
                reserved: 3,
            },
        );
        levels.insert(
            third,
            StockLevel {
                on_hand: 10,
                reserved: 0,
            },
        );
        let inventory = FixedLevels {
            levels: Mutex::new(levels),
        };

        let policy = PriorityOrder::new(vec![first, second, third]);
        let candidates = policy
            .candidates(
                VariantId::new(Uuid::new_v4()),
                Quantity::try_new(5).expect("valid"),
                &inventory,
            )
            .await
            .expect("selection succeeds");

        // `first` cannot cover the line; `second` outranks `third`.
        assert_eq!(candidates, vec![second, third]);
    }

    #[tokio::test]
    async fn empty_priority_list_yields_no_candidates() {
        let inventory = FixedLevels {
            levels: Mutex::new(HashMap::new()),
        };
        let policy = PriorityOrder::default();
        let candidates = policy
            .candidates(
                VariantId::new(Uuid::new_v4()),
                Quantity::try_new(1).expect("valid"),
                &inventory,
            )
            .await
            .expect("selection succeeds");
        assert!(candidates.is_empty());
    }
}
