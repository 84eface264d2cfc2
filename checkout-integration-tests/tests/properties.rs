//! Property tests for the two invariants everything else leans on: lock
//! lifecycle legality and inventory conservation.

use std::collections::VecDeque;

use chrono::{Duration, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use checkout_core::collaborators::InventoryLevels;
use checkout_core::lock::{
    CheckoutLock, CheckoutPhase, FailurePhase, FailureReason, LockState, LockTransition,
};
use checkout_core::types::{CartId, Quantity, SessionId, VariantId, WarehouseId};
use checkout_memory::InMemoryInventory;

fn transition_strategy() -> impl Strategy<Value = LockTransition> {
    prop_oneof![
        Just(LockTransition::Activate {
            expires_at: Utc::now() + Duration::minutes(15),
        }),
        proptest::sample::select(CheckoutPhase::ALL.to_vec())
            .prop_map(|phase| LockTransition::AdvancePhase { phase }),
        Just(LockTransition::Complete { at: Utc::now() }),
        Just(LockTransition::Fail {
            at: Utc::now(),
            reason: FailureReason::new(FailurePhase::Expired, "expired"),
        }),
    ]
}

proptest! {
    /// Whatever order transitions arrive in, the lock only ever moves
    /// along legal edges, phases advance one step at a time, and a
    /// terminal lock absorbs everything without changing.
    #[test]
    fn lock_lifecycle_is_legal_under_arbitrary_transitions(
        transitions in proptest::collection::vec(transition_strategy(), 1..40)
    ) {
        let mut lock = CheckoutLock::new(
            CartId::new(Uuid::new_v4()),
            SessionId::new(Uuid::new_v4()),
            None,
            Utc::now(),
        );

        for transition in transitions {
            let before = lock.clone();
            let was_terminal = before.state.is_terminal();
            match lock.apply(transition.clone()) {
                Ok(()) => {
                    prop_assert!(!was_terminal, "terminal lock accepted a transition");
                    match transition {
                        LockTransition::Activate { .. } => {
                            prop_assert_eq!(before.state, LockState::Pending);
                            prop_assert_eq!(lock.state, LockState::Active);
                        }
                        LockTransition::AdvancePhase { phase } => {
                            prop_assert_eq!(lock.state, LockState::Active);
                            let expected = before
                                .phase
                                .map_or(Some(CheckoutPhase::first()), CheckoutPhase::next);
                            prop_assert_eq!(Some(phase), expected);
                        }
                        LockTransition::Complete { .. } => {
                            prop_assert_eq!(before.state, LockState::Active);
                            prop_assert_eq!(lock.state, LockState::Completed);
                            prop_assert!(lock.completed_at.is_some());
                        }
                        LockTransition::Fail { .. } => {
                            prop_assert!(matches!(
                                before.state,
                                LockState::Pending | LockState::Active
                            ));
                            prop_assert_eq!(lock.state, LockState::Failed);
                            prop_assert!(lock.failure_reason.is_some());
                        }
                    }
                    if before.state != lock.state {
                        prop_assert!(before.state.can_transition_to(lock.state));
                    }
                }
                Err(_) => {
                    prop_assert_eq!(&lock, &before, "rejected transition mutated the lock");
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
enum StockStep {
    Reserve(u32),
    ReleaseOldest,
    CommitOldest,
}

fn stock_step_strategy() -> impl Strategy<Value = StockStep> {
    prop_oneof![
        (1u32..=5).prop_map(StockStep::Reserve),
        Just(StockStep::ReleaseOldest),
        Just(StockStep::CommitOldest),
    ]
}

proptest! {
    /// Stock is conserved under any interleaving of admissions, releases,
    /// and commits: the reserved count always equals the sum of the
    /// outstanding holds, and on-hand only drops by what was committed.
    #[test]
    fn inventory_is_conserved_under_arbitrary_operations(
        initial in 0u32..=20,
        steps in proptest::collection::vec(stock_step_strategy(), 1..60)
    ) {
        tokio_test::block_on(async {
            let inventory = InMemoryInventory::new();
            let variant = VariantId::new(Uuid::new_v4());
            let warehouse = WarehouseId::new(Uuid::new_v4());
            inventory.set_on_hand(variant, warehouse, initial);

            let mut outstanding: VecDeque<u32> = VecDeque::new();
            let mut committed = 0u32;

            for step in steps {
                match step {
                    StockStep::Reserve(units) => {
                        let quantity = Quantity::try_new(units).expect("valid");
                        let held: u32 = outstanding.iter().sum();
                        let admitted = inventory
                            .try_reserve(variant, warehouse, quantity)
                            .await
                            .expect("call succeeds");
                        let expected = initial - committed - held >= units;
                        prop_assert_eq!(admitted, expected, "admission disagrees with the model");
                        if admitted {
                            outstanding.push_back(units);
                        }
                    }
                    StockStep::ReleaseOldest => {
                        if let Some(units) = outstanding.pop_front() {
                            inventory
                                .release(
                                    variant,
                                    warehouse,
                                    Quantity::try_new(units).expect("valid"),
                                )
                                .await
                                .expect("call succeeds");
                        }
                    }
                    StockStep::CommitOldest => {
                        if let Some(units) = outstanding.pop_front() {
                            inventory
                                .commit(
                                    variant,
                                    warehouse,
                                    Quantity::try_new(units).expect("valid"),
                                )
                                .await
                                .expect("call succeeds");
                            committed += units;
                        }
                    }
                }

                let level = inventory
                    .levels(variant, warehouse)
                    .await
                    .expect("call succeeds");
                let held: u32 = outstanding.iter().sum();
                prop_assert_eq!(level.reserved, held);
                prop_assert_eq!(level.on_hand, initial - committed);
                prop_assert_eq!(level.available(), initial - committed - held);
            }
            Ok(())
        })?;
    }
}
