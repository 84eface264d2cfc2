//! Races between sessions, between attempts, and between an in-flight
//! attempt and the expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use checkout_core::collaborators::InventoryLevels;
use checkout_core::errors::CheckoutError;
use checkout_core::lock::{CheckoutLock, FailurePhase, LockState, LockTransition};
use checkout_core::state_machine::CheckoutStateMachine;
use checkout_core::store::CheckoutLockStore;
use checkout_core::types::{PaymentMethod, SessionId};
use checkout_core::warehouse::PriorityOrder;
use checkout_integration_tests::{variant, AuthorizeBehavior, TestPlatform};
use uuid::Uuid;

#[tokio::test]
async fn second_session_is_rejected_while_a_checkout_is_in_flight() {
    let platform = TestPlatform::new();
    let item = variant();
    platform.stock(item, 0, 10);
    let cart = platform.add_cart(&[(item, 1)]);

    // Hold the first attempt inside the payment phase.
    platform.payments.set_delay(Duration::from_millis(200));
    let service = platform.service.clone();
    let first_request = platform.request(&cart);
    let first = tokio::spawn(async move { service.start_checkout(first_request).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = platform
        .service
        .start_checkout(platform.request(&cart))
        .await
        .expect_err("contending session must be rejected");
    assert!(matches!(err, CheckoutError::ConcurrentCheckout { .. }));
    assert!(err.is_user_recoverable());

    let success = first
        .await
        .expect("task completes")
        .expect("first attempt wins");
    let detail = platform
        .service
        .lock_detail(success.lock_id)
        .await
        .expect("query succeeds")
        .expect("lock exists");
    assert_eq!(detail.lock.state, LockState::Completed);
}

#[tokio::test]
async fn same_session_restart_is_reported_as_in_progress() {
    let platform = TestPlatform::new();
    let item = variant();
    platform.stock(item, 0, 10);
    let cart = platform.add_cart(&[(item, 1)]);

    platform.payments.set_delay(Duration::from_millis(200));
    let request = platform.request(&cart);
    let service = platform.service.clone();
    let first_request = request.clone();
    let first = tokio::spawn(async move { service.start_checkout(first_request).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = platform
        .service
        .start_checkout(request)
        .await
        .expect_err("duplicate start must be rejected");
    match err {
        CheckoutError::CheckoutInProgress { cart_id, .. } => assert_eq!(cart_id, cart.id),
        other => panic!("unexpected error: {other:?}"),
    }

    first
        .await
        .expect("task completes")
        .expect("first attempt wins");
}

#[tokio::test]
async fn terminal_lock_frees_the_cart_for_a_new_attempt() {
    let platform = TestPlatform::new();
    let item = variant();
    platform.stock(item, 0, 10);
    let cart = platform.add_cart(&[(item, 1)]);

    platform
        .payments
        .push(AuthorizeBehavior::Decline("do not honor".to_owned()));
    platform
        .service
        .start_checkout(platform.request(&cart))
        .await
        .expect_err("first attempt declines");

    // Default behavior approves; the retry must be admitted.
    let success = platform
        .service
        .start_checkout(platform.request(&cart))
        .await
        .expect("retry succeeds");
    let detail = platform
        .service
        .lock_detail(success.lock_id)
        .await
        .expect("query succeeds")
        .expect("lock exists");
    assert_eq!(detail.lock.state, LockState::Completed);
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell_a_variant() {
    let platform = TestPlatform::new();
    let item = variant();
    platform.stock(item, 0, 5);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let cart = platform.add_cart(&[(item, 2)]);
        let request = platform.request(&cart);
        let service = platform.service.clone();
        handles.push(tokio::spawn(
            async move { service.start_checkout(request).await },
        ));
    }

    let mut successes = 0;
    let mut stock_failures = 0;
    for handle in handles {
        match handle.await.expect("task completes") {
            Ok(_) => successes += 1,
            Err(CheckoutError::InsufficientStock { .. }) => stock_failures += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(successes, 2, "5 units admit exactly two 2-unit carts");
    assert_eq!(stock_failures, 2);

    let level = platform
        .inventory
        .levels(item, platform.warehouses[0])
        .await
        .expect("levels");
    assert_eq!(level.on_hand, 1);
    assert_eq!(level.reserved, 0);
}

#[tokio::test]
async fn attempt_that_loses_to_the_sweep_is_superseded_not_completed() {
    let platform = TestPlatform::new();
    let item = variant();
    platform.stock(item, 0, 10);
    let cart = platform.add_cart(&[(item, 1)]);

    // An active lock whose TTL has already passed, as if the worker stalled.
    let lock = platform
        .locks
        .insert(CheckoutLock::new(
            cart.id,
            SessionId::new(Uuid::new_v4()),
            None,
            Utc::now(),
        ))
        .await
        .expect("insert succeeds");
    let stale = platform
        .locks
        .transition(
            lock.id,
            LockState::Pending,
            LockTransition::Activate {
                expires_at: Utc::now() - chrono::Duration::minutes(1),
            },
        )
        .await
        .expect("activation succeeds");

    let swept = platform
        .service
        .cleanup_expired_locks()
        .await
        .expect("sweep succeeds");
    assert_eq!(swept, 1);

    // The stalled attempt resumes; its first guarded write must observe
    // the loss.
    let machine = CheckoutStateMachine::new(
        platform.stores(),
        platform.collaborators(),
        Arc::new(PriorityOrder::new(platform.config.warehouse_priority.clone())),
        platform.config.clone(),
    );
    let err = machine
        .run(
            &stale,
            &cart,
            PaymentMethod::try_new("card-visa").expect("valid method"),
        )
        .await
        .expect_err("superseded attempt must not complete");
    assert!(matches!(err, CheckoutError::AttemptSuperseded { .. }));

    let failed = platform
        .locks
        .get(lock.id)
        .await
        .expect("query succeeds")
        .expect("lock exists");
    assert_eq!(failed.state, LockState::Failed);
    assert_eq!(
        failed.failure_reason.expect("reason recorded").phase,
        FailurePhase::Expired
    );

    // The sweep's announcement stands alone: the losing attempt publishes
    // no second failure event.
    let failures = platform
        .events
        .tags()
        .iter()
        .filter(|tag| **tag == "checkout_failed")
        .count();
    assert_eq!(failures, 1);
}
