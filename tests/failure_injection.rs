//! Failure injection tests for breakers and workflows.

use std::cell::RefCell;
use std::time::Duration;

use resilience_patterns::resilience::{
    retry, BreakerError, CircuitState, CompensableWorkflow, RetryPolicy,
};

mod common;
use common::{manual_breaker, CallCounter, TestError};

#[test]
fn test_three_failures_open_and_fourth_call_is_rejected() {
    let (breaker, _clock) = manual_breaker("inventory", 3);
    let counter = CallCounter::new();

    for _ in 0..3 {
        let err = breaker.call(counter.failing()).unwrap_err();
        assert_eq!(err.into_operation_error(), Some(TestError("dependency down".into())));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let err = breaker.call(counter.succeeding()).unwrap_err();
    assert!(matches!(err, BreakerError::CircuitOpen { .. }));
    assert_eq!(counter.count(), 3);
}

#[test]
fn test_full_cycle_with_manual_clock() {
    let (breaker, clock) = manual_breaker("payments", 2);
    let counter = CallCounter::new();

    breaker.call(counter.failing()).unwrap_err();
    breaker.call(counter.failing()).unwrap_err();
    assert_eq!(breaker.state(), CircuitState::Open);

    // Still inside the reset window: nothing reaches the dependency.
    for _ in 0..10 {
        clock.advance(Duration::from_millis(400));
        assert!(breaker.call(counter.succeeding()).unwrap_err().is_circuit_open());
    }
    assert_eq!(counter.count(), 2);

    // Trial fails, circuit reopens with a fresh window.
    clock.advance(Duration::from_millis(1_001));
    breaker.call(counter.failing()).unwrap_err();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(counter.count(), 3);

    clock.advance(Duration::from_secs(4));
    assert!(breaker.call(counter.succeeding()).unwrap_err().is_circuit_open());

    // Trial succeeds, circuit closes.
    clock.advance(Duration::from_millis(1_001));
    assert_eq!(breaker.call(counter.succeeding()).unwrap(), 4);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[test]
fn test_breaker_inside_workflow_rolls_back_prior_steps() {
    let (inventory, _clock) = manual_breaker("inventory", 1);
    let log = RefCell::new(Vec::new());

    let place_order = |order: u32| {
        let mut workflow = CompensableWorkflow::new(format!("order-{order}"));
        workflow
            .add_named_step(
                "create-order",
                || {
                    log.borrow_mut().push(format!("create {order}"));
                    Ok(())
                },
                || {
                    log.borrow_mut().push(format!("cancel {order}"));
                    Ok(())
                },
            )
            .add_named_step(
                "reserve-inventory",
                || {
                    inventory
                        .call(|| Err::<(), _>(TestError("warehouse offline".into())))
                        .map_err(|e| TestError(e.to_string()))
                },
                || Ok(()),
            );
        workflow.execute()
    };

    let first = place_order(1).unwrap_err();
    assert_eq!(first.index, 1);
    assert_eq!(first.source, TestError("warehouse offline".into()));
    assert_eq!(inventory.state(), CircuitState::Open);

    let second = place_order(2).unwrap_err();
    assert!(second.source.0.contains("is open"));

    assert_eq!(
        *log.borrow(),
        vec!["create 1", "cancel 1", "create 2", "cancel 2"]
    );
}

#[test]
fn test_retry_does_not_hammer_open_circuit() {
    let (breaker, _clock) = manual_breaker("search", 2);
    let counter = CallCounter::new();
    let policy = RetryPolicy::new(5, Duration::ZERO, Duration::ZERO);

    let result = retry(
        &policy,
        |e: &BreakerError<TestError>| !e.is_circuit_open(),
        |_| breaker.call(counter.failing()),
    );

    assert!(result.unwrap_err().is_circuit_open());
    assert_eq!(counter.count(), 2);
}
