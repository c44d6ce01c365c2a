//! Tests for the processing-loop circuit breaker

use std::time::Duration;

use kodegen_agent_gateway::{BreakerState, CircuitBreaker, GatewayError};

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_at_threshold() {
    let mut breaker = CircuitBreaker::new("dispatch", 3, Duration::from_secs(30));

    assert!(breaker.record_failure().is_none());
    assert!(breaker.record_failure().is_none());
    assert!(breaker.can_execute());

    let tripped = breaker.record_failure();
    match tripped {
        Some(GatewayError::ProcessingOverload {
            loop_name,
            consecutive,
        }) => {
            assert_eq!(loop_name, "dispatch");
            assert_eq!(consecutive, 3);
        }
        other => panic!("expected ProcessingOverload, got {other:?}"),
    }
    assert_eq!(breaker.state(), BreakerState::Open);
    assert!(!breaker.can_execute());
}

#[tokio::test(start_paused = true)]
async fn test_breaker_closes_after_cooldown() {
    let mut breaker = CircuitBreaker::new("timeout", 2, Duration::from_secs(30));
    breaker.record_failure();
    breaker.record_failure();

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(!breaker.can_execute());
    assert_eq!(breaker.state(), BreakerState::Open);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(breaker.can_execute());
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_count() {
    let mut breaker = CircuitBreaker::new("inbound", 3, Duration::from_secs(30));
    breaker.record_failure();
    breaker.record_failure();
    breaker.record_success();
    assert_eq!(breaker.consecutive_failures(), 0);

    assert!(breaker.record_failure().is_none());
    assert!(breaker.record_failure().is_none());
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_reports_overload_once() {
    let mut breaker = CircuitBreaker::new("retry", 1, Duration::from_secs(30));
    assert!(breaker.record_failure().is_some());
    assert!(breaker.record_failure().is_none());
    assert_eq!(breaker.consecutive_failures(), 2);
}
