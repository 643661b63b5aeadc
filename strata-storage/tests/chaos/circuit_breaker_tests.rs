//! Circuit Breaker Chaos Tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_storage::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerError, CircuitState, DatabaseCircuitBreaker,
};

fn test_breaker(failure_threshold: u32, half_open_timeout_ms: u64) -> DatabaseCircuitBreaker {
    let config = CircuitBreakerConfig {
        failure_threshold,
        half_open_timeout: Duration::from_millis(half_open_timeout_ms),
    };
    DatabaseCircuitBreaker::new(format!("test-{}", uuid::Uuid::new_v4()), config)
}

#[tokio::test]
async fn circuit_opens_after_exact_failure_threshold() {
    let breaker = test_breaker(3, 1000);

    for i in 0..2 {
        let result = breaker
            .call(|| async { Err::<(), _>(format!("failure {}", i)) })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Failure(_))));
        assert!(!breaker.is_open(), "opened after {} failures", i + 1);
    }

    let result = breaker.call(|| async { Err::<(), _>("failure 3") }).await;
    assert!(matches!(result, Err(CircuitBreakerError::Failure(_))));
    assert!(breaker.is_open());
}

#[tokio::test]
async fn circuit_rejects_without_running_operation() {
    let breaker = test_breaker(1, 10_000);
    let _ = breaker.call(|| async { Err::<(), _>("down") }).await;

    let executed = Arc::new(AtomicU32::new(0));
    let counter = executed.clone();
    let start = std::time::Instant::now();
    let result = breaker
        .call(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>(())
        })
        .await;

    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    assert_eq!(executed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn only_one_half_open_probe_runs_at_a_time() {
    let breaker = Arc::new(test_breaker(1, 20));
    let _ = breaker.call(|| async { Err::<(), _>("down") }).await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    let probes = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();
    for _ in 0..5 {
        let breaker = breaker.clone();
        let probes = probes.clone();
        handles.push(tokio::spawn(async move {
            breaker
                .call(|| async move {
                    probes.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, String>(())
                })
                .await
        }));
    }

    let mut rejected = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), Err(CircuitBreakerError::CircuitOpen)) {
            rejected += 1;
        }
    }

    assert_eq!(probes.load(Ordering::SeqCst), 1);
    assert_eq!(rejected, 4);
    assert_eq!(breaker.state(), CircuitState::Closed);
}
