//! Prometheus metrics for storage operations
//!
//! This module defines metrics for:
//! - Circuit breaker state and transitions
//! - Database operation latency

use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, GaugeVec, HistogramVec,
    IntCounterVec,
};

lazy_static! {
    /// Database operation latency
    ///
    /// Labels:
    /// - operation: storage operation name (e.g., "upsert_partitioned")
    pub static ref DB_OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "strata_db_operation_duration_seconds",
        "Duration of storage operations in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register db_operation_duration metric");

    /// Circuit breaker state gauge
    ///
    /// Values:
    /// - 0 = closed (normal operation)
    /// - 1 = open (fail-fast mode)
    ///
    /// Labels:
    /// - dependency: Name of the protected dependency (e.g., "postgres")
    pub static ref CIRCUIT_BREAKER_STATE: GaugeVec = register_gauge_vec!(
        "strata_circuit_breaker_state",
        "Circuit breaker state (0=closed, 1=open)",
        &["dependency"]
    )
    .expect("Failed to register circuit_breaker_state metric");

    /// Incremented each time a circuit breaker transitions from closed to open.
    pub static ref CIRCUIT_BREAKER_OPENS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "strata_circuit_breaker_opens_total",
        "Total number of circuit breaker open events",
        &["dependency"]
    )
    .expect("Failed to register circuit_breaker_opens_total metric");

    /// Half-open probe attempts by outcome ("success" or "failure")
    pub static ref CIRCUIT_BREAKER_HALF_OPEN_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "strata_circuit_breaker_half_open_attempts_total",
        "Total number of half-open probe attempts",
        &["dependency", "result"]
    )
    .expect("Failed to register circuit_breaker_half_open_attempts_total metric");
}

/// Record the latency of a storage operation
pub fn observe_operation(operation: &str, elapsed: std::time::Duration) {
    DB_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(elapsed.as_secs_f64());
}
