//! Circuit breaker guarding connection acquisition
//!
//! Consecutive acquisition failures open the breaker; while open, calls fail
//! fast with [`CircuitBreakerError::CircuitOpen`]. After the half-open
//! timeout a single probe is let through and its outcome decides whether the
//! breaker closes again.
//!
//! Configured per dependency from the environment:
//! - `STRATA_CB_{DEP}_FAILURE_THRESHOLD` (default 5)
//! - `STRATA_CB_{DEP}_HALF_OPEN_TIMEOUT_SECS` (default 30)

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_HALF_OPEN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe
    pub half_open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            half_open_timeout: Duration::from_secs(DEFAULT_HALF_OPEN_TIMEOUT_SECS),
        }
    }
}

impl CircuitBreakerConfig {
    /// Load configuration for `dependency`; zero or unparseable values fall
    /// back to the defaults with a warning
    pub fn from_env(dependency: &str) -> Self {
        let prefix = format!("STRATA_CB_{}", dependency.to_uppercase());

        let failure_threshold = positive_env::<u32>(
            &format!("{}_FAILURE_THRESHOLD", prefix),
            DEFAULT_FAILURE_THRESHOLD,
        );
        let half_open_timeout_secs = positive_env::<u64>(
            &format!("{}_HALF_OPEN_TIMEOUT_SECS", prefix),
            DEFAULT_HALF_OPEN_TIMEOUT_SECS,
        );

        info!(
            dependency = %dependency,
            failure_threshold,
            half_open_timeout_secs,
            "Circuit breaker configuration loaded"
        );

        Self {
            failure_threshold,
            half_open_timeout: Duration::from_secs(half_open_timeout_secs),
        }
    }
}

fn positive_env<T>(var: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    match std::env::var(var) {
        Err(_) => default,
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) if v > T::default() => v,
            _ => {
                warn!(var = %var, value = %raw, default = %default, "Invalid value, using default");
                default
            }
        },
    }
}

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

pub struct DatabaseCircuitBreaker {
    config: CircuitBreakerConfig,
    dependency: String,
    state: Mutex<BreakerState>,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Operation failed: {0}")]
    Failure(E),
}

impl DatabaseCircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let dependency = dependency.into();
        crate::metrics::CIRCUIT_BREAKER_STATE
            .with_label_values(&[&dependency])
            .set(0.0);
        Self {
            config,
            dependency,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Whether calls are currently being rejected
    pub fn is_open(&self) -> bool {
        let state = self.state.lock();
        state.state == CircuitState::Open
            && state
                .opened_at
                .map(|t| t.elapsed() < self.config.half_open_timeout)
                .unwrap_or(false)
    }

    /// Run `f` unless the breaker is open
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let probing = self.admit()?;
        match f().await {
            Ok(value) => {
                self.on_success(probing);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(probing, &e);
                Err(CircuitBreakerError::Failure(e))
            }
        }
    }

    /// Decide whether a call may proceed; `Ok(true)` marks a half-open probe
    fn admit<E>(&self) -> Result<bool, CircuitBreakerError<E>> {
        let mut state = self.state.lock();
        if state.state == CircuitState::Closed {
            return Ok(false);
        }
        let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
        if elapsed < self.config.half_open_timeout || state.probe_in_flight {
            warn!(
                dependency = %self.dependency,
                open_for_ms = elapsed.as_millis() as u64,
                "Circuit breaker is open, rejecting request"
            );
            return Err(CircuitBreakerError::CircuitOpen);
        }
        state.probe_in_flight = true;
        info!(dependency = %self.dependency, "Attempting half-open probe");
        Ok(true)
    }

    fn on_success(&self, probing: bool) {
        let mut state = self.state.lock();
        let was_open = state.state == CircuitState::Open;
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.probe_in_flight = false;
        drop(state);

        if probing {
            crate::metrics::CIRCUIT_BREAKER_HALF_OPEN_ATTEMPTS
                .with_label_values(&[&self.dependency, "success"])
                .inc();
        }
        if was_open {
            info!(dependency = %self.dependency, "Circuit breaker closed");
            crate::metrics::CIRCUIT_BREAKER_STATE
                .with_label_values(&[&self.dependency])
                .set(0.0);
        }
    }

    fn on_failure(&self, probing: bool, err: &dyn std::fmt::Display) {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        if probing {
            state.probe_in_flight = false;
            state.opened_at = Some(Instant::now());
            warn!(dependency = %self.dependency, error = %err, "Half-open probe failed, circuit remains open");
            crate::metrics::CIRCUIT_BREAKER_HALF_OPEN_ATTEMPTS
                .with_label_values(&[&self.dependency, "failure"])
                .inc();
            return;
        }

        if state.state == CircuitState::Closed
            && state.consecutive_failures >= self.config.failure_threshold
        {
            state.state = CircuitState::Open;
            state.opened_at = Some(Instant::now());
            error!(
                dependency = %self.dependency,
                consecutive_failures = state.consecutive_failures,
                threshold = self.config.failure_threshold,
                error = %err,
                "Circuit breaker transition: Closed → Open"
            );
            crate::metrics::CIRCUIT_BREAKER_OPENS_TOTAL
                .with_label_values(&[&self.dependency])
                .inc();
            crate::metrics::CIRCUIT_BREAKER_STATE
                .with_label_values(&[&self.dependency])
                .set(1.0);
        } else {
            warn!(
                dependency = %self.dependency,
                consecutive_failures = state.consecutive_failures,
                error = %err,
                "Request failed"
            );
        }
    }
}
