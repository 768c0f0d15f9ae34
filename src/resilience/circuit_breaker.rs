//! Circuit breaker for failure-prone operations.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: operation assumed down, calls fail fast
//! - Half-Open: testing if the operation recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: on the first call after the reset timeout
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails
//! ```
//!
//! # Design Decisions
//! - One breaker per protected operation (not global)
//! - Fail fast in Open state, the operation is never invoked
//! - Single trial in Half-Open, concurrent callers are rejected meanwhile
//! - Operation errors are returned unchanged, the breaker only observes them

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics::{self, CallOutcome};
use crate::resilience::clock::{Clock, SystemClock};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Lowercase label used in metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(label)
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was rejected without invoking the operation.
    #[error("circuit '{name}' is open, retry after {}ms", .retry_after.as_millis())]
    CircuitOpen {
        name: String,
        /// Time left until a trial call is admitted.
        retry_after: Duration,
    },
    /// The operation ran and failed.
    #[error(transparent)]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen { .. })
    }

    /// The operation's own error, if the operation ran.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            BreakerError::CircuitOpen { .. } => None,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    /// Milliseconds since the breaker last opened, absent while closed.
    pub since_last_failure_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Gates calls to one operation based on its recent failures.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker driven by the system clock.
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a breaker driven by the given clock.
    pub fn with_clock(
        name: impl Into<String>,
        config: &CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        if config.failure_threshold == 0 {
            tracing::warn!(breaker = %name, "failure_threshold of 0 raised to 1");
        }
        metrics::record_breaker_state(&name, CircuitState::Closed);

        Self {
            name,
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Instant of the most recent transition into Open.
    pub fn last_failure(&self) -> Option<Instant> {
        self.lock().last_failure
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            reset_timeout_ms: self.reset_timeout.as_millis() as u64,
            since_last_failure_ms: inner
                .last_failure
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
        }
    }

    /// Run `operation` through the breaker.
    pub fn call<T, E, F>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.acquire::<E>()?;
        match operation() {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail();
                Err(BreakerError::Operation(e))
            }
        }
    }

    /// Run an async `operation` through the breaker.
    ///
    /// The breaker lock is not held while the operation is awaited. Dropping
    /// the returned future during a trial call frees the trial slot.
    pub async fn call_async<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire::<E>()?;
        match operation().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail();
                Err(BreakerError::Operation(e))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire<E>(&self) -> Result<CallPermit<'_>, BreakerError<E>> {
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let opened_at = inner.last_failure.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed > self.reset_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(CallPermit::new(self, true))
                } else {
                    drop(inner);
                    Err(self.reject(self.reset_timeout - elapsed))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    drop(inner);
                    Err(self.reject(Duration::ZERO))
                } else {
                    inner.probe_in_flight = true;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    fn reject<E>(&self, retry_after: Duration) -> BreakerError<E> {
        tracing::debug!(
            breaker = %self.name,
            retry_after_ms = retry_after.as_millis() as u64,
            "Call rejected, circuit open"
        );
        metrics::record_breaker_call(&self.name, CallOutcome::Rejected);
        BreakerError::CircuitOpen {
            name: self.name.clone(),
            retry_after,
        }
    }

    fn on_success(&self, trial: bool) {
        metrics::record_breaker_call(&self.name, CallOutcome::Success);
        let mut inner = self.lock();

        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.failure_count = 0;
                inner.last_failure = None;
                inner.probe_in_flight = false;
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Closed => inner.failure_count = 0,
            // Result of a call admitted before another caller opened the circuit.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        metrics::record_breaker_call(&self.name, CallOutcome::Failure);
        let now = self.clock.now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure = Some(now);
                inner.probe_in_flight = false;
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.failure_threshold {
                    inner.last_failure = Some(now);
                    self.transition(&mut inner, CircuitState::Open);
                } else {
                    tracing::debug!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        threshold = self.failure_threshold,
                        "Call failed"
                    );
                }
            }
            _ => {}
        }
    }

    fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            inner.probe_in_flight = false;
            tracing::debug!(breaker = %self.name, "Trial call abandoned");
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = %from,
                failures = inner.failure_count,
                reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                "Circuit opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                breaker = %self.name,
                "Circuit half-open, admitting trial call"
            ),
            CircuitState::Closed => tracing::info!(
                breaker = %self.name,
                "Circuit closed, operation recovered"
            ),
        }
        metrics::record_breaker_transition(&self.name, from, to);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .finish()
    }
}

/// Admission to run the operation once.
///
/// A trial permit that is dropped without an outcome frees the trial slot.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_probe();
        }
    }
}
