//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use resilience_patterns::config::CircuitBreakerConfig;
use resilience_patterns::resilience::{CircuitBreaker, ManualClock};

/// Error returned by the fake dependencies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct TestError(pub String);

/// Counts how often a wrapped operation actually ran.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// An operation that records the call and fails.
    pub fn failing(&self) -> impl FnOnce() -> Result<(), TestError> + '_ {
        move || {
            self.hit();
            Err(TestError("dependency down".into()))
        }
    }

    /// An operation that records the call and succeeds.
    pub fn succeeding(&self) -> impl FnOnce() -> Result<u32, TestError> + '_ {
        move || Ok(self.hit())
    }
}

/// A breaker on a manual clock with a 5 second reset timeout.
pub fn manual_breaker(name: &str, threshold: u32) -> (CircuitBreaker, ManualClock) {
    let clock = ManualClock::new();
    let config = CircuitBreakerConfig {
        failure_threshold: threshold,
        reset_timeout_ms: 5_000,
    };
    let breaker = CircuitBreaker::with_clock(name, &config, Arc::new(clock.clone()));
    (breaker, clock)
}
