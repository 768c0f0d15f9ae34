//! Resilience primitives: a circuit breaker and a compensable workflow (saga).

pub mod config;
pub mod observability;
pub mod resilience;

pub use config::ResilienceConfig;
pub use resilience::{BreakerError, CircuitBreaker, CircuitState};
pub use resilience::{CompensableWorkflow, WorkflowReport, WorkflowStepFailure};
