//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Caller operation:
//!     → circuit_breaker.rs (gate on failure history, fail fast while open)
//!     → optionally retries.rs (caller-driven, backoff.rs spacing)
//!
//! Multi-step work:
//!     → saga.rs (run steps in order, compensate completed ones on failure)
//! ```
//!
//! # Design Decisions
//! - Breaker and workflow are independent and never retry on their own
//! - Errors from wrapped operations always reach the caller unchanged
//! - Time is injected through clock.rs so breakers are testable

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod retries;
pub mod saga;

pub use circuit_breaker::{BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use retries::{retry, retry_async, RetryPolicy};
pub use saga::{CompensableWorkflow, WorkflowReport, WorkflowStepFailure};
