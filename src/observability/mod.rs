//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers and workflows produce:
//!     → tracing events (logging.rs installs the subscriber)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout log lines
//!     → Prometheus text rendering (demo binary)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event, never interpolated-only messages
//! - Metrics are cheap and silent until a recorder is installed

pub mod logging;
pub mod metrics;
