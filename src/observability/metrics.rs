//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_breaker_calls_total` (counter): calls by breaker, outcome
//! - `resilience_breaker_transitions_total` (counter): state changes by breaker, from, to
//! - `resilience_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `resilience_workflow_executions_total` (counter): executions by workflow, outcome
//! - `resilience_workflow_compensations_total` (counter): compensations by workflow, outcome
//!
//! Every helper is a no-op until a recorder is installed, either globally
//! through [`install_recorder`] or for one thread with `metrics::with_local_recorder`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitState;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Install a Prometheus recorder as the global recorder.
///
/// The returned handle renders the current values in text exposition format.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;
    Ok(handle)
}

/// Outcome label for a breaker call.
#[derive(Debug, Clone, Copy)]
pub enum CallOutcome {
    Success,
    Failure,
    Rejected,
}

impl CallOutcome {
    fn as_str(self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Rejected => "rejected",
        }
    }
}

pub fn record_breaker_call(breaker: &str, outcome: CallOutcome) {
    metrics::counter!(
        "resilience_breaker_calls_total",
        "breaker" => breaker.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_breaker_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    metrics::counter!(
        "resilience_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_breaker_state(breaker, to);
}

pub fn record_breaker_state(breaker: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    metrics::gauge!("resilience_breaker_state", "breaker" => breaker.to_string()).set(value);
}

pub fn record_workflow_execution(workflow: &str, succeeded: bool) {
    let outcome = if succeeded { "success" } else { "rolled_back" };
    metrics::counter!(
        "resilience_workflow_executions_total",
        "workflow" => workflow.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_compensation(workflow: &str, succeeded: bool) {
    let outcome = if succeeded { "success" } else { "failure" };
    metrics::counter!(
        "resilience_workflow_compensations_total",
        "workflow" => workflow.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metrics_exporter_prometheus::PrometheusBuilder;

    use crate::config::CircuitBreakerConfig;
    use crate::resilience::{CircuitBreaker, CompensableWorkflow, ManualClock};

    /// Run `f` with a thread-local Prometheus recorder and render what it saw.
    fn render_with(f: impl FnOnce()) -> String {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, f);
        handle.render()
    }

    /// Value of the series `name` carrying every `key="value"` label given.
    fn sample(rendered: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        rendered
            .lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.rsplit_once(' '))
            .find(|(series, _)| {
                series.strip_prefix(name).is_some_and(|rest| rest.starts_with('{'))
                    && labels
                        .iter()
                        .all(|(k, v)| series.contains(&format!("{k}=\"{v}\"")))
            })
            .and_then(|(_, value)| value.parse().ok())
    }

    #[test]
    fn test_open_breaker_counts_rejections_and_reports_state() {
        let rendered = render_with(|| {
            let clock = ManualClock::new();
            let config = CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout_ms: 5_000,
            };
            let cb = CircuitBreaker::with_clock("inventory", &config, Arc::new(clock));
            for _ in 0..2 {
                let _ = cb.call(|| Err::<(), _>("down".to_string()));
            }
            assert!(cb
                .call(|| Ok::<_, String>(()))
                .unwrap_err()
                .is_circuit_open());
        });

        let breaker = ("breaker", "inventory");
        assert_eq!(
            sample(&rendered, "resilience_breaker_calls_total", &[breaker, ("outcome", "failure")]),
            Some(2.0)
        );
        assert_eq!(
            sample(&rendered, "resilience_breaker_calls_total", &[breaker, ("outcome", "rejected")]),
            Some(1.0)
        );
        assert_eq!(
            sample(
                &rendered,
                "resilience_breaker_transitions_total",
                &[breaker, ("from", "closed"), ("to", "open")]
            ),
            Some(1.0)
        );
        assert_eq!(sample(&rendered, "resilience_breaker_state", &[breaker]), Some(2.0));
    }

    #[test]
    fn test_rollback_counts_failed_compensations() {
        let rendered = render_with(|| {
            let mut workflow = CompensableWorkflow::new("checkout");
            workflow
                .add_step(|| Ok(()), || Ok(()))
                .add_step(|| Ok(()), || Err("refund rejected".to_string()))
                .add_step(|| Err("card declined".to_string()), || Ok(()));
            let failure = workflow.execute().unwrap_err();
            assert_eq!(failure.failed_compensations, vec![1]);
        });

        let workflow = ("workflow", "checkout");
        assert_eq!(
            sample(
                &rendered,
                "resilience_workflow_compensations_total",
                &[workflow, ("outcome", "failure")]
            ),
            Some(1.0)
        );
        assert_eq!(
            sample(
                &rendered,
                "resilience_workflow_compensations_total",
                &[workflow, ("outcome", "success")]
            ),
            Some(1.0)
        );
        assert_eq!(
            sample(
                &rendered,
                "resilience_workflow_executions_total",
                &[workflow, ("outcome", "rolled_back")]
            ),
            Some(1.0)
        );
    }
}
