//! Compensable multi-step workflow (saga).
//!
//! # Execution
//! ```text
//! step 0 → step 1 → ... → step n-1        all succeed: WorkflowReport
//!
//! step i fails:
//!     compensate i-1 → ... → compensate 0  WorkflowStepFailure { index: i }
//! ```
//!
//! # Design Decisions
//! - Strictly sequential, fail fast, no retries
//! - The failing step is not compensated, only completed ones are
//! - A failing compensation is logged and recorded, rollback still reaches step 0
//! - `execute` consumes the workflow, so it runs at most once

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::observability::metrics;

type StepFn<'a, E> = Box<dyn FnOnce() -> Result<(), E> + 'a>;

struct Step<'a, E> {
    name: String,
    action: StepFn<'a, E>,
    compensation: StepFn<'a, E>,
}

struct CompletedStep<'a, E> {
    index: usize,
    name: String,
    compensation: StepFn<'a, E>,
}

/// Outcome of a workflow whose every step succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowReport {
    pub workflow: String,
    pub execution_id: Uuid,
    pub steps_completed: usize,
}

/// A step failed and the completed steps before it were rolled back.
///
/// The step's error is exposed through `source()`, not repeated in the message.
#[derive(Debug, Error)]
#[error(
    "workflow '{workflow}' failed at step {index} ('{step}'); rolled back {} step(s)",
    .compensated.len()
)]
pub struct WorkflowStepFailure<E> {
    pub workflow: String,
    pub execution_id: Uuid,
    /// Index of the failing step.
    pub index: usize,
    /// Name of the failing step.
    pub step: String,
    /// Indices whose compensation ran, in the order they ran.
    pub compensated: Vec<usize>,
    /// Indices whose compensation returned an error.
    pub failed_compensations: Vec<usize>,
    /// The failing step's error.
    pub source: E,
}

impl<E> WorkflowStepFailure<E> {
    pub fn into_source(self) -> E {
        self.source
    }

    /// True when every compensation succeeded.
    pub fn rolled_back_cleanly(&self) -> bool {
        self.failed_compensations.is_empty()
    }
}

/// An ordered list of (action, compensation) pairs.
///
/// Steps may borrow from the caller for `'a`.
pub struct CompensableWorkflow<'a, E> {
    name: String,
    steps: Vec<Step<'a, E>>,
}

impl<'a, E> CompensableWorkflow<'a, E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a step named after its position.
    pub fn add_step<A, C>(&mut self, action: A, compensation: C) -> &mut Self
    where
        A: FnOnce() -> Result<(), E> + 'a,
        C: FnOnce() -> Result<(), E> + 'a,
    {
        let name = format!("step-{}", self.steps.len());
        self.add_named_step(name, action, compensation)
    }

    pub fn add_named_step<A, C>(
        &mut self,
        name: impl Into<String>,
        action: A,
        compensation: C,
    ) -> &mut Self
    where
        A: FnOnce() -> Result<(), E> + 'a,
        C: FnOnce() -> Result<(), E> + 'a,
    {
        self.steps.push(Step {
            name: name.into(),
            action: Box::new(action),
            compensation: Box::new(compensation),
        });
        self
    }
}

impl<'a, E: fmt::Display> CompensableWorkflow<'a, E> {
    /// Run every step in order, rolling back on the first failure.
    pub fn execute(self) -> Result<WorkflowReport, WorkflowStepFailure<E>> {
        let CompensableWorkflow { name: workflow, steps } = self;
        let execution_id = Uuid::new_v4();
        let span = tracing::info_span!("workflow", workflow = %workflow, %execution_id);
        let _entered = span.enter();

        let total = steps.len();
        let mut completed = Vec::with_capacity(total);

        for (index, step) in steps.into_iter().enumerate() {
            let Step {
                name,
                action,
                compensation,
            } = step;
            tracing::debug!(step = %name, index, "Running step");

            if let Err(source) = action() {
                tracing::warn!(
                    step = %name,
                    index,
                    error = %source,
                    to_compensate = completed.len(),
                    "Step failed, rolling back"
                );
                let (compensated, failed_compensations) = roll_back(&workflow, completed);
                metrics::record_workflow_execution(&workflow, false);

                return Err(WorkflowStepFailure {
                    workflow,
                    execution_id,
                    index,
                    step: name,
                    compensated,
                    failed_compensations,
                    source,
                });
            }

            completed.push(CompletedStep {
                index,
                name,
                compensation,
            });
        }

        tracing::info!(steps = total, "Workflow completed");
        metrics::record_workflow_execution(&workflow, true);

        Ok(WorkflowReport {
            workflow,
            execution_id,
            steps_completed: total,
        })
    }
}

fn roll_back<E: fmt::Display>(
    workflow: &str,
    completed: Vec<CompletedStep<'_, E>>,
) -> (Vec<usize>, Vec<usize>) {
    let mut compensated = Vec::with_capacity(completed.len());
    let mut failed = Vec::new();

    for step in completed.into_iter().rev() {
        let succeeded = match (step.compensation)() {
            Ok(()) => {
                tracing::debug!(step = %step.name, index = step.index, "Step compensated");
                true
            }
            Err(e) => {
                tracing::error!(
                    step = %step.name,
                    index = step.index,
                    error = %e,
                    "Compensation failed, continuing rollback"
                );
                failed.push(step.index);
                false
            }
        };
        metrics::record_compensation(workflow, succeeded);
        compensated.push(step.index);
    }

    (compensated, failed)
}

impl<E> fmt::Debug for CompensableWorkflow<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();
        f.debug_struct("CompensableWorkflow")
            .field("name", &self.name)
            .field("steps", &names)
            .finish()
    }
}
