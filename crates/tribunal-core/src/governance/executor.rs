//! Controlled plan execution.
//!
//! Steps are dispatched in plan order as soon as their dependencies have
//! completed, up to `max_workers` at a time. Transient write failures are
//! retried with exponential backoff; a step that still fails is recorded and
//! its dependents are skipped while independent branches carry on. The optional
//! [`VetoProbe`] is consulted before every dispatch, and the cancellation
//! token stops the run while keeping every file already written. A run that
//! writes nothing still returns its (empty, partial) artifact; only an
//! invalid plan is an error.

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    Artifact, ExecutionPlan, FailureReport, FeedbackBundle, FileSet, SkippedStep, Step,
    StepFailure,
};
use crate::governance::error::{ExecutorError, WriteError};
use crate::governance::writer::{CodeWriter, VetoProbe};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_workers: usize,
    /// Retries after the first attempt, for transient failures only.
    pub max_retries: u32,
    /// Delay before retry `n` (1-based) is `backoff_base * 2^(n-1)`.
    pub backoff_base: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_retries: 2,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// An artifact plus the counters the orchestrator folds into its metrics.
#[derive(Debug, Clone)]
pub struct Execution {
    pub artifact: Artifact,
    pub steps_executed: usize,
    pub retries: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StepState {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    #[instrument(skip_all, fields(plan_id = %plan.plan_id, steps = plan.steps.len()))]
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        writer: &dyn CodeWriter,
        feedback: Option<&FeedbackBundle>,
        veto: Option<&dyn VetoProbe>,
        cancel: &CancellationToken,
    ) -> Result<Execution, ExecutorError> {
        plan.validate()?;

        let mut states: HashMap<&str, StepState> = plan
            .steps
            .iter()
            .map(|s| (s.id.as_str(), StepState::Pending))
            .collect();
        let mut written: HashMap<String, FileSet> = HashMap::new();
        let mut report = FailureReport::default();
        let mut retries: u64 = 0;
        let mut in_flight = FuturesUnordered::new();
        let max_workers = self.config.max_workers.max(1);

        'run: loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            propagate_skips(plan, &mut states, &mut report);

            for step in &plan.steps {
                if in_flight.len() >= max_workers {
                    break;
                }
                if states[step.id.as_str()] != StepState::Pending {
                    continue;
                }
                let ready = step
                    .depends_on
                    .iter()
                    .all(|d| states.get(d.as_str()) == Some(&StepState::Done));
                if !ready {
                    continue;
                }
                if let Some(probe) = veto {
                    if let Some(reason) = probe.check(step, plan).await {
                        warn!(step_id = %step.id, reason = %reason, "execution vetoed");
                        report.veto = Some(reason);
                        break 'run;
                    }
                }
                debug!(step_id = %step.id, "dispatching step");
                states.insert(step.id.as_str(), StepState::Running);
                in_flight.push(self.run_step(writer, step, plan, feedback));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(in_flight = in_flight.len(), "execution cancelled");
                    report.cancelled = true;
                    break;
                }
                Some((step_id, result, attempts)) = in_flight.next() => {
                    retries += u64::from(attempts.saturating_sub(1));
                    let key = plan
                        .steps
                        .iter()
                        .find(|s| s.id == step_id)
                        .map(|s| s.id.as_str())
                        .unwrap_or_default();
                    match result {
                        Ok(files) => {
                            states.insert(key, StepState::Done);
                            written.insert(step_id, files);
                        }
                        Err(e) => {
                            warn!(step_id = %step_id, attempts, error = %e, "step failed");
                            states.insert(key, StepState::Failed);
                            report.failed.push(StepFailure {
                                step_id,
                                error: e.to_string(),
                                attempts,
                            });
                        }
                    }
                }
            }
        }
        drop(in_flight);

        if !report.cancelled && report.veto.is_none() {
            propagate_skips(plan, &mut states, &mut report);
        }

        let files: Vec<FileSet> = plan
            .steps
            .iter()
            .filter_map(|s| written.remove(&s.id))
            .collect();
        let steps_executed = files.len();

        let order: HashMap<&str, usize> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        report
            .failed
            .sort_by_key(|f| order.get(f.step_id.as_str()).copied());

        let partial = steps_executed < plan.steps.len();
        info!(
            completed = steps_executed,
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            cancelled = report.cancelled,
            vetoed = report.veto.is_some(),
            "execution finished"
        );
        Ok(Execution {
            artifact: Artifact {
                plan_id: plan.plan_id.clone(),
                files,
                partial,
                failure_report: (!report.is_empty()).then_some(report),
            },
            steps_executed,
            retries,
        })
    }

    async fn run_step(
        &self,
        writer: &dyn CodeWriter,
        step: &Step,
        plan: &ExecutionPlan,
        feedback: Option<&FeedbackBundle>,
    ) -> (String, Result<FileSet, WriteError>, u32) {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match writer.write(step, plan, feedback).await {
                Ok(mut files) => {
                    files.step_id = step.id.clone();
                    return (step.id.clone(), Ok(files), attempts);
                }
                Err(e) if e.is_transient() && attempts <= self.config.max_retries => {
                    let delay = self.config.backoff_base * 2u32.saturating_pow(attempts - 1);
                    warn!(
                        step_id = %step.id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying step"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (step.id.clone(), Err(e), attempts),
            }
        }
    }
}

/// Mark pending steps whose dependency failed or was skipped. One pass in
/// plan order suffices because dependencies precede dependents.
fn propagate_skips<'a>(
    plan: &'a ExecutionPlan,
    states: &mut HashMap<&'a str, StepState>,
    report: &mut FailureReport,
) {
    for step in &plan.steps {
        if states.get(step.id.as_str()) != Some(&StepState::Pending) {
            continue;
        }
        let blocker = step.depends_on.iter().find(|d| {
            matches!(
                states.get(d.as_str()),
                Some(StepState::Failed) | Some(StepState::Skipped)
            )
        });
        if let Some(blocked_by) = blocker {
            debug!(step_id = %step.id, blocked_by = %blocked_by, "skipping step");
            report.skipped.push(SkippedStep {
                step_id: step.id.clone(),
                blocked_by: blocked_by.clone(),
            });
            states.insert(step.id.as_str(), StepState::Skipped);
        }
    }
}
