//! `GovernanceOrchestrator`: the plan → synthesize → execute → review loop.
//!
//! The orchestrator is the single writer of a session's
//! [`OrchestrationState`]. Every step works on a copy of the state; the copy
//! is checkpointed and only then committed, so the state held between steps
//! is always one that has been persisted. A failed step marks the session
//! `FATAL` and returns that last committed state inside
//! [`OrchestrationError::PhaseFailed`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use tribunal_state::{CheckpointKey, CheckpointStore, StorageError};
use uuid::Uuid;

use crate::agent::AgentClient;
use crate::config::{ConfigError, GovernanceConfig, PhaseTimeouts};
use crate::domain::{
    Artifact, ExecutionPlan, FeedbackBundle, Issue, IterationDraft, IterationRecord, NextStep,
    OrchestrationState, Phase, PlanningContext, QuorumReport, SessionStatus, Verdict,
};
use crate::governance::consensus;
use crate::governance::critic::CriticPool;
use crate::governance::error::{FanOutError, OrchestrationError, PhaseError};
use crate::governance::executor::Executor;
use crate::governance::planner::PlannerPool;
use crate::governance::synthesis::{self, PlanSynthesizer};
use crate::governance::writer::{AgentCodeWriter, CodeWriter, VetoProbe};
use crate::metrics::SessionMetrics;
use crate::obs;

pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// What a finished session hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub session_id: String,
    pub status: SessionStatus,
    /// `true` only for `APPROVED` and `CONDITIONALLY_APPROVED` sessions.
    pub approved: bool,
    /// Verdict of the iteration the artifact comes from.
    pub verdict: Option<Verdict>,
    /// Iteration the artifact comes from.
    pub iteration: Option<u32>,
    pub iterations_run: usize,
    pub plan: Option<ExecutionPlan>,
    pub artifact: Option<Artifact>,
    /// Caveats attached to a conditional approval.
    pub conditions: Vec<Issue>,
    /// Every critic concern left open, for any result short of `APPROVE`.
    pub unresolved_concerns: Vec<String>,
    pub planner_quorum: Option<QuorumReport>,
    pub critic_quorum: Option<QuorumReport>,
    pub metrics: SessionMetrics,
    pub error: Option<String>,
}

impl OrchestrationResult {
    /// Build the result a state describes. Approved sessions return their
    /// final iteration; every other status returns the best-scoring one.
    pub fn from_state(state: &OrchestrationState) -> Self {
        let chosen = match state.status {
            SessionStatus::Approved | SessionStatus::ConditionallyApproved => state.last_record(),
            _ => state.best_record(),
        };
        let approved = matches!(
            state.status,
            SessionStatus::Approved | SessionStatus::ConditionallyApproved
        );

        let (plan, artifact) = match chosen {
            Some(record) => (Some(record.plan.clone()), Some(record.artifact.clone())),
            None => {
                let draft = state.in_flight.as_ref();
                (
                    draft.and_then(|d| d.plan.clone()),
                    draft.and_then(|d| d.artifact.clone()),
                )
            }
        };

        let unresolved_concerns = if state.status == SessionStatus::Approved {
            Vec::new()
        } else {
            chosen.map(unresolved_concerns).unwrap_or_default()
        };

        Self {
            session_id: state.session_id.clone(),
            status: state.status,
            approved,
            verdict: chosen.map(|r| r.verdict),
            iteration: chosen.map(|r| r.iteration),
            iterations_run: state.history.len(),
            plan,
            artifact,
            conditions: chosen.map(|r| r.conditions.clone()).unwrap_or_default(),
            unresolved_concerns,
            planner_quorum: state.planner_quorum.clone(),
            critic_quorum: state.critic_quorum.clone(),
            metrics: state.metrics.clone(),
            error: state.error.clone(),
        }
    }
}

/// Veto reasons and execution failures first, then one line per issue or
/// scan finding, plus one line per issue-free non-approving review.
fn unresolved_concerns(record: &IterationRecord) -> Vec<String> {
    let mut out = record.veto_reasons.clone();
    if let Some(feedback) = &record.feedback_bundle {
        out.extend(feedback.execution_failures.iter().cloned());
    }
    for review in &record.reviews {
        if review.decision != Verdict::Approve && review.issues.is_empty() {
            out.push(format!("{} ({}): {}", review.critic_id, review.decision, review.reasoning));
        }
        for issue in review.issues.iter().chain(&review.scan_findings) {
            out.push(format!(
                "{} [{}] {}",
                review.critic_id, issue.severity, issue.description
            ));
        }
    }
    out
}

pub struct GovernanceOrchestrator {
    planners: PlannerPool,
    synthesizer: PlanSynthesizer,
    executor: Executor,
    critics: CriticPool,
    writer: Arc<dyn CodeWriter>,
    veto: Option<Arc<dyn VetoProbe>>,
    store: Arc<dyn CheckpointStore>,
    timeouts: PhaseTimeouts,
}

impl GovernanceOrchestrator {
    pub fn new(
        planners: PlannerPool,
        critics: CriticPool,
        writer: Arc<dyn CodeWriter>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            planners,
            synthesizer: PlanSynthesizer::new(),
            executor: Executor::new(Default::default()),
            critics,
            writer,
            veto: None,
            store,
            timeouts: PhaseTimeouts::default(),
        }
    }

    /// Wire every component from `config`, using one agent client for all
    /// planners, critics and the code writer.
    pub fn from_config(
        config: &GovernanceConfig,
        client: Arc<dyn AgentClient>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let planners = PlannerPool::new(
            config.planner_registrations(Arc::clone(&client)),
            config.planner_pool_config(),
        );
        let critics = CriticPool::new(
            config.critic_registrations(Arc::clone(&client)),
            config.critic_pool_config(),
        );
        let writer = AgentCodeWriter::new(
            client,
            Duration::from_millis(config.executor.call_timeout_ms),
        )
        .with_sampling(config.executor.temperature, config.executor.max_tokens);
        Ok(Self::new(planners, critics, Arc::new(writer), store)
            .with_executor(Executor::new(config.executor_config()))
            .with_timeouts(config.phase_timeouts()))
    }

    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_veto_probe(mut self, probe: Arc<dyn VetoProbe>) -> Self {
        self.veto = Some(probe);
        self
    }

    pub fn with_timeouts(mut self, timeouts: PhaseTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// A fresh session in `PLANNING`. Nothing is persisted until it is driven.
    pub fn new_session(
        &self,
        requirements: &str,
        context: PlanningContext,
        max_iterations: u32,
    ) -> OrchestrationState {
        OrchestrationState::new(
            Uuid::new_v4().to_string(),
            requirements,
            context,
            max_iterations.max(1),
        )
    }

    /// Run a new session to completion.
    pub async fn run(
        &self,
        requirements: &str,
        context: PlanningContext,
        max_iterations: u32,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        let state = self.new_session(requirements, context, max_iterations);
        self.drive(state, &CancellationToken::new(), None).await
    }

    /// Continue a session from its latest checkpoint. A terminal checkpoint
    /// returns its stored result without running anything.
    pub async fn resume(&self, session_id: &str) -> Result<OrchestrationResult, OrchestrationError> {
        let state = self.load_state(session_id).await?;
        if state.is_terminal() {
            info!(session_id = %session_id, status = %state.status, "session already finished");
            return Ok(OrchestrationResult::from_state(&state));
        }
        info!(
            session_id = %session_id,
            iteration = state.iteration,
            phase = %state.phase,
            "resuming session"
        );
        self.drive(state, &CancellationToken::new(), None).await
    }

    /// The state stored in a session's latest checkpoint.
    pub async fn load_state(&self, session_id: &str) -> Result<OrchestrationState, OrchestrationError> {
        let record = self
            .store
            .latest(session_id)
            .await?
            .ok_or_else(|| OrchestrationError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        let state: OrchestrationState =
            serde_json::from_value(record.document).map_err(StorageError::from)?;
        Ok(state)
    }

    /// Drive `state` until it is terminal, publishing every committed state
    /// to `observer`.
    pub async fn drive(
        &self,
        state: OrchestrationState,
        cancel: &CancellationToken,
        observer: Option<&watch::Sender<OrchestrationState>>,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        let span = obs::session_span(&state.session_id);
        self.drive_inner(state, cancel, observer).instrument(span).await
    }

    async fn drive_inner(
        &self,
        mut state: OrchestrationState,
        cancel: &CancellationToken,
        observer: Option<&watch::Sender<OrchestrationState>>,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        if state.is_terminal() {
            return Ok(OrchestrationResult::from_state(&state));
        }

        if state.checkpoint_seq == 0 {
            let mut initial = state.clone();
            if let Err(e) = self.checkpoint(&mut initial).await {
                return Err(self.fail(state, Phase::Planning, e.into(), observer).await);
            }
            state = initial;
            publish(observer, &state);
        }

        loop {
            let step = state.next_step();
            let phase = match step {
                NextStep::Finished(_) => break,
                NextStep::Plan => Phase::Planning,
                NextStep::Synthesize => Phase::Synthesizing,
                NextStep::Execute => Phase::Executing,
                NextStep::Review => Phase::Reviewing,
                NextStep::Revise => Phase::Revising,
            };
            if cancel.is_cancelled() {
                return Err(self.fail(state, phase, PhaseError::Cancelled, observer).await);
            }
            obs::emit_phase_entered(&state.session_id, state.iteration, phase);

            let mut working = state.clone();
            let outcome = match step {
                NextStep::Plan => self.plan(&mut working, cancel).await,
                NextStep::Synthesize => self.synthesize(&mut working),
                NextStep::Execute => self.execute(&mut working, cancel).await,
                NextStep::Review => self.review(&mut working, cancel).await,
                NextStep::Revise => revise(&mut working),
                NextStep::Finished(_) => Ok(()),
            };
            if let Err(e) = outcome {
                return Err(self.fail(state, phase, e, observer).await);
            }
            if let Err(e) = self.checkpoint(&mut working).await {
                return Err(self.fail(state, phase, e.into(), observer).await);
            }
            state = working;
            publish(observer, &state);
        }

        obs::emit_session_finished(&state.session_id, state.status, state.history.len());
        state.metrics.flush(&state.session_id);
        Ok(OrchestrationResult::from_state(&state))
    }

    async fn plan(
        &self,
        state: &mut OrchestrationState,
        cancel: &CancellationToken,
    ) -> Result<(), PhaseError> {
        state.transition(Phase::Planning)?;
        let round = self
            .planners
            .propose_plans(&state.requirements, &state.context, self.timeouts.planning, cancel)
            .await?;
        state.metrics.add_plans_proposed(round.proposals.len());
        state.metrics.add_agents_dropped(round.report.dropped.len());
        if round.report.degraded() {
            warn!(report = %round.report, "planning proceeded without every planner");
        }
        let debate = synthesis::debate(&round.proposals);
        state.planner_quorum = Some(round.report);
        *state.draft_mut()? = IterationDraft {
            proposals: round.proposals,
            debate,
            ..IterationDraft::default()
        };
        state.transition(Phase::Synthesizing)?;
        Ok(())
    }

    fn synthesize(&self, state: &mut OrchestrationState) -> Result<(), PhaseError> {
        state.transition(Phase::Synthesizing)?;
        let draft = state.draft_mut()?;
        let synthesis = self.synthesizer.synthesize(&draft.proposals)?;
        info!(
            plan_id = %synthesis.plan.plan_id,
            steps = synthesis.plan.steps.len(),
            conflicts = synthesis.conflicts.len(),
            "plan synthesized"
        );
        draft.plan = Some(synthesis.plan);
        draft.conflicts = synthesis.conflicts;
        draft.artifact = None;
        state.metrics.inc_plans_synthesized();
        state.transition(Phase::Executing)?;
        Ok(())
    }

    async fn execute(
        &self,
        state: &mut OrchestrationState,
        cancel: &CancellationToken,
    ) -> Result<(), PhaseError> {
        state.transition(Phase::Executing)?;
        let plan = state
            .in_flight
            .as_ref()
            .and_then(|d| d.plan.clone())
            .ok_or(PhaseError::IncompleteDraft { missing: "plan" })?;
        let feedback = state.context.latest_feedback().cloned();

        // The phase deadline cancels a child token so the executor can stop
        // gracefully and keep the files it already has.
        let token = cancel.child_token();
        let execution = {
            let run = self.executor.execute(
                &plan,
                self.writer.as_ref(),
                feedback.as_ref(),
                self.veto.as_deref(),
                &token,
            );
            tokio::pin!(run);
            tokio::select! {
                result = &mut run => result,
                _ = tokio::time::sleep(self.timeouts.execution) => {
                    warn!(timeout_ms = self.timeouts.execution.as_millis() as u64, "execution phase timed out");
                    token.cancel();
                    run.await
                }
            }
        }?;

        state.metrics.add_steps_executed(execution.steps_executed);
        state.metrics.add_step_retries(execution.retries);
        let artifact = execution.artifact;

        if let Some(reason) = artifact
            .failure_report
            .as_ref()
            .and_then(|r| r.veto.clone())
        {
            let veto_reasons = vec![format!("veto probe: {reason}")];
            let mut feedback = FeedbackBundle::new(state.iteration);
            feedback.veto_reasons = veto_reasons.clone();
            state.metrics.add_vetoes(1);
            return skip_review(state, plan, artifact, Verdict::Reject, veto_reasons, feedback);
        }

        // Nothing to review: hand the failures back to the planners.
        if artifact.file_count() == 0 {
            let mut failures = artifact
                .failure_report
                .as_ref()
                .map(|r| r.describe())
                .unwrap_or_default();
            if failures.is_empty() {
                failures.push("no step produced any files".to_string());
            }
            warn!(failures = failures.len(), "execution produced no files");
            let mut feedback = FeedbackBundle::new(state.iteration);
            feedback.execution_failures = failures;
            return skip_review(state, plan, artifact, Verdict::NeedsRevision, Vec::new(), feedback);
        }

        state.draft_mut()?.artifact = Some(artifact);
        state.transition(Phase::Reviewing)?;
        Ok(())
    }

    async fn review(
        &self,
        state: &mut OrchestrationState,
        cancel: &CancellationToken,
    ) -> Result<(), PhaseError> {
        state.transition(Phase::Reviewing)?;
        let draft = state
            .in_flight
            .clone()
            .ok_or(PhaseError::IncompleteDraft { missing: "artifact" })?;
        let plan = draft
            .plan
            .ok_or(PhaseError::IncompleteDraft { missing: "plan" })?;
        let artifact = draft
            .artifact
            .ok_or(PhaseError::IncompleteDraft { missing: "artifact" })?;

        let round = self
            .critics
            .review(&state.requirements, &artifact, &plan, self.timeouts.review, cancel)
            .await?;
        state.metrics.add_reviews_conducted(round.reviews.len());
        state.metrics.add_agents_dropped(round.report.dropped.len());
        state.critic_quorum = Some(round.report);

        let outcome = consensus::evaluate(&round.reviews, state.iteration);
        obs::emit_verdict_decided(
            &state.session_id,
            state.iteration,
            outcome.verdict,
            outcome.approve_ratio,
        );
        state.metrics.add_vetoes(outcome.veto_reasons.len());

        let verdict = outcome.verdict;
        state.record_iteration(IterationRecord {
            iteration: state.iteration,
            proposals: draft.proposals,
            debate: draft.debate,
            conflicts: draft.conflicts,
            plan,
            artifact,
            reviews: round.reviews,
            verdict,
            approve_ratio: outcome.approve_ratio,
            approvals: outcome.approvals,
            total_reviews: outcome.total,
            conditions: outcome.conditions,
            veto_reasons: outcome.veto_reasons,
            feedback_bundle: outcome.feedback,
        })?;

        match verdict {
            Verdict::Approve => state.finish(SessionStatus::Approved)?,
            Verdict::ConditionalApproval => state.finish(SessionStatus::ConditionallyApproved)?,
            Verdict::Reject | Verdict::NeedsRevision => {
                state.metrics.inc_revisions_requested();
                state.transition(Phase::Revising)?;
            }
        }
        Ok(())
    }

    /// Persist `state` under the next sequence number.
    async fn checkpoint(&self, state: &mut OrchestrationState) -> Result<(), StorageError> {
        state.checkpoint_seq += 1;
        state.metrics.inc_checkpoints_written();
        let key = CheckpointKey::new(
            &state.session_id,
            state.checkpoint_seq,
            state.iteration,
            state.phase.as_str(),
        );
        let written = match serde_json::to_value(&*state) {
            Ok(document) => self.store.write(&key, &document).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            state.checkpoint_seq -= 1;
            state.metrics.checkpoints_written -= 1;
            obs::emit_checkpoint_error(&state.session_id, &e);
            return Err(e);
        }
        obs::emit_checkpoint_written(&state.session_id, state.checkpoint_seq, state.phase);
        Ok(())
    }

    /// Mark the last committed state `FATAL`, try to persist it, and wrap it
    /// into the error returned to the caller.
    async fn fail(
        &self,
        mut state: OrchestrationState,
        phase: Phase,
        source: PhaseError,
        observer: Option<&watch::Sender<OrchestrationState>>,
    ) -> OrchestrationError {
        warn!(phase = %phase, error = %source, "phase failed, session is fatal");
        if let PhaseError::FanOut(FanOutError::QuorumNotReached { report }) = &source {
            match phase {
                Phase::Reviewing => state.critic_quorum = Some(report.clone()),
                _ => state.planner_quorum = Some(report.clone()),
            }
        }
        if state.fail(format!("{phase} phase failed: {source}")).is_ok() {
            // Best effort: a failing store is often the reason we are here.
            let _ = self.checkpoint(&mut state).await;
        }
        publish(observer, &state);
        obs::emit_session_finished(&state.session_id, state.status, state.history.len());
        state.metrics.flush(&state.session_id);
        OrchestrationError::PhaseFailed {
            phase,
            source,
            state: Box::new(state),
        }
    }
}

/// Close the current iteration without a review round and move to REVISING.
fn skip_review(
    state: &mut OrchestrationState,
    plan: ExecutionPlan,
    artifact: Artifact,
    verdict: Verdict,
    veto_reasons: Vec<String>,
    feedback: FeedbackBundle,
) -> Result<(), PhaseError> {
    let draft = state.draft_mut()?.clone();
    let record = IterationRecord {
        iteration: state.iteration,
        proposals: draft.proposals,
        debate: draft.debate,
        conflicts: draft.conflicts,
        plan,
        artifact,
        reviews: Vec::new(),
        verdict,
        approve_ratio: 0.0,
        approvals: 0,
        total_reviews: 0,
        conditions: Vec::new(),
        veto_reasons,
        feedback_bundle: Some(feedback),
    };
    obs::emit_verdict_decided(&state.session_id, state.iteration, verdict, 0.0);
    state.metrics.inc_revisions_requested();
    state.record_iteration(record)?;
    state.transition(Phase::Revising)?;
    Ok(())
}

fn revise(state: &mut OrchestrationState) -> Result<(), PhaseError> {
    state.transition(Phase::Revising)?;
    let feedback = state.last_record().and_then(|r| r.feedback_bundle.clone());
    if let Some(bundle) = feedback {
        state.context.merge_feedback(bundle);
    }
    if state.iteration >= state.max_iterations {
        info!(
            iterations = state.iteration,
            "iteration budget exhausted without approval"
        );
        state.finish(SessionStatus::Exhausted)?;
    } else {
        state.iteration += 1;
        state.in_flight = None;
        state.transition(Phase::Planning)?;
    }
    Ok(())
}

fn publish(observer: Option<&watch::Sender<OrchestrationState>>, state: &OrchestrationState) {
    if let Some(tx) = observer {
        tx.send_replace(state.clone());
    }
}
