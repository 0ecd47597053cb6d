//! Session state: `Phase`, `SessionStatus`, `PlanningContext`,
//! `IterationDraft`, `IterationRecord`, `OrchestrationState`, `NextStep`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::artifact::Artifact;
use crate::domain::error::StateError;
use crate::domain::plan::{ExecutionPlan, PlanComparison, PlanProposal, SynthesisConflict};
use crate::domain::quorum::QuorumReport;
use crate::domain::review::{CriticReview, FeedbackBundle, Issue, Verdict};
use crate::metrics::SessionMetrics;

/// Where a session is in the governance loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Synthesizing,
    Executing,
    Reviewing,
    Revising,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Synthesizing => "synthesizing",
            Phase::Executing => "executing",
            Phase::Reviewing => "reviewing",
            Phase::Revising => "revising",
            Phase::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Approved,
    ConditionallyApproved,
    Exhausted,
    Fatal,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Running => "running",
            SessionStatus::Approved => "approved",
            SessionStatus::ConditionallyApproved => "conditionally_approved",
            SessionStatus::Exhausted => "exhausted",
            SessionStatus::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

/// What planners see besides the requirement itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningContext {
    /// Caller-supplied key/value hints (stack, constraints, audience).
    #[serde(default)]
    pub hints: BTreeMap<String, String>,
    /// Feedback from every reviewed iteration so far, oldest first.
    #[serde(default)]
    pub feedback: Vec<FeedbackBundle>,
}

impl PlanningContext {
    pub fn with_hints(hints: BTreeMap<String, String>) -> Self {
        Self {
            hints,
            feedback: Vec::new(),
        }
    }

    /// Add a bundle, replacing any earlier bundle for the same iteration.
    pub fn merge_feedback(&mut self, bundle: FeedbackBundle) {
        self.feedback.retain(|b| b.iteration != bundle.iteration);
        self.feedback.push(bundle);
        self.feedback.sort_by_key(|b| b.iteration);
    }

    pub fn latest_feedback(&self) -> Option<&FeedbackBundle> {
        self.feedback.last()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.hints.is_empty() {
            out.push_str("Context:\n");
            for (key, value) in &self.hints {
                out.push_str(&format!("- {key}: {value}\n"));
            }
        }
        if let Some(latest) = self.latest_feedback() {
            out.push_str("Address the following review feedback from the previous attempt.\n");
            out.push_str(&latest.render());
        }
        out
    }
}

/// The partially completed current iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationDraft {
    #[serde(default)]
    pub proposals: Vec<PlanProposal>,
    #[serde(default)]
    pub debate: Vec<PlanComparison>,
    #[serde(default)]
    pub conflicts: Vec<SynthesisConflict>,
    pub plan: Option<ExecutionPlan>,
    pub artifact: Option<Artifact>,
}

/// Immutable snapshot of one finished iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub proposals: Vec<PlanProposal>,
    pub debate: Vec<PlanComparison>,
    #[serde(default)]
    pub conflicts: Vec<SynthesisConflict>,
    pub plan: ExecutionPlan,
    pub artifact: Artifact,
    pub reviews: Vec<CriticReview>,
    pub verdict: Verdict,
    pub approve_ratio: f64,
    /// Exact numerator and denominator behind `approve_ratio`.
    pub approvals: u32,
    pub total_reviews: u32,
    #[serde(default)]
    pub conditions: Vec<Issue>,
    #[serde(default)]
    pub veto_reasons: Vec<String>,
    pub feedback_bundle: Option<FeedbackBundle>,
}

impl IterationRecord {
    /// Compare by approve ratio using exact integer arithmetic.
    pub fn cmp_ratio(&self, other: &IterationRecord) -> Ordering {
        let lhs = u64::from(self.approvals) * u64::from(other.total_reviews.max(1));
        let rhs = u64::from(other.approvals) * u64::from(self.total_reviews.max(1));
        lhs.cmp(&rhs)
    }
}

/// The action a driver should take next for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    Plan,
    Synthesize,
    Execute,
    Review,
    Revise,
    Finished(SessionStatus),
}

/// The one mutable entity of a session. History is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub session_id: String,
    /// 1-based.
    pub iteration: u32,
    pub phase: Phase,
    pub history: Vec<IterationRecord>,
    pub status: SessionStatus,
    pub requirements: String,
    pub context: PlanningContext,
    pub max_iterations: u32,
    pub in_flight: Option<IterationDraft>,
    pub checkpoint_seq: u64,
    pub planner_quorum: Option<QuorumReport>,
    pub critic_quorum: Option<QuorumReport>,
    #[serde(default)]
    pub metrics: SessionMetrics,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationState {
    pub fn new(
        session_id: impl Into<String>,
        requirements: impl Into<String>,
        context: PlanningContext,
        max_iterations: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            iteration: 1,
            phase: Phase::Planning,
            history: Vec::new(),
            status: SessionStatus::Running,
            requirements: requirements.into(),
            context,
            max_iterations,
            in_flight: None,
            checkpoint_seq: 0,
            planner_quorum: None,
            critic_quorum: None,
            metrics: SessionMetrics::default(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_mutable(&self) -> Result<(), StateError> {
        if self.is_terminal() {
            return Err(StateError::Terminal {
                session_id: self.session_id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn transition(&mut self, phase: Phase) -> Result<(), StateError> {
        self.ensure_mutable()?;
        self.phase = phase;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to a terminal status. The state is frozen afterwards.
    pub fn finish(&mut self, status: SessionStatus) -> Result<(), StateError> {
        self.ensure_mutable()?;
        self.status = status;
        self.phase = Phase::Complete;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the session fatal. Unlike [`finish`](Self::finish) the phase is
    /// left where the failure happened.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        self.ensure_mutable()?;
        self.status = SessionStatus::Fatal;
        self.error = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append a finished iteration and clear the draft.
    pub fn record_iteration(&mut self, record: IterationRecord) -> Result<(), StateError> {
        self.ensure_mutable()?;
        self.history.push(record);
        self.in_flight = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// The in-flight draft, created on first access.
    pub fn draft_mut(&mut self) -> Result<&mut IterationDraft, StateError> {
        self.ensure_mutable()?;
        Ok(self.in_flight.get_or_insert_with(IterationDraft::default))
    }

    pub fn record(&self, iteration: u32) -> Option<&IterationRecord> {
        self.history.iter().find(|r| r.iteration == iteration)
    }

    pub fn last_record(&self) -> Option<&IterationRecord> {
        self.history.last()
    }

    /// Highest approve ratio across history; ties go to the later iteration.
    pub fn best_record(&self) -> Option<&IterationRecord> {
        self.history.iter().fold(None, |best, record| match best {
            Some(current) if record.cmp_ratio(current) == Ordering::Less => Some(current),
            _ => Some(record),
        })
    }

    /// Decide what to run next from the persisted fields alone.
    pub fn next_step(&self) -> NextStep {
        if self.is_terminal() {
            return NextStep::Finished(self.status);
        }
        let draft = self.in_flight.as_ref();
        let has_proposals = draft.is_some_and(|d| !d.proposals.is_empty());
        let has_plan = draft.is_some_and(|d| d.plan.is_some());
        let has_artifact = draft.is_some_and(|d| d.artifact.is_some());
        let fallback = || {
            if has_plan {
                NextStep::Execute
            } else if has_proposals {
                NextStep::Synthesize
            } else {
                NextStep::Plan
            }
        };
        match self.phase {
            Phase::Planning => NextStep::Plan,
            Phase::Synthesizing => {
                if has_proposals {
                    NextStep::Synthesize
                } else {
                    NextStep::Plan
                }
            }
            Phase::Executing => fallback(),
            Phase::Reviewing => {
                if has_artifact && has_plan {
                    NextStep::Review
                } else {
                    fallback()
                }
            }
            Phase::Revising => NextStep::Revise,
            Phase::Complete => NextStep::Finished(self.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::{Complexity, Step};

    fn record(iteration: u32, approvals: u32, total: u32) -> IterationRecord {
        let plan = ExecutionPlan::new(vec![Step::new("a")], vec![], vec![], Complexity::Low);
        IterationRecord {
            iteration,
            proposals: vec![],
            debate: vec![],
            conflicts: vec![],
            artifact: Artifact {
                plan_id: plan.plan_id.clone(),
                files: vec![],
                partial: false,
                failure_report: None,
            },
            plan,
            reviews: vec![],
            verdict: Verdict::NeedsRevision,
            approve_ratio: if total == 0 {
                0.0
            } else {
                f64::from(approvals) / f64::from(total)
            },
            approvals,
            total_reviews: total,
            conditions: vec![],
            veto_reasons: vec![],
            feedback_bundle: None,
        }
    }

    #[test]
    fn test_transition_refused_after_terminal() {
        let mut state = OrchestrationState::new("s1", "build", PlanningContext::default(), 3);
        state.transition(Phase::Synthesizing).unwrap();
        state.finish(SessionStatus::Approved).unwrap();
        assert_eq!(state.phase, Phase::Complete);
        assert!(matches!(
            state.transition(Phase::Planning),
            Err(StateError::Terminal { .. })
        ));
        assert!(state.draft_mut().is_err());
        assert_eq!(state.next_step(), NextStep::Finished(SessionStatus::Approved));
    }

    #[test]
    fn test_best_record_prefers_later_on_tie() {
        let mut state = OrchestrationState::new("s1", "build", PlanningContext::default(), 3);
        state.record_iteration(record(1, 2, 5)).unwrap();
        state.record_iteration(record(2, 3, 5)).unwrap();
        state.record_iteration(record(3, 6, 10)).unwrap();
        assert_eq!(state.best_record().map(|r| r.iteration), Some(3));

        state.record_iteration(record(4, 1, 5)).unwrap();
        assert_eq!(state.best_record().map(|r| r.iteration), Some(3));
    }

    #[test]
    fn test_next_step_follows_draft_contents() {
        let mut state = OrchestrationState::new("s1", "build", PlanningContext::default(), 3);
        assert_eq!(state.next_step(), NextStep::Plan);

        // Synthesizing without proposals falls back to planning.
        state.transition(Phase::Synthesizing).unwrap();
        assert_eq!(state.next_step(), NextStep::Plan);

        let plan = ExecutionPlan::new(vec![Step::new("a")], vec![], vec![], Complexity::Low);
        state.draft_mut().unwrap().plan = Some(plan);
        state.transition(Phase::Reviewing).unwrap();
        assert_eq!(state.next_step(), NextStep::Execute);

        state.transition(Phase::Revising).unwrap();
        assert_eq!(state.next_step(), NextStep::Revise);
    }

    #[test]
    fn test_context_merge_replaces_same_iteration() {
        let mut ctx = PlanningContext::default();
        ctx.merge_feedback(FeedbackBundle::new(2));
        ctx.merge_feedback(FeedbackBundle::new(1));
        let mut again = FeedbackBundle::new(2);
        again.veto_reasons.push("still broken".into());
        ctx.merge_feedback(again);
        assert_eq!(ctx.feedback.len(), 2);
        assert_eq!(ctx.latest_feedback().map(|b| b.veto_reasons.len()), Some(1));
        assert!(ctx.render().contains("still broken"));
    }
}
