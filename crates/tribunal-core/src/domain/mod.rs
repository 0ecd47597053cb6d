//! Domain models for the governance loop.
//!
//! Canonical definitions for the core entities:
//! - `PlanProposal` / `ExecutionPlan`: rival and synthesized plans
//! - `Artifact`: executor output
//! - `CriticReview` / `FeedbackBundle`: review results and routed feedback
//! - `OrchestrationState`: the checkpointed session

pub mod artifact;
pub mod error;
pub mod plan;
pub mod quorum;
pub mod review;
pub mod state;

pub use artifact::{Artifact, FailureReport, FileSet, GeneratedFile, SkippedStep, StepFailure};
pub use error::{PlanError, ProposalError, StateError};
pub use plan::{
    canonical_key, step_id_for, Complexity, ComplexityConflict, ExecutionPlan, Philosophy,
    PlanComparison, PlanProposal, Recommendation, Step, SynthesisConflict,
};
pub use quorum::{DroppedAgent, QuorumReport};
pub use review::{CriticReview, FeedbackBundle, FeedbackItem, Issue, Severity, Specialty, Verdict};
pub use state::{
    IterationDraft, IterationRecord, NextStep, OrchestrationState, Phase, PlanningContext,
    SessionStatus,
};
