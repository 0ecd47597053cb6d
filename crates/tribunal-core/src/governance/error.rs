//! Error types for the governance loop, one enum per layer.

use tribunal_state::StorageError;

use crate::config::ConfigError;
use crate::domain::{OrchestrationState, Phase, PlanError, QuorumReport, StateError};

/// Errors produced by a planner or critic fan-out.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FanOutError {
    #[error("quorum not reached: {report}")]
    QuorumNotReached { report: QuorumReport },
}

impl FanOutError {
    pub fn report(&self) -> &QuorumReport {
        match self {
            FanOutError::QuorumNotReached { report } => report,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    #[error("no proposals to synthesize")]
    NoProposals,
}

/// Step-level write failures. Absorbed by the executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("transient write failure: {0}")]
    Transient(String),

    #[error("persistent write failure: {0}")]
    Persistent(String),
}

impl WriteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteError::Transient(_))
    }
}

/// Phase-fatal executor errors. Step failures, cancellation and vetoes are
/// reported on the artifact instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),
}

/// The failure that stopped a phase.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error(transparent)]
    FanOut(#[from] FanOutError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("checkpoint write failed: {0}")]
    Checkpoint(#[from] StorageError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("iteration draft has no {missing}")]
    IncompleteDraft { missing: &'static str },

    #[error("session cancelled")]
    Cancelled,
}

/// Errors produced by the orchestrator and the service API.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Carries the last good state so callers can inspect or resume it.
    #[error("{phase} phase failed: {source}")]
    PhaseFailed {
        phase: Phase,
        #[source]
        source: PhaseError,
        state: Box<OrchestrationState>,
    },

    #[error(transparent)]
    TerminalState(#[from] StateError),

    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("session {session_id} task aborted: {reason}")]
    Aborted { session_id: String, reason: String },
}

impl OrchestrationError {
    /// The state attached to a phase failure, if any.
    pub fn state(&self) -> Option<&OrchestrationState> {
        match self {
            OrchestrationError::PhaseFailed { state, .. } => Some(state),
            _ => None,
        }
    }
}
