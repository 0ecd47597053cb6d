//! Domain-level error taxonomy.

use crate::domain::state::SessionStatus;

/// Errors produced while validating a single planner proposal.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProposalError {
    #[error("proposal from {proposer_id} contains no steps")]
    EmptyPlan { proposer_id: String },

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("step description must not be empty")]
    EmptyDescription,

    #[error("unknown complexity: {value}")]
    UnknownComplexity { value: String },
}

/// Structural violations of an [`ExecutionPlan`](crate::domain::plan::ExecutionPlan).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("duplicate step id: {step_id}")]
    DuplicateStep { step_id: String },

    #[error("step {step_id} depends on unknown step {dependency}")]
    UnknownDependency { step_id: String, dependency: String },

    #[error("step {step_id} depends on {dependency}, which is not ordered before it")]
    OutOfOrder { step_id: String, dependency: String },
}

/// State machine violations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("session {session_id} is terminal ({status}) and cannot change")]
    Terminal {
        session_id: String,
        status: SessionStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_error_display() {
        let err = PlanError::OutOfOrder {
            step_id: "step-b".to_string(),
            dependency: "step-a".to_string(),
        };
        assert!(err.to_string().contains("not ordered before"));
    }

    #[test]
    fn test_state_error_mentions_status() {
        let err = StateError::Terminal {
            session_id: "s1".to_string(),
            status: SessionStatus::Approved,
        };
        assert!(err.to_string().contains("approved"));
    }
}
