//! Governance loop: rival planners, synthesis, execution, review, consensus.
//!
//! # Module layout
//!
//! - [`fanout`]: quorum fan-out harness shared by both agent pools
//! - [`planner`]: `PlannerPool`, one planner per philosophy
//! - [`synthesis`]: `PlanSynthesizer` and the pairwise plan debate
//! - [`writer`]: `CodeWriter` and `VetoProbe` seams, `AgentCodeWriter`
//! - [`executor`]: dependency-ordered step execution with retries
//! - [`critic`]: `CriticPool` with static veto authority
//! - [`scan`]: pattern scan merged into security reviews
//! - [`consensus`]: pure verdict aggregation
//! - [`orchestrator`]: the checkpointed state machine driving it all
//! - [`error`]: one error enum per layer

pub mod consensus;
pub mod critic;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod orchestrator;
pub mod planner;
pub mod scan;
pub mod synthesis;
pub mod writer;

pub use consensus::{decide, evaluate, ConsensusOutcome, APPROVE_THRESHOLD};
pub use critic::{CriticPool, CriticPoolConfig, CriticRegistration, ReviewRound};
pub use error::{
    ExecutorError, FanOutError, OrchestrationError, PhaseError, SynthesisError, WriteError,
};
pub use executor::{Execution, Executor, ExecutorConfig};
pub use fanout::{default_quorum, FanOutPolicy};
pub use orchestrator::{GovernanceOrchestrator, OrchestrationResult, DEFAULT_MAX_ITERATIONS};
pub use planner::{PlannerPool, PlannerPoolConfig, PlannerRegistration, ProposalRound};
pub use synthesis::{compare_plans, debate, PlanSynthesizer, Synthesis, MERGE_THRESHOLD};
pub use writer::{AgentCodeWriter, CodeWriter, VetoProbe};
