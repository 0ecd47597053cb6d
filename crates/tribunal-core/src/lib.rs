//! Tribunal Core Library
//!
//! Governance orchestrator for AI-generated code: rival planners propose,
//! a synthesizer merges, an executor builds, and a critic panel with static
//! veto authority decides whether the result ships.

pub mod agent;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod governance;
pub mod metrics;
pub mod obs;
pub mod service;
pub mod telemetry;

pub use agent::{complete_json, AgentClient, AgentError, CompletionRequest, HttpAgentClient};

pub use config::{ConfigError, GovernanceConfig, PhaseTimeouts};

pub use domain::{
    Artifact, Complexity, CriticReview, ExecutionPlan, FeedbackBundle, FileSet, GeneratedFile,
    Issue, IterationRecord, NextStep, OrchestrationState, Phase, Philosophy, PlanComparison,
    PlanProposal, PlanningContext, QuorumReport, SessionStatus, Severity, Specialty, Step,
    Verdict,
};

pub use governance::{
    decide, evaluate, AgentCodeWriter, CodeWriter, CriticPool, CriticPoolConfig,
    CriticRegistration, Executor, ExecutorConfig, GovernanceOrchestrator, OrchestrationError,
    OrchestrationResult, PlanSynthesizer, PlannerPool, PlannerPoolConfig, PlannerRegistration,
    VetoProbe, WriteError,
};

pub use metrics::SessionMetrics;
pub use service::{DebateEntry, GovernanceService, SessionId};
pub use telemetry::init_tracing;

pub use tribunal_state::{CheckpointStore, FsCheckpointStore};
