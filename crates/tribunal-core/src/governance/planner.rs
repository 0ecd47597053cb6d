//! `PlannerPool`: rival planners proposing plans concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::agent::{complete_json, prompts, AgentClient, CompletionRequest};
use crate::domain::{
    canonical_key, step_id_for, Complexity, Philosophy, Phase, PlanProposal, PlanningContext,
    ProposalError, QuorumReport, Step,
};
use crate::governance::error::FanOutError;
use crate::governance::fanout::{default_quorum, fan_out, CallOutcome, FanOutPolicy};

/// One planner seat: an id, the stance it argues from, and the agent behind it.
#[derive(Clone)]
pub struct PlannerRegistration {
    pub planner_id: String,
    pub philosophy: Philosophy,
    pub client: Arc<dyn AgentClient>,
}

impl std::fmt::Debug for PlannerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannerRegistration")
            .field("planner_id", &self.planner_id)
            .field("philosophy", &self.philosophy)
            .field("model", &self.client.model_name())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PlannerPoolConfig {
    /// Defaults to `ceil(N / 2)`.
    pub quorum: Option<usize>,
    pub call_timeout: Duration,
    pub grace: Duration,
    pub max_concurrent: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for PlannerPoolConfig {
    fn default() -> Self {
        Self {
            quorum: None,
            call_timeout: Duration::from_secs(60),
            grace: Duration::from_secs(5),
            max_concurrent: 4,
            temperature: Some(0.7),
            max_tokens: Some(4096),
        }
    }
}

/// Proposals that arrived in time plus the fan-out accounting.
#[derive(Debug, Clone)]
pub struct ProposalRound {
    pub proposals: Vec<PlanProposal>,
    pub report: QuorumReport,
}

pub struct PlannerPool {
    planners: Vec<PlannerRegistration>,
    config: PlannerPoolConfig,
}

impl PlannerPool {
    pub fn new(planners: Vec<PlannerRegistration>, config: PlannerPoolConfig) -> Self {
        Self { planners, config }
    }

    pub fn len(&self) -> usize {
        self.planners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planners.is_empty()
    }

    pub fn quorum(&self) -> usize {
        self.config
            .quorum
            .unwrap_or_else(|| default_quorum(self.planners.len()))
    }

    fn policy(&self) -> FanOutPolicy {
        FanOutPolicy {
            quorum: self.quorum(),
            call_timeout: self.config.call_timeout,
            grace: self.config.grace,
            max_concurrent: self.config.max_concurrent,
        }
    }

    /// Ask every planner for a proposal. Returns between `quorum` and `N`
    /// proposals, sorted by planner id.
    #[instrument(skip_all, fields(planners = self.planners.len(), quorum = self.quorum()))]
    pub async fn propose_plans(
        &self,
        requirements: &str,
        context: &PlanningContext,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProposalRound, FanOutError> {
        let rendered = context.render();
        let calls: Vec<_> = self
            .planners
            .iter()
            .map(|planner| {
                (
                    planner.planner_id.clone(),
                    self.ask(planner, requirements, &rendered),
                )
            })
            .collect();

        let out = fan_out(Phase::Planning, &self.policy(), timeout, cancel, calls).await?;
        info!(
            responded = out.report.responded.len(),
            dropped = out.report.dropped.len(),
            cancelled = out.report.cancelled.len(),
            "planning fan-out complete"
        );
        Ok(ProposalRound {
            proposals: out.responses.into_iter().map(|(_, p)| p).collect(),
            report: out.report,
        })
    }

    async fn ask(
        &self,
        planner: &PlannerRegistration,
        requirements: &str,
        context: &str,
    ) -> CallOutcome<PlanProposal> {
        let (system, user) = prompts::planner_prompt(planner.philosophy, requirements, context);
        let request = CompletionRequest::new(user, self.config.call_timeout)
            .with_system(system)
            .with_sampling(self.config.temperature, self.config.max_tokens);
        match complete_json::<RawPlan>(planner.client.as_ref(), request).await {
            Ok(raw) => match proposal_from_raw(&planner.planner_id, planner.philosophy, raw) {
                Ok(proposal) => CallOutcome::Response(proposal),
                Err(e) => CallOutcome::Dropped(format!("invalid proposal: {e}")),
            },
            Err(e) => CallOutcome::Dropped(e.to_string()),
        }
    }
}

/// Planner reply as the agent sends it. Step ids are local labels (strings
/// or numbers) and are replaced by stable ids.
#[derive(Debug, Deserialize)]
pub(crate) struct RawPlan {
    steps: Vec<RawStep>,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    estimated_complexity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    id: Option<serde_json::Value>,
    description: String,
    #[serde(default)]
    depends_on: Vec<serde_json::Value>,
}

fn label(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn proposal_from_raw(
    proposer_id: &str,
    philosophy: Philosophy,
    raw: RawPlan,
) -> Result<PlanProposal, ProposalError> {
    if raw.steps.is_empty() {
        return Err(ProposalError::EmptyPlan {
            proposer_id: proposer_id.to_string(),
        });
    }

    // Local label or canonical description -> stable id.
    let mut resolve: HashMap<String, String> = HashMap::new();
    for (idx, step) in raw.steps.iter().enumerate() {
        if step.description.trim().is_empty() {
            return Err(ProposalError::EmptyDescription);
        }
        let id = step_id_for(&step.description);
        let local = step
            .id
            .as_ref()
            .map(label)
            .unwrap_or_else(|| (idx + 1).to_string());
        resolve.insert(local, id.clone());
        resolve.insert(canonical_key(&step.description), id);
    }

    let mut steps: Vec<Step> = Vec::new();
    for raw_step in &raw.steps {
        let mut step = Step::new(raw_step.description.trim());
        for dep in &raw_step.depends_on {
            let dep_label = label(dep);
            let target = resolve
                .get(&dep_label)
                .or_else(|| resolve.get(&canonical_key(&dep_label)))
                .ok_or_else(|| ProposalError::UnknownDependency {
                    step: step.description.clone(),
                    dependency: dep_label.clone(),
                })?;
            if *target != step.id && !step.depends_on.contains(target) {
                step.depends_on.push(target.clone());
            }
        }
        match steps.iter_mut().find(|s| s.id == step.id) {
            Some(existing) => {
                for dep in step.depends_on {
                    if !existing.depends_on.contains(&dep) {
                        existing.depends_on.push(dep);
                    }
                }
            }
            None => steps.push(step),
        }
    }

    let estimated_complexity = match raw.estimated_complexity.as_deref() {
        None => Complexity::Medium,
        Some(value) => Complexity::parse(value).ok_or_else(|| ProposalError::UnknownComplexity {
            value: value.to_string(),
        })?,
    };

    let acceptance_criteria = raw
        .acceptance_criteria
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    Ok(PlanProposal {
        proposer_id: proposer_id.to_string(),
        philosophy,
        steps,
        acceptance_criteria,
        estimated_complexity,
    })
}
