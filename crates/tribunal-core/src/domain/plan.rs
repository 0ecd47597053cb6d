//! Plan vocabulary: `Philosophy`, `Complexity`, `Step`, `PlanProposal`,
//! `ExecutionPlan`, `PlanComparison`.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::domain::error::PlanError;

/// Risk posture a planner is asked to adopt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Philosophy {
    Conservative,
    Innovative,
    Pragmatic,
}

impl Philosophy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Philosophy::Conservative => "conservative",
            Philosophy::Innovative => "innovative",
            Philosophy::Pragmatic => "pragmatic",
        }
    }

    /// One-sentence brief handed to the planner as its stance.
    pub fn brief(&self) -> &'static str {
        match self {
            Philosophy::Conservative => {
                "Prefer proven, low-risk approaches and small incremental steps."
            }
            Philosophy::Innovative => {
                "Favour modern techniques and bold simplifications when they pay off."
            }
            Philosophy::Pragmatic => {
                "Balance delivery speed against risk; ship the simplest thing that works."
            }
        }
    }

    pub fn all() -> [Philosophy; 3] {
        [
            Philosophy::Conservative,
            Philosophy::Innovative,
            Philosophy::Pragmatic,
        ]
    }
}

impl std::fmt::Display for Philosophy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse effort estimate attached to proposals and plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Lenient parse of agent-supplied text (`"LOW"`, `" medium "`, `"moderate"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "simple" | "small" => Some(Complexity::Low),
            "medium" | "moderate" | "mid" => Some(Complexity::Medium),
            "high" | "complex" | "large" => Some(Complexity::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Normalize free text to its case- and whitespace-insensitive join key.
///
/// Trailing sentence punctuation is ignored so `"Add tests."` and
/// `"add   tests"` match.
pub fn canonical_key(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(['.', '!', ';', ':', ','])
        .trim_end()
        .to_string()
}

/// Stable step id: `step-` followed by the first 16 hex chars of the
/// SHA-256 of the canonical key.
pub fn step_id_for(description: &str) -> String {
    let digest = hex::encode(sha2::Sha256::digest(canonical_key(description).as_bytes()));
    format!("step-{}", &digest[..16])
}

/// One unit of work inside a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Step {
    /// Build a step whose id is derived from its description.
    pub fn new(description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            id: step_id_for(&description),
            description,
            depends_on: Vec::new(),
        }
    }

    pub fn after(mut self, dependency: &Step) -> Self {
        if !self.depends_on.contains(&dependency.id) {
            self.depends_on.push(dependency.id.clone());
        }
        self
    }

    pub fn canonical_key(&self) -> String {
        canonical_key(&self.description)
    }
}

/// A rival planner's candidate plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProposal {
    pub proposer_id: String,
    pub philosophy: Philosophy,
    pub steps: Vec<Step>,
    pub acceptance_criteria: Vec<String>,
    pub estimated_complexity: Complexity,
}

impl PlanProposal {
    /// Step ids in proposal order.
    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id.as_str())
    }

    pub fn step_id_set(&self) -> BTreeSet<String> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }
}

/// The single canonical plan the executor runs for one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Content digest over steps, criteria and complexity.
    pub plan_id: String,
    /// Topologically ordered: every dependency precedes its dependents.
    pub steps: Vec<Step>,
    pub acceptance_criteria: Vec<String>,
    pub source_proposal_ids: Vec<String>,
    pub estimated_complexity: Complexity,
}

#[derive(Serialize)]
struct PlanDigestInput<'a> {
    steps: &'a [Step],
    acceptance_criteria: &'a [String],
    estimated_complexity: Complexity,
}

impl ExecutionPlan {
    /// Assemble a plan and compute its content-addressed id.
    pub fn new(
        steps: Vec<Step>,
        acceptance_criteria: Vec<String>,
        mut source_proposal_ids: Vec<String>,
        estimated_complexity: Complexity,
    ) -> Self {
        source_proposal_ids.sort();
        source_proposal_ids.dedup();
        let plan_id = Self::digest(&steps, &acceptance_criteria, estimated_complexity);
        Self {
            plan_id,
            steps,
            acceptance_criteria,
            source_proposal_ids,
            estimated_complexity,
        }
    }

    fn digest(steps: &[Step], criteria: &[String], complexity: Complexity) -> String {
        let input = PlanDigestInput {
            steps,
            acceptance_criteria: criteria,
            estimated_complexity: complexity,
        };
        // Serializing plain structs of strings cannot fail.
        let bytes = serde_json::to_vec(&input).unwrap_or_default();
        let digest = hex::encode(sha2::Sha256::digest(&bytes));
        format!("plan-{}", &digest[..16])
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Check the plan invariants: non-empty, unique ids, known dependencies,
    /// and every dependency ordered before its dependent (which rules out
    /// cycles).
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        let mut position: HashMap<&str, usize> = HashMap::new();
        for (idx, step) in self.steps.iter().enumerate() {
            if position.insert(step.id.as_str(), idx).is_some() {
                return Err(PlanError::DuplicateStep {
                    step_id: step.id.clone(),
                });
            }
        }
        for (idx, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                match position.get(dep.as_str()) {
                    None => {
                        return Err(PlanError::UnknownDependency {
                            step_id: step.id.clone(),
                            dependency: dep.clone(),
                        })
                    }
                    Some(&dep_idx) if dep_idx >= idx => {
                        return Err(PlanError::OutOfOrder {
                            step_id: step.id.clone(),
                            dependency: dep.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Short textual summary handed to writers and critics.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for (idx, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("{}. [{}] {}\n", idx + 1, step.id, step.description));
        }
        if !self.acceptance_criteria.is_empty() {
            out.push_str("Acceptance criteria:\n");
            for criterion in &self.acceptance_criteria {
                out.push_str(&format!("- {criterion}\n"));
            }
        }
        out
    }
}

/// A dependency edge dropped by the synthesizer to break a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisConflict {
    /// The step that declared the dependency.
    pub step_id: String,
    pub dropped_dependency: String,
    /// How many proposals declared this edge.
    pub occurrences: usize,
    /// Step ids still stuck on a cycle when the edge was chosen.
    pub cycle: Vec<String>,
}

/// What the debate log suggests doing with a pair of proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Merge,
    Arbitrate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityConflict {
    pub a: Complexity,
    pub b: Complexity,
}

/// Pairwise comparison of two proposals, recorded in the debate log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanComparison {
    pub proposer_a: String,
    pub proposer_b: String,
    /// Jaccard similarity over step ids, in `[0, 1]`.
    pub agreement_score: f64,
    pub shared_steps: Vec<String>,
    pub only_in_a: Vec<String>,
    pub only_in_b: Vec<String>,
    pub complexity_conflict: Option<ComplexityConflict>,
    pub recommendation: Recommendation,
}
