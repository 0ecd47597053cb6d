//! Prompt builders for the three agent roles.
//!
//! Each builder returns `(system_prompt, user_prompt)`. Only the reply
//! schemas are load-bearing: they must match the serde types in
//! `planner`, `writer` and `critic`.

use crate::domain::{Artifact, ExecutionPlan, FeedbackBundle, Philosophy, Specialty, Step};

pub const PLAN_SCHEMA: &str = r#"{
  "steps": [{"id": "s1", "description": "what to build", "depends_on": ["ids of earlier steps"]}],
  "acceptance_criteria": ["observable condition"],
  "estimated_complexity": "low|medium|high"
}"#;

pub const FILES_SCHEMA: &str = r#"{
  "files": [{"path": "relative/path.ext", "content": "full file content"}]
}"#;

pub const REVIEW_SCHEMA: &str = r#"{
  "decision": "approve|reject|needs_revision|conditional_approval",
  "reasoning": "overall assessment",
  "issues": [{"severity": "critical|high|medium|low|info", "description": "...", "location": "file:line", "recommendation": "..."}]
}"#;

/// Upper bound on characters per file shown to critics.
pub const REVIEW_FILE_CHARS: usize = 6_000;

pub fn planner_prompt(
    philosophy: Philosophy,
    requirements: &str,
    context: &str,
) -> (String, String) {
    let system = format!(
        "You are a {philosophy} planning agent in a panel of rival planners. {} \
         Break the requirement into concrete implementation steps. \
         Reply with JSON only, matching:\n{PLAN_SCHEMA}",
        philosophy.brief()
    );
    let mut user = format!("Requirement:\n{requirements}\n");
    if !context.is_empty() {
        user.push('\n');
        user.push_str(context);
    }
    (system, user)
}

pub fn writer_prompt(
    step: &Step,
    plan: &ExecutionPlan,
    feedback: Option<&FeedbackBundle>,
) -> (String, String) {
    let system = format!(
        "You are the implementation agent. Write the files for exactly one plan step. \
         Reply with JSON only, matching:\n{FILES_SCHEMA}"
    );
    let mut user = format!(
        "Plan:\n{}\nCurrent step [{}]: {}\n",
        plan.outline(),
        step.id,
        step.description
    );
    if let Some(bundle) = feedback {
        user.push('\n');
        user.push_str(&bundle.render());
    }
    (system, user)
}

pub fn critic_prompt(
    specialty: Specialty,
    requirements: &str,
    plan: &ExecutionPlan,
    artifact: &Artifact,
) -> (String, String) {
    let system = format!(
        "You are a {specialty} critic in a panel of rival reviewers. \
         Review the code only for {}. Other critics cover other concerns. \
         Reply with JSON only, matching:\n{REVIEW_SCHEMA}",
        specialty.focus()
    );
    let user = format!(
        "Requirement:\n{requirements}\n\nPlan:\n{}\nCode:\n{}",
        plan.outline(),
        artifact.render(REVIEW_FILE_CHARS)
    );
    (system, user)
}
