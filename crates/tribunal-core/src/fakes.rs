//! Scripted fakes for agents, writers and veto probes (testing only)

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::{AgentClient, AgentError, CompletionRequest};
use crate::domain::{ExecutionPlan, FeedbackBundle, FileSet, GeneratedFile, Step};
use crate::governance::error::WriteError;
use crate::governance::writer::{CodeWriter, VetoProbe};

/// One scripted agent reply, optionally delayed.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub delay: Duration,
    pub result: Result<String, AgentError>,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(text.into()),
        }
    }

    pub fn error(error: AgentError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Agent client that plays back a queue of replies. The last reply repeats
/// once the queue is drained; with no replies at all every call fails with a
/// provider error.
#[derive(Debug, Default)]
pub struct ScriptedAgentClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    last: Mutex<Option<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
}

impl ScriptedAgentClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that always answers with `text`.
    pub fn replying(text: impl Into<String>) -> Self {
        Self::new().then(ScriptedReply::text(text))
    }

    pub fn then(self, reply: ScriptedReply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.then(ScriptedReply::text(text))
    }

    pub fn then_error(self, error: AgentError) -> Self {
        self.then(ScriptedReply::error(error))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self) -> ScriptedReply {
        let next = self.replies.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last.clone().unwrap_or_else(|| {
                ScriptedReply::error(AgentError::Provider {
                    status: Some(400),
                    message: "no scripted reply".to_string(),
                })
            }),
        }
    }
}

#[async_trait]
impl AgentClient for ScriptedAgentClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let reply = self.next_reply();
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Planner reply where every step depends on the one before it.
pub fn plan_json(steps: &[&str], complexity: &str) -> String {
    let steps: Vec<_> = steps
        .iter()
        .enumerate()
        .map(|(idx, description)| {
            let depends_on: Vec<String> = if idx == 0 {
                Vec::new()
            } else {
                vec![format!("s{idx}")]
            };
            json!({
                "id": format!("s{}", idx + 1),
                "description": description,
                "depends_on": depends_on,
            })
        })
        .collect();
    json!({
        "steps": steps,
        "acceptance_criteria": ["All tests pass"],
        "estimated_complexity": complexity,
    })
    .to_string()
}

/// Critic reply with `(severity, description)` issues.
pub fn review_json(decision: &str, issues: &[(&str, &str)]) -> String {
    let issues: Vec<_> = issues
        .iter()
        .map(|(severity, description)| json!({"severity": severity, "description": description}))
        .collect();
    json!({
        "decision": decision,
        "reasoning": format!("scripted {decision}"),
        "issues": issues,
    })
    .to_string()
}

#[derive(Debug, Clone)]
enum WriteScript {
    Transient { remaining: u32 },
    Persistent,
    Files(Vec<GeneratedFile>),
}

/// Code writer with per-step behaviour. Unscripted steps succeed with one
/// file named after the step id.
#[derive(Debug, Default)]
pub struct ScriptedCodeWriter {
    scripts: Mutex<HashMap<String, WriteScript>>,
    delays: Mutex<HashMap<String, Duration>>,
    default_delay: Mutex<Duration>,
    attempts: Mutex<HashMap<String, u32>>,
    completed: Mutex<Vec<String>>,
    feedback_seen: Mutex<Vec<Option<u32>>>,
}

impl ScriptedCodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `step_id` transiently `times` times, then succeed.
    pub fn fail_transient(self, step_id: impl Into<String>, times: u32) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(step_id.into(), WriteScript::Transient { remaining: times });
        self
    }

    pub fn fail_persistent(self, step_id: impl Into<String>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(step_id.into(), WriteScript::Persistent);
        self
    }

    pub fn with_files(self, step_id: impl Into<String>, files: Vec<GeneratedFile>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(step_id.into(), WriteScript::Files(files));
        self
    }

    pub fn delay(self, step_id: impl Into<String>, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(step_id.into(), delay);
        self
    }

    pub fn delay_all(self, delay: Duration) -> Self {
        *self.default_delay.lock().unwrap() = delay;
        self
    }

    pub fn attempts(&self, step_id: &str) -> u32 {
        self.attempts.lock().unwrap().get(step_id).copied().unwrap_or(0)
    }

    /// Step ids that produced files, in completion order.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    /// The feedback iteration passed with each call, in call order.
    pub fn feedback_seen(&self) -> Vec<Option<u32>> {
        self.feedback_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeWriter for ScriptedCodeWriter {
    async fn write(
        &self,
        step: &Step,
        _plan: &ExecutionPlan,
        feedback: Option<&FeedbackBundle>,
    ) -> Result<FileSet, WriteError> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(step.id.clone())
            .or_default() += 1;
        self.feedback_seen
            .lock()
            .unwrap()
            .push(feedback.map(|f| f.iteration));

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&step.id)
            .copied()
            .unwrap_or(*self.default_delay.lock().unwrap());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let script = self.scripts.lock().unwrap().get_mut(&step.id).map(|s| {
            let current = s.clone();
            if let WriteScript::Transient { remaining } = s {
                *remaining = remaining.saturating_sub(1);
            }
            current
        });
        let files = match script {
            Some(WriteScript::Transient { remaining }) if remaining > 0 => {
                return Err(WriteError::Transient(format!("{} flaked", step.id)));
            }
            Some(WriteScript::Persistent) => {
                return Err(WriteError::Persistent(format!("{} cannot be written", step.id)));
            }
            Some(WriteScript::Files(files)) => files,
            _ => vec![GeneratedFile {
                path: format!("{}.rs", step.id),
                content: format!("// {}\n", step.description),
            }],
        };
        self.completed.lock().unwrap().push(step.id.clone());
        Ok(FileSet {
            step_id: step.id.clone(),
            files,
        })
    }
}

/// Veto probe that fires on a given step, or after a number of checks.
#[derive(Debug, Default)]
pub struct ScriptedVetoProbe {
    on_step: Option<(String, String)>,
    after_checks: Option<(usize, String)>,
    checks: AtomicUsize,
}

impl ScriptedVetoProbe {
    pub fn on_step(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            on_step: Some((step_id.into(), reason.into())),
            ..Self::default()
        }
    }

    /// Allow the first `n` dispatches, veto the next.
    pub fn after_checks(n: usize, reason: impl Into<String>) -> Self {
        Self {
            after_checks: Some((n, reason.into())),
            ..Self::default()
        }
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VetoProbe for ScriptedVetoProbe {
    async fn check(&self, step: &Step, _plan: &ExecutionPlan) -> Option<String> {
        let seen = self.checks.fetch_add(1, Ordering::SeqCst);
        if let Some((id, reason)) = &self.on_step {
            if *id == step.id {
                return Some(reason.clone());
            }
        }
        match &self.after_checks {
            Some((n, reason)) if seen >= *n => Some(reason.clone()),
            _ => None,
        }
    }
}
