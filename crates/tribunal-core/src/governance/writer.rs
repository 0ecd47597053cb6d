//! Executor collaborators: `CodeWriter` and `VetoProbe`.

use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::agent::{complete_json, prompts, AgentClient, AgentError, CompletionRequest};
use crate::domain::{ExecutionPlan, FeedbackBundle, FileSet, GeneratedFile, Step};
use crate::governance::error::WriteError;

/// Produces the files for one plan step.
#[async_trait]
pub trait CodeWriter: Send + Sync {
    async fn write(
        &self,
        step: &Step,
        plan: &ExecutionPlan,
        feedback: Option<&FeedbackBundle>,
    ) -> Result<FileSet, WriteError>;
}

#[async_trait]
impl<T: CodeWriter + ?Sized> CodeWriter for Arc<T> {
    async fn write(
        &self,
        step: &Step,
        plan: &ExecutionPlan,
        feedback: Option<&FeedbackBundle>,
    ) -> Result<FileSet, WriteError> {
        (**self).write(step, plan, feedback).await
    }
}

/// Consulted before each step is dispatched. `Some(reason)` stops the run.
#[async_trait]
pub trait VetoProbe: Send + Sync {
    async fn check(&self, step: &Step, plan: &ExecutionPlan) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct RawFiles {
    files: Vec<GeneratedFile>,
}

/// Relative, normalized, and free of `..` segments.
fn is_safe_path(path: &str) -> bool {
    let p = Path::new(path);
    !path.trim().is_empty()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// `CodeWriter` backed by an agent asked for a JSON file list.
pub struct AgentCodeWriter {
    client: Arc<dyn AgentClient>,
    call_timeout: Duration,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl AgentCodeWriter {
    pub fn new(client: Arc<dyn AgentClient>, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
            temperature: Some(0.2),
            max_tokens: None,
        }
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

/// Timeouts, rate limits, malformed output and 5xx are worth retrying.
fn classify(error: AgentError) -> WriteError {
    if error.is_retryable() {
        WriteError::Transient(error.to_string())
    } else {
        WriteError::Persistent(error.to_string())
    }
}

#[async_trait]
impl CodeWriter for AgentCodeWriter {
    async fn write(
        &self,
        step: &Step,
        plan: &ExecutionPlan,
        feedback: Option<&FeedbackBundle>,
    ) -> Result<FileSet, WriteError> {
        let (system, user) = prompts::writer_prompt(step, plan, feedback);
        let request = CompletionRequest::new(user, self.call_timeout)
            .with_system(system)
            .with_sampling(self.temperature, self.max_tokens);
        let raw: RawFiles = complete_json(self.client.as_ref(), request)
            .await
            .map_err(classify)?;

        if let Some(bad) = raw.files.iter().find(|f| !is_safe_path(&f.path)) {
            return Err(WriteError::Persistent(format!(
                "refusing unsafe output path: {}",
                bad.path
            )));
        }
        debug!(step_id = %step.id, files = raw.files.len(), "writer produced files");
        Ok(FileSet {
            step_id: step.id.clone(),
            files: raw.files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_paths_are_detected() {
        assert!(is_safe_path("src/main.rs"));
        assert!(is_safe_path("./README.md"));
        assert!(!is_safe_path("../etc/passwd"));
        assert!(!is_safe_path("/etc/passwd"));
        assert!(!is_safe_path("src/../../x"));
        assert!(!is_safe_path("  "));
    }

    #[test]
    fn agent_errors_are_classified() {
        assert!(classify(AgentError::Timeout { timeout_ms: 5 }).is_transient());
        assert!(classify(AgentError::malformed("bad json")).is_transient());
        assert!(!classify(AgentError::Provider {
            status: Some(400),
            message: "context too long".into()
        })
        .is_transient());
    }
}
