//! Agent boundary: the text-completion capability every role is built on.
//!
//! # Module layout
//!
//! - [`AgentClient`]: async completion trait, one implementation per provider
//! - [`http`]: `HttpAgentClient` for OpenAI-compatible endpoints
//! - [`complete_json`] / [`parse_json_reply`]: typed replies; every parse
//!   failure becomes [`AgentError::MalformedResponse`]
//! - [`prompts`]: planner, writer and critic prompt builders

pub mod http;
pub mod prompts;

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;

pub use http::HttpAgentClient;

static FENCED_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("FENCED_JSON_RE regex should compile")
});

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Ask the provider for a JSON object reply.
    pub json_mode: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            json_mode: false,
            max_tokens: None,
            temperature: None,
            timeout,
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

/// Errors at the agent edge. All of them are transient from the pools'
/// point of view: the agent is dropped from the fan-out, not the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("agent call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("agent rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("malformed agent response: {reason}")]
    MalformedResponse { reason: String },

    #[error("provider error{}: {message}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Provider { status: Option<u16>, message: String },
}

impl AgentError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        AgentError::MalformedResponse {
            reason: reason.into(),
        }
    }

    /// Worth retrying the same call: timeouts, rate limits, malformed output
    /// and 5xx or transport failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Timeout { .. }
            | AgentError::RateLimited { .. }
            | AgentError::MalformedResponse { .. } => true,
            AgentError::Provider { status, .. } => status.map_or(true, |s| s >= 500),
        }
    }
}

/// Async text completion.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AgentError>;

    /// Provider/model label used in logs.
    fn model_name(&self) -> &str;
}

#[async_trait]
impl<T: AgentClient + ?Sized> AgentClient for std::sync::Arc<T> {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AgentError> {
        (**self).complete(request).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Complete with `json_mode` set and parse the reply into `T`.
///
/// The request timeout is enforced here as well as in the provider, so a
/// client that ignores it still cannot stall the caller.
pub async fn complete_json<T: DeserializeOwned>(
    client: &dyn AgentClient,
    request: CompletionRequest,
) -> Result<T, AgentError> {
    let timeout = request.timeout;
    let request = CompletionRequest {
        json_mode: true,
        ..request
    };
    let text = match tokio::time::timeout(timeout, client.complete(request)).await {
        Ok(reply) => reply?,
        Err(_) => {
            return Err(AgentError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    };
    parse_json_reply(&text)
}

/// Parse a JSON reply that may be wrapped in prose or a fenced code block.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, AgentError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AgentError::malformed("empty reply"));
    }
    let direct = serde_json::from_str::<T>(trimmed);
    let first_error = match direct {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    for candidate in json_candidates(trimmed) {
        if let Ok(value) = serde_json::from_str::<T>(candidate) {
            return Ok(value);
        }
    }
    Err(AgentError::malformed(first_error.to_string()))
}

fn json_candidates(text: &str) -> Vec<&str> {
    let mut out: Vec<&str> = FENCED_JSON_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
        .collect();
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            out.push(&text[start..=end]);
        }
    }
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            out.push(&text[start..=end]);
        }
    }
    out
}
