//! `HttpAgentClient`: OpenAI-compatible chat-completions over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::{AgentClient, AgentError, CompletionRequest};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct HttpAgentClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    /// Upper bound applied on top of each request's own timeout.
    request_timeout: Option<Duration>,
    http_client: reqwest::Client,
}

impl HttpAgentClient {
    pub fn new(endpoint: Option<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.into(),
            api_key,
            request_timeout: None,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn effective_timeout(&self, request: &CompletionRequest) -> Duration {
        self.request_timeout
            .map_or(request.timeout, |cap| cap.min(request.timeout))
    }

    fn build_body<'a>(&'a self, request: &CompletionRequest) -> ChatRequest<'a> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });
        ChatRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }
}

fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000)
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, AgentError> {
        let url = format!("{}/v1/chat/completions", self.endpoint);
        let body = self.build_body(&request);
        let timeout = self.effective_timeout(&request);

        let mut http_req = self
            .http_client
            .post(&url)
            .timeout(timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        debug!(model = %self.model, json_mode = request.json_mode, "sending completion request");
        let response = http_req.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                AgentError::Provider {
                    status: e.status().map(|s| s.as_u16()),
                    message: format!("request failed: {e}"),
                }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AgentError::RateLimited {
                retry_after_ms: retry_after_ms(response.headers()),
            });
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider {
                status: Some(status.as_u16()),
                message: body_text,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::malformed(format!("unreadable completion body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AgentError::malformed("no choices in completion response"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
