//! `GovernanceConfig`: TOML-backed settings for pools, executor and loop.
//!
//! Every section and field is optional; missing values fall back to
//! [`Default`]. Call [`GovernanceConfig::validate`] before building anything
//! from a config.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentClient, HttpAgentClient};
use crate::domain::{Philosophy, Specialty};
use crate::governance::critic::{CriticPoolConfig, CriticRegistration};
use crate::governance::executor::ExecutorConfig;
use crate::governance::planner::{PlannerPoolConfig, PlannerRegistration};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSection {
    pub philosophies: Vec<Philosophy>,
    pub quorum: Option<usize>,
    pub call_timeout_ms: u64,
    pub phase_timeout_ms: u64,
    pub grace_ms: u64,
    pub max_concurrent: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            philosophies: Philosophy::all().to_vec(),
            quorum: None,
            call_timeout_ms: 60_000,
            phase_timeout_ms: 120_000,
            grace_ms: 5_000,
            max_concurrent: 4,
            temperature: Some(0.7),
            max_tokens: Some(4096),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticEntry {
    pub critic_id: String,
    pub specialty: Specialty,
    /// Defaults from the specialty when absent.
    #[serde(default)]
    pub has_veto: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticSection {
    pub critics: Vec<CriticEntry>,
    pub quorum: Option<usize>,
    pub call_timeout_ms: u64,
    pub phase_timeout_ms: u64,
    pub grace_ms: u64,
    pub max_concurrent: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub static_scan: bool,
}

impl Default for CriticSection {
    fn default() -> Self {
        Self {
            critics: Specialty::all()
                .into_iter()
                .map(|specialty| CriticEntry {
                    critic_id: format!("{specialty}-critic"),
                    specialty,
                    has_veto: None,
                })
                .collect(),
            quorum: None,
            call_timeout_ms: 60_000,
            phase_timeout_ms: 120_000,
            grace_ms: 5_000,
            max_concurrent: 5,
            temperature: Some(0.2),
            max_tokens: Some(2048),
            static_scan: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub max_workers: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub phase_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_retries: 2,
            backoff_base_ms: 500,
            phase_timeout_ms: 600_000,
            call_timeout_ms: 120_000,
            temperature: Some(0.2),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_iterations: u32,
    pub checkpoint_dir: PathBuf,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            checkpoint_dir: PathBuf::from(".tribunal/checkpoints"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub endpoint: Option<String>,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_ms: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub planner: PlannerSection,
    pub critic: CriticSection,
    pub executor: ExecutorSection,
    pub orchestrator: OrchestratorSection,
    pub agent: AgentSection,
}

/// Per-phase deadlines used by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub planning: Duration,
    pub execution: Duration,
    pub review: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        GovernanceConfig::default().phase_timeouts()
    }
}

impl GovernanceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: GovernanceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.planner.philosophies.is_empty() {
            return invalid("planner.philosophies must not be empty".into());
        }
        if let Some(q) = self.planner.quorum {
            if q == 0 || q > self.planner.philosophies.len() {
                return invalid(format!(
                    "planner.quorum {q} must be between 1 and {} registered planners",
                    self.planner.philosophies.len()
                ));
            }
        }
        if self.critic.critics.is_empty() {
            return invalid("critic.critics must not be empty".into());
        }
        if let Some(q) = self.critic.quorum {
            if q == 0 || q > self.critic.critics.len() {
                return invalid(format!(
                    "critic.quorum {q} must be between 1 and {} registered critics",
                    self.critic.critics.len()
                ));
            }
        }
        let mut seen = HashSet::new();
        for entry in &self.critic.critics {
            if entry.critic_id.trim().is_empty() {
                return invalid("critic ids must not be empty".into());
            }
            if !seen.insert(entry.critic_id.as_str()) {
                return invalid(format!("duplicate critic id: {}", entry.critic_id));
            }
        }
        if self.planner.max_concurrent == 0 || self.critic.max_concurrent == 0 {
            return invalid("max_concurrent must be at least 1".into());
        }
        if self.executor.max_workers == 0 {
            return invalid("executor.max_workers must be at least 1".into());
        }
        if self.orchestrator.max_iterations == 0 {
            return invalid("orchestrator.max_iterations must be at least 1".into());
        }
        let timeouts = [
            ("planner.call_timeout_ms", self.planner.call_timeout_ms),
            ("planner.phase_timeout_ms", self.planner.phase_timeout_ms),
            ("critic.call_timeout_ms", self.critic.call_timeout_ms),
            ("critic.phase_timeout_ms", self.critic.phase_timeout_ms),
            ("executor.phase_timeout_ms", self.executor.phase_timeout_ms),
            ("executor.call_timeout_ms", self.executor.call_timeout_ms),
            ("agent.request_timeout_ms", self.agent.request_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return invalid(format!("{name} must be greater than zero"));
        }
        Ok(())
    }

    pub fn phase_timeouts(&self) -> PhaseTimeouts {
        PhaseTimeouts {
            planning: Duration::from_millis(self.planner.phase_timeout_ms),
            execution: Duration::from_millis(self.executor.phase_timeout_ms),
            review: Duration::from_millis(self.critic.phase_timeout_ms),
        }
    }

    pub fn planner_pool_config(&self) -> PlannerPoolConfig {
        PlannerPoolConfig {
            quorum: self.planner.quorum,
            call_timeout: Duration::from_millis(self.planner.call_timeout_ms),
            grace: Duration::from_millis(self.planner.grace_ms),
            max_concurrent: self.planner.max_concurrent,
            temperature: self.planner.temperature,
            max_tokens: self.planner.max_tokens,
        }
    }

    pub fn critic_pool_config(&self) -> CriticPoolConfig {
        CriticPoolConfig {
            quorum: self.critic.quorum,
            call_timeout: Duration::from_millis(self.critic.call_timeout_ms),
            grace: Duration::from_millis(self.critic.grace_ms),
            max_concurrent: self.critic.max_concurrent,
            temperature: self.critic.temperature,
            max_tokens: self.critic.max_tokens,
            static_scan: self.critic.static_scan,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_workers: self.executor.max_workers,
            max_retries: self.executor.max_retries,
            backoff_base: Duration::from_millis(self.executor.backoff_base_ms),
        }
    }

    /// One planner per configured philosophy; repeated philosophies get a
    /// numeric suffix.
    pub fn planner_registrations(&self, client: Arc<dyn AgentClient>) -> Vec<PlannerRegistration> {
        let mut out: Vec<PlannerRegistration> = Vec::new();
        for philosophy in &self.planner.philosophies {
            let base = format!("{philosophy}-planner");
            let taken = out
                .iter()
                .filter(|p| p.planner_id == base || p.planner_id.starts_with(&format!("{base}-")))
                .count();
            let planner_id = if taken == 0 {
                base
            } else {
                format!("{base}-{}", taken + 1)
            };
            out.push(PlannerRegistration {
                planner_id,
                philosophy: *philosophy,
                client: Arc::clone(&client),
            });
        }
        out
    }

    pub fn critic_registrations(&self, client: Arc<dyn AgentClient>) -> Vec<CriticRegistration> {
        self.critic
            .critics
            .iter()
            .map(|entry| {
                let registration =
                    CriticRegistration::new(&entry.critic_id, entry.specialty, Arc::clone(&client));
                match entry.has_veto {
                    Some(flag) => registration.with_veto(flag),
                    None => registration,
                }
            })
            .collect()
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.orchestrator.checkpoint_dir
    }

    /// HTTP client for the `[agent]` section. `api_key` overrides the
    /// variable named by `agent.api_key_env`.
    pub fn http_client(&self, api_key: Option<String>) -> HttpAgentClient {
        let api_key = api_key.or_else(|| std::env::var(&self.agent.api_key_env).ok());
        HttpAgentClient::new(self.agent.endpoint.clone(), &self.agent.model, api_key)
            .with_request_timeout(Duration::from_millis(self.agent.request_timeout_ms))
    }
}
