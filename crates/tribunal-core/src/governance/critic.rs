//! `CriticPool`: rival reviewers judging an artifact concurrently.
//!
//! Veto authority is a property of the registration, never of the critic's
//! reply. A critic that replies with something unparseable is kept in the
//! decision as an implicit `NEEDS_REVISION`; a critic that times out or is
//! rate limited is dropped from the fan-out.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::agent::{complete_json, prompts, AgentClient, AgentError, CompletionRequest};
use crate::domain::{
    Artifact, CriticReview, ExecutionPlan, Issue, Phase, QuorumReport, Severity, Specialty,
    Verdict,
};
use crate::governance::error::FanOutError;
use crate::governance::fanout::{default_quorum, fan_out, CallOutcome, FanOutPolicy};
use crate::governance::scan;

#[derive(Clone)]
pub struct CriticRegistration {
    pub critic_id: String,
    pub specialty: Specialty,
    pub has_veto: bool,
    pub client: Arc<dyn AgentClient>,
}

impl CriticRegistration {
    /// Veto authority defaults from the specialty (correctness and security).
    pub fn new(
        critic_id: impl Into<String>,
        specialty: Specialty,
        client: Arc<dyn AgentClient>,
    ) -> Self {
        Self {
            critic_id: critic_id.into(),
            specialty,
            has_veto: specialty.default_veto(),
            client,
        }
    }

    pub fn with_veto(mut self, has_veto: bool) -> Self {
        self.has_veto = has_veto;
        self
    }
}

impl std::fmt::Debug for CriticRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CriticRegistration")
            .field("critic_id", &self.critic_id)
            .field("specialty", &self.specialty)
            .field("has_veto", &self.has_veto)
            .field("model", &self.client.model_name())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CriticPoolConfig {
    /// Defaults to `ceil(M / 2)`.
    pub quorum: Option<usize>,
    pub call_timeout: Duration,
    pub grace: Duration,
    pub max_concurrent: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Merge pattern-scan findings into security reviews.
    pub static_scan: bool,
}

impl Default for CriticPoolConfig {
    fn default() -> Self {
        Self {
            quorum: None,
            call_timeout: Duration::from_secs(60),
            grace: Duration::from_secs(5),
            max_concurrent: 5,
            temperature: Some(0.2),
            max_tokens: Some(2048),
            static_scan: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReviewRound {
    pub reviews: Vec<CriticReview>,
    pub report: QuorumReport,
}

pub struct CriticPool {
    critics: Vec<CriticRegistration>,
    config: CriticPoolConfig,
}

impl CriticPool {
    pub fn new(critics: Vec<CriticRegistration>, config: CriticPoolConfig) -> Self {
        Self { critics, config }
    }

    pub fn len(&self) -> usize {
        self.critics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.critics.is_empty()
    }

    pub fn quorum(&self) -> usize {
        self.config
            .quorum
            .unwrap_or_else(|| default_quorum(self.critics.len()))
    }

    pub fn critics(&self) -> &[CriticRegistration] {
        &self.critics
    }

    #[instrument(skip_all, fields(critics = self.critics.len(), plan_id = %plan.plan_id))]
    pub async fn review(
        &self,
        requirements: &str,
        artifact: &Artifact,
        plan: &ExecutionPlan,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReviewRound, FanOutError> {
        let policy = FanOutPolicy {
            quorum: self.quorum(),
            call_timeout: self.config.call_timeout,
            grace: self.config.grace,
            max_concurrent: self.config.max_concurrent,
        };
        let findings = if self.config.static_scan {
            scan::scan_artifact(artifact)
        } else {
            Vec::new()
        };
        let calls: Vec<_> = self
            .critics
            .iter()
            .map(|critic| {
                (
                    critic.critic_id.clone(),
                    self.ask(critic, requirements, artifact, plan, &findings),
                )
            })
            .collect();

        let out = fan_out(Phase::Reviewing, &policy, timeout, cancel, calls).await?;
        info!(
            responded = out.report.responded.len(),
            dropped = out.report.dropped.len(),
            cancelled = out.report.cancelled.len(),
            "review fan-out complete"
        );
        Ok(ReviewRound {
            reviews: out.responses.into_iter().map(|(_, r)| r).collect(),
            report: out.report,
        })
    }

    async fn ask(
        &self,
        critic: &CriticRegistration,
        requirements: &str,
        artifact: &Artifact,
        plan: &ExecutionPlan,
        findings: &[Issue],
    ) -> CallOutcome<CriticReview> {
        let (system, user) = prompts::critic_prompt(critic.specialty, requirements, plan, artifact);
        let request = CompletionRequest::new(user, self.config.call_timeout)
            .with_system(system)
            .with_sampling(self.config.temperature, self.config.max_tokens);
        let mut review = match complete_json::<RawReview>(critic.client.as_ref(), request).await {
            Ok(raw) => review_from_raw(critic, raw),
            Err(AgentError::MalformedResponse { reason }) => malformed_review(critic, &reason),
            Err(e) => return CallOutcome::Dropped(e.to_string()),
        };
        if critic.specialty == Specialty::Security && !findings.is_empty() {
            review.scan_findings = scan::unreported(&review.issues, findings);
        }
        CallOutcome::Response(review)
    }
}

#[derive(Debug, Deserialize)]
struct RawReview {
    decision: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default, alias = "vulnerabilities", alias = "findings")]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(default)]
    severity: String,
    description: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    recommendation: Option<String>,
}

fn review_from_raw(critic: &CriticRegistration, raw: RawReview) -> CriticReview {
    let Some(decision) = Verdict::parse(&raw.decision) else {
        return malformed_review(critic, &format!("unknown decision {:?}", raw.decision));
    };
    let issues = raw
        .issues
        .into_iter()
        .map(|i| Issue {
            severity: Severity::parse(&i.severity).unwrap_or(Severity::Medium),
            description: i.description,
            location: i.location.filter(|l| !l.trim().is_empty()),
            recommendation: i.recommendation.filter(|r| !r.trim().is_empty()),
        })
        .collect();
    CriticReview {
        critic_id: critic.critic_id.clone(),
        specialty: critic.specialty,
        has_veto: critic.has_veto,
        decision,
        reasoning: raw.reasoning,
        issues,
        scan_findings: Vec::new(),
    }
}

/// Stand-in review for an unparseable reply, so the critic still counts.
fn malformed_review(critic: &CriticRegistration, reason: &str) -> CriticReview {
    warn!(critic_id = %critic.critic_id, reason = %reason, "critic reply could not be parsed");
    CriticReview {
        critic_id: critic.critic_id.clone(),
        specialty: critic.specialty,
        has_veto: critic.has_veto,
        decision: Verdict::NeedsRevision,
        reasoning: format!("review output could not be parsed: {reason}"),
        issues: vec![Issue {
            severity: Severity::Medium,
            description: format!("{} critic returned an unparseable review", critic.specialty),
            location: None,
            recommendation: Some("Re-run the review".to_string()),
        }],
        scan_findings: Vec::new(),
    }
}
