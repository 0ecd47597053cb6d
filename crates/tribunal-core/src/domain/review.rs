//! Review vocabulary: `Verdict`, `Severity`, `Issue`, `Specialty`,
//! `CriticReview`, `FeedbackBundle`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Decision of a single critic, and of the consensus over all critics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Reject,
    NeedsRevision,
    ConditionalApproval,
}

impl Verdict {
    /// Lenient parse of agent-supplied text (`"APPROVE"`, `"needs revision"`,
    /// `"conditional-approval"`).
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();
        match normalized.as_str() {
            "approve" | "approved" => Some(Verdict::Approve),
            "reject" | "rejected" => Some(Verdict::Reject),
            "needs_revision" | "revise" => Some(Verdict::NeedsRevision),
            "conditional_approval" | "conditional" | "approve_with_conditions" => {
                Some(Verdict::ConditionalApproval)
            }
            _ => None,
        }
    }

    pub fn is_approval(&self) -> bool {
        matches!(self, Verdict::Approve | Verdict::ConditionalApproval)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Verdict::Approve => "APPROVE",
            Verdict::Reject => "REJECT",
            Verdict::NeedsRevision => "NEEDS_REVISION",
            Verdict::ConditionalApproval => "CONDITIONAL_APPROVAL",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" | "blocker" => Some(Severity::Critical),
            "high" | "major" => Some(Severity::High),
            "medium" | "moderate" => Some(Severity::Medium),
            "low" | "minor" => Some(Severity::Low),
            "info" | "informational" | "note" => Some(Severity::Info),
            _ => None,
        }
    }

    /// `critical` and `high` block approval.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub description: String,
    pub location: Option<String>,
    pub recommendation: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            location: None,
            recommendation: None,
        }
    }
}

/// Review focus of a critic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    Correctness,
    Security,
    Performance,
    Ux,
    RequirementsMatch,
}

impl Specialty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Specialty::Correctness => "correctness",
            Specialty::Security => "security",
            Specialty::Performance => "performance",
            Specialty::Ux => "ux",
            Specialty::RequirementsMatch => "requirements_match",
        }
    }

    /// Correctness and security critics may veto; the rest are advisory.
    pub fn default_veto(&self) -> bool {
        matches!(self, Specialty::Correctness | Specialty::Security)
    }

    pub fn focus(&self) -> &'static str {
        match self {
            Specialty::Correctness => "logic errors, broken control flow, unhandled failures",
            Specialty::Security => "injection, secrets handling, authentication and authorization",
            Specialty::Performance => "algorithmic cost, blocking calls, resource usage",
            Specialty::Ux => "usability, error messages, accessibility",
            Specialty::RequirementsMatch => "whether the code does what was asked",
        }
    }

    pub fn all() -> [Specialty; 5] {
        [
            Specialty::Correctness,
            Specialty::Security,
            Specialty::Performance,
            Specialty::Ux,
            Specialty::RequirementsMatch,
        ]
    }
}

impl std::fmt::Display for Specialty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One critic's review of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticReview {
    pub critic_id: String,
    pub specialty: Specialty,
    /// Copied from the critic's registration, never from its output.
    pub has_veto: bool,
    pub decision: Verdict,
    pub reasoning: String,
    pub issues: Vec<Issue>,
    /// Static-scan hits attached to a security review. Reported as feedback,
    /// never counted toward the verdict.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scan_findings: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub critic_id: String,
    pub reasoning: String,
    pub issues: Vec<Issue>,
}

/// Unresolved critic concerns routed into the next planning round.
///
/// Keys are [`Specialty::as_str`] values; items within a key are sorted, so
/// the bundle is identical whatever order the reviews arrived in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackBundle {
    pub iteration: u32,
    pub by_specialty: BTreeMap<String, Vec<FeedbackItem>>,
    pub veto_reasons: Vec<String>,
    /// Why execution produced nothing to review, one line per failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execution_failures: Vec<String>,
}

impl FeedbackBundle {
    pub fn new(iteration: u32) -> Self {
        Self {
            iteration,
            ..Self::default()
        }
    }

    pub fn push(&mut self, specialty: Specialty, item: FeedbackItem) {
        let items = self
            .by_specialty
            .entry(specialty.as_str().to_string())
            .or_default();
        items.push(item);
        items.sort();
    }

    pub fn is_empty(&self) -> bool {
        self.by_specialty.is_empty()
            && self.veto_reasons.is_empty()
            && self.execution_failures.is_empty()
    }

    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.by_specialty
            .values()
            .flat_map(|items| items.iter().flat_map(|item| item.issues.iter()))
    }

    /// Prompt-ready text, grouped by specialty.
    pub fn render(&self) -> String {
        let mut out = format!("Feedback from review of iteration {}:\n", self.iteration);
        for reason in &self.veto_reasons {
            out.push_str(&format!("VETO: {reason}\n"));
        }
        for failure in &self.execution_failures {
            out.push_str(&format!("EXECUTION FAILED: {failure}\n"));
        }
        for (specialty, items) in &self.by_specialty {
            out.push_str(&format!("[{specialty}]\n"));
            for item in items {
                out.push_str(&format!("- {}: {}\n", item.critic_id, item.reasoning));
                for issue in &item.issues {
                    out.push_str(&format!("  * ({}) {}", issue.severity, issue.description));
                    if let Some(location) = &issue.location {
                        out.push_str(&format!(" at {location}"));
                    }
                    if let Some(fix) = &issue.recommendation {
                        out.push_str(&format!("; suggested: {fix}"));
                    }
                    out.push('\n');
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_parse_variants() {
        assert_eq!(Verdict::parse("APPROVE"), Some(Verdict::Approve));
        assert_eq!(Verdict::parse("needs revision"), Some(Verdict::NeedsRevision));
        assert_eq!(
            Verdict::parse("Conditional-Approval"),
            Some(Verdict::ConditionalApproval)
        );
        assert_eq!(Verdict::parse("maybe"), None);
    }

    #[test]
    fn test_blocking_severities() {
        assert!(Severity::Critical.is_blocking());
        assert!(Severity::High.is_blocking());
        assert!(!Severity::Medium.is_blocking());
        assert!(!Severity::Info.is_blocking());
    }

    #[test]
    fn test_default_veto_specialties() {
        let veto: Vec<_> = Specialty::all()
            .into_iter()
            .filter(Specialty::default_veto)
            .collect();
        assert_eq!(veto, vec![Specialty::Correctness, Specialty::Security]);
    }

    #[test]
    fn test_feedback_bundle_is_order_insensitive() {
        let a = FeedbackItem {
            critic_id: "a".into(),
            reasoning: "x".into(),
            issues: vec![],
        };
        let b = FeedbackItem {
            critic_id: "b".into(),
            reasoning: "y".into(),
            issues: vec![Issue::new(Severity::Low, "nit")],
        };
        let mut first = FeedbackBundle::new(1);
        first.push(Specialty::Ux, a.clone());
        first.push(Specialty::Ux, b.clone());
        let mut second = FeedbackBundle::new(1);
        second.push(Specialty::Ux, b);
        second.push(Specialty::Ux, a);
        assert_eq!(first, second);
        assert_eq!(first.issues().count(), 1);
    }

    #[test]
    fn test_feedback_render_mentions_veto_and_issue() {
        let mut bundle = FeedbackBundle::new(2);
        bundle.veto_reasons.push("sec-1: hardcoded secret".into());
        let mut issue = Issue::new(Severity::High, "secret in source");
        issue.location = Some("src/config.rs:3".into());
        bundle.push(
            Specialty::Security,
            FeedbackItem {
                critic_id: "sec-1".into(),
                reasoning: "leaks credentials".into(),
                issues: vec![issue],
            },
        );
        let text = bundle.render();
        assert!(text.contains("iteration 2"));
        assert!(text.contains("VETO: sec-1: hardcoded secret"));
        assert!(text.contains("[security]"));
        assert!(text.contains("(high) secret in source at src/config.rs:3"));
    }
}
