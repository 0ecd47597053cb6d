//! Line-level pattern scan run alongside the security critic.
//!
//! Findings ride along on the security critic's review so a reviewer that
//! misses an obvious hardcoded secret still surfaces it in feedback. They
//! are kept apart from the critic's own issues and never change a decision
//! or the verdict.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{Artifact, Issue, Severity};

struct Rule {
    name: &'static str,
    severity: Severity,
    pattern: Regex,
    recommendation: &'static str,
}

fn rule(
    name: &'static str,
    severity: Severity,
    pattern: &str,
    recommendation: &'static str,
) -> Rule {
    Rule {
        name,
        severity,
        pattern: Regex::new(pattern).expect("security scan rule regex should compile"),
        recommendation,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            "hardcoded secret",
            Severity::Medium,
            r#"(?i)\b(password|passwd|secret|api_?key|token)\b\s*[:=]\s*["'][^"']{4,}["']"#,
            "Load credentials from the environment or a secrets manager",
        ),
        rule(
            "command injection",
            Severity::High,
            r"(?i)(os\.system\s*\(|shell\s*=\s*true|\beval\s*\(|child_process\.exec\s*\()",
            "Pass argument lists to process APIs and never evaluate untrusted input",
        ),
        rule(
            "sql injection",
            Severity::High,
            r#"(?i)(format!?\s*\(\s*["'][^"']*\b(select|insert|update|delete)\b|f["'][^"']*\b(select|insert|update|delete)\b[^"']*\{|["'][^"']*\b(select|insert|update|delete)\b[^"']*["']\s*\+)"#,
            "Use parameterized queries instead of string building",
        ),
        rule(
            "cross-site scripting",
            Severity::Medium,
            r"(?i)(\.innerHTML\s*=|document\.write\s*\(|dangerouslySetInnerHTML)",
            "Encode output and avoid writing raw HTML",
        ),
    ]
});

/// Scan every generated file line by line.
pub fn scan_artifact(artifact: &Artifact) -> Vec<Issue> {
    let mut issues = Vec::new();
    for set in &artifact.files {
        for file in &set.files {
            for (line_no, line) in file.content.lines().enumerate() {
                for rule in RULES.iter() {
                    if rule.pattern.is_match(line) {
                        issues.push(Issue {
                            severity: rule.severity,
                            description: format!("Potential {} detected", rule.name),
                            location: Some(format!("{}:{}", file.path, line_no + 1)),
                            recommendation: Some(rule.recommendation.to_string()),
                        });
                    }
                }
            }
        }
    }
    issues
}

/// The `findings` not already in `reported` at the same location with the
/// same description.
pub fn unreported(reported: &[Issue], findings: &[Issue]) -> Vec<Issue> {
    let mut out: Vec<Issue> = Vec::new();
    for issue in findings {
        let duplicate = reported
            .iter()
            .chain(out.iter())
            .any(|i| i.location == issue.location && i.description == issue.description);
        if !duplicate {
            out.push(issue.clone());
        }
    }
    out
}
