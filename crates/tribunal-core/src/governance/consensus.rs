//! Consensus engine.
//!
//! Aggregates [`CriticReview`]s into one [`Verdict`]. Pure: the outcome
//! depends only on the multiset of reviews, never on their order.
//!
//! Decision order:
//! 1. any veto-capable critic rejecting → `REJECT`
//! 2. `approve_ratio ≥ 0.6` with no critic-raised issues → `APPROVE`
//! 3. `approve_ratio ≥ 0.6` with only non-blocking issues → `CONDITIONAL_APPROVAL`
//! 4. otherwise → `NEEDS_REVISION`

use serde::{Deserialize, Serialize};

use crate::domain::{CriticReview, FeedbackBundle, FeedbackItem, Issue, Verdict};

// ---------------------------------------------------------------------------
// Threshold
// ---------------------------------------------------------------------------

/// Approval threshold as an exact fraction (3/5 = 0.6).
pub const APPROVE_THRESHOLD: (u32, u32) = (3, 5);

fn meets_threshold(approvals: u32, total: u32) -> bool {
    let (num, den) = APPROVE_THRESHOLD;
    total > 0 && u64::from(approvals) * u64::from(den) >= u64::from(total) * u64::from(num)
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Full result of one consensus round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub verdict: Verdict,
    /// `approvals / total`, 0 when there are no reviews.
    pub approve_ratio: f64,
    pub approvals: u32,
    pub total: u32,
    /// Non-blocking issues attached to a conditional approval.
    pub conditions: Vec<Issue>,
    /// `"<critic_id>: <reasoning>"` for every veto.
    pub veto_reasons: Vec<String>,
    /// Present for `REJECT` and `NEEDS_REVISION`.
    pub feedback: Option<FeedbackBundle>,
}

/// Evaluate `reviews` collected in `iteration`.
pub fn evaluate(reviews: &[CriticReview], iteration: u32) -> ConsensusOutcome {
    let total = reviews.len() as u32;
    let approvals = reviews
        .iter()
        .filter(|r| r.decision == Verdict::Approve)
        .count() as u32;
    let approve_ratio = if total == 0 {
        0.0
    } else {
        f64::from(approvals) / f64::from(total)
    };

    let mut veto_reasons: Vec<String> = reviews
        .iter()
        .filter(|r| r.has_veto && r.decision == Verdict::Reject)
        .map(|r| format!("{}: {}", r.critic_id, r.reasoning))
        .collect();
    veto_reasons.sort();

    // Scan findings are feedback only.
    let mut all_issues: Vec<Issue> = reviews.iter().flat_map(|r| r.issues.clone()).collect();
    all_issues.sort();
    all_issues.dedup();
    let has_blocking = all_issues.iter().any(|i| i.severity.is_blocking());

    let verdict = if !veto_reasons.is_empty() {
        Verdict::Reject
    } else if meets_threshold(approvals, total) && all_issues.is_empty() {
        Verdict::Approve
    } else if meets_threshold(approvals, total) && !has_blocking {
        Verdict::ConditionalApproval
    } else {
        Verdict::NeedsRevision
    };

    let conditions = if verdict == Verdict::ConditionalApproval {
        all_issues
    } else {
        Vec::new()
    };

    let feedback = matches!(verdict, Verdict::Reject | Verdict::NeedsRevision)
        .then(|| feedback_bundle(reviews, iteration, &veto_reasons));

    ConsensusOutcome {
        verdict,
        approve_ratio,
        approvals,
        total,
        conditions,
        veto_reasons,
        feedback,
    }
}

/// The verdict alone.
pub fn decide(reviews: &[CriticReview]) -> Verdict {
    evaluate(reviews, 0).verdict
}

/// Every non-approving review, plus any approving review that carries a
/// blocking issue or scan findings, grouped by specialty. Scan findings are
/// listed after the critic's own issues.
fn feedback_bundle(reviews: &[CriticReview], iteration: u32, veto_reasons: &[String]) -> FeedbackBundle {
    let mut bundle = FeedbackBundle::new(iteration);
    bundle.veto_reasons = veto_reasons.to_vec();
    for review in reviews {
        let carries_blocking = review.issues.iter().any(|i| i.severity.is_blocking());
        if review.decision == Verdict::Approve && !carries_blocking && review.scan_findings.is_empty() {
            continue;
        }
        let mut issues = review.issues.clone();
        issues.sort();
        let mut findings = review.scan_findings.clone();
        findings.sort();
        issues.extend(findings);
        bundle.push(
            review.specialty,
            FeedbackItem {
                critic_id: review.critic_id.clone(),
                reasoning: review.reasoning.clone(),
                issues,
            },
        );
    }
    bundle
}
