//! Quorum fan-out shared by the planner and critic pools.
//!
//! Calls run on a `FuturesUnordered` capped by a semaphore, each under its
//! own timeout. The harness stops when every call has finished, when the
//! grace window after reaching quorum has elapsed, when the phase deadline
//! passes, or when the cancellation token fires. Calls still outstanding at
//! that point are dropped (which cancels them) and reported as `cancelled`.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{DroppedAgent, Phase, QuorumReport};
use crate::governance::error::FanOutError;
use crate::obs;

/// `ceil(n / 2)`, and never zero.
pub fn default_quorum(registered: usize) -> usize {
    registered.div_ceil(2).max(1)
}

/// Timing and concurrency limits for one fan-out.
#[derive(Debug, Clone)]
pub struct FanOutPolicy {
    pub quorum: usize,
    pub call_timeout: Duration,
    /// How long to keep waiting for stragglers once quorum is reached.
    pub grace: Duration,
    pub max_concurrent: usize,
}

/// What one agent call produced.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Response(T),
    /// The call did not produce a usable response; does not count toward quorum.
    Dropped(String),
}

/// Responses that arrived in time, sorted by agent id, plus the accounting.
#[derive(Debug)]
pub struct FanOut<T> {
    pub responses: Vec<(String, T)>,
    pub report: QuorumReport,
}

/// Run `calls` concurrently under `policy`.
///
/// Fails with [`FanOutError::QuorumNotReached`] when fewer than
/// `policy.quorum` calls responded before the harness stopped.
pub async fn fan_out<T, Fut>(
    phase: Phase,
    policy: &FanOutPolicy,
    phase_timeout: Duration,
    cancel: &CancellationToken,
    calls: Vec<(String, Fut)>,
) -> Result<FanOut<T>, FanOutError>
where
    Fut: Future<Output = CallOutcome<T>>,
{
    let mut report = QuorumReport::new(phase, calls.len(), policy.quorum);
    let semaphore = Arc::new(Semaphore::new(policy.max_concurrent.max(1)));
    let mut pending: BTreeSet<String> = BTreeSet::new();
    let mut in_flight = FuturesUnordered::new();

    for (agent_id, call) in calls {
        pending.insert(agent_id.clone());
        let semaphore = Arc::clone(&semaphore);
        let call_timeout = policy.call_timeout;
        in_flight.push(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = match tokio::time::timeout(call_timeout, call).await {
                Ok(outcome) => outcome,
                Err(_) => CallOutcome::Dropped(format!(
                    "timed out after {}ms",
                    call_timeout.as_millis()
                )),
            };
            (agent_id, outcome)
        });
    }

    let phase_deadline = Instant::now() + phase_timeout;
    let mut grace_deadline: Option<Instant> = None;
    let mut responses: Vec<(String, T)> = Vec::new();

    while !in_flight.is_empty() {
        let deadline = grace_deadline.map_or(phase_deadline, |g| g.min(phase_deadline));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%phase, "fan-out cancelled");
                break;
            }
            next = in_flight.next() => {
                let Some((agent_id, outcome)) = next else { break };
                pending.remove(&agent_id);
                match outcome {
                    CallOutcome::Response(value) => {
                        debug!(%phase, agent_id = %agent_id, "agent responded");
                        report.responded.push(agent_id.clone());
                        responses.push((agent_id, value));
                    }
                    CallOutcome::Dropped(reason) => {
                        warn!(%phase, agent_id = %agent_id, reason = %reason, "agent dropped from fan-out");
                        report.dropped.push(DroppedAgent { agent_id, reason });
                    }
                }
                if grace_deadline.is_none() && responses.len() >= policy.quorum {
                    grace_deadline = Some(Instant::now() + policy.grace);
                    obs::emit_quorum_reached(phase, responses.len(), report.registered);
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                debug!(%phase, outstanding = pending.len(), "fan-out deadline reached");
                break;
            }
        }
    }
    drop(in_flight);

    report.cancelled = pending.into_iter().collect();
    report.normalize();
    responses.sort_by(|a, b| a.0.cmp(&b.0));

    if !report.reached() {
        return Err(FanOutError::QuorumNotReached { report });
    }
    Ok(FanOut { responses, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use futures::FutureExt;

    fn policy(quorum: usize) -> FanOutPolicy {
        FanOutPolicy {
            quorum,
            call_timeout: Duration::from_secs(10),
            grace: Duration::from_millis(200),
            max_concurrent: 8,
        }
    }

    fn delayed(id: &str, ms: u64, value: u32) -> (String, BoxFuture<'static, CallOutcome<u32>>) {
        let fut = async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            CallOutcome::Response(value)
        }
        .boxed();
        (id.to_string(), fut)
    }

    fn dropped(id: &str, ms: u64) -> (String, BoxFuture<'static, CallOutcome<u32>>) {
        let fut = async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            CallOutcome::Dropped("malformed".to_string())
        }
        .boxed();
        (id.to_string(), fut)
    }

    #[test]
    fn default_quorum_is_half_rounded_up() {
        assert_eq!(default_quorum(0), 1);
        assert_eq!(default_quorum(1), 1);
        assert_eq!(default_quorum(3), 2);
        assert_eq!(default_quorum(4), 2);
        assert_eq!(default_quorum(5), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn all_respond_returns_sorted() {
        let token = CancellationToken::new();
        let calls = vec![delayed("c", 30, 3), delayed("a", 10, 1), delayed("b", 20, 2)];
        let out = fan_out(Phase::Planning, &policy(2), Duration::from_secs(5), &token, calls)
            .await
            .unwrap();
        let ids: Vec<_> = out.responses.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(out.report.cancelled.is_empty());
        assert!(!out.report.degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn straggler_is_cancelled_after_grace() {
        let token = CancellationToken::new();
        let start = Instant::now();
        let calls = vec![
            delayed("a", 100, 1),
            delayed("b", 150, 2),
            delayed("slow", 5_000, 3),
        ];
        let out = fan_out(Phase::Planning, &policy(2), Duration::from_secs(1), &token, calls)
            .await
            .unwrap();
        assert_eq!(out.responses.len(), 2);
        assert_eq!(out.report.cancelled, vec!["slow"]);
        // Quorum at 150ms plus the 200ms grace window.
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn quorum_not_reached_carries_report() {
        let token = CancellationToken::new();
        let calls = vec![
            delayed("a", 100, 1),
            dropped("b", 10),
            delayed("slow", 5_000, 3),
        ];
        let err = fan_out(Phase::Reviewing, &policy(2), Duration::from_secs(1), &token, calls)
            .await
            .unwrap_err();
        let report = err.report();
        assert_eq!(report.phase, Phase::Reviewing);
        assert_eq!(report.responded, vec!["a"]);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.cancelled, vec!["slow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_timeout_drops_agent() {
        let token = CancellationToken::new();
        let mut p = policy(1);
        p.call_timeout = Duration::from_millis(50);
        let calls = vec![delayed("fast", 10, 1), delayed("slow", 500, 2)];
        let out = fan_out(Phase::Planning, &p, Duration::from_secs(5), &token, calls)
            .await
            .unwrap();
        assert_eq!(out.responses.len(), 1);
        assert_eq!(out.report.dropped[0].agent_id, "slow");
        assert!(out.report.dropped[0].reason.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_waiting() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            child.cancel();
        });
        let calls = vec![delayed("a", 10, 1), delayed("b", 1_000, 2)];
        let out = fan_out(Phase::Planning, &policy(1), Duration::from_secs(5), &token, calls)
            .await
            .unwrap();
        assert_eq!(out.responses.len(), 1);
        assert_eq!(out.report.cancelled, vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_cap_serializes_calls() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let mut p = policy(3);
        p.max_concurrent = 1;
        let calls: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                let fut = async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    CallOutcome::Response(0u32)
                }
                .boxed();
                (id.to_string(), fut)
            })
            .collect();
        let out = fan_out(Phase::Planning, &p, Duration::from_secs(5), &token, calls)
            .await
            .unwrap();
        assert_eq!(out.responses.len(), 3);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
