//! Structured observability hooks for the session lifecycle.
//!
//! This module provides:
//! - A session-scoped span, attached to the orchestrator future with
//!   `Instrument` so it follows the session across await points
//! - Emission functions for key lifecycle events: phase entry, quorum,
//!   verdict, checkpoint and finish
//!
//! Events are emitted at `info!` level (filter with `TRIBUNAL_LOG`).

use tracing::info;

use crate::domain::{Phase, SessionStatus, Verdict};

/// Every event inside carries `session_id`.
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("tribunal.session", session_id = %session_id)
}

pub fn emit_phase_entered(session_id: &str, iteration: u32, phase: Phase) {
    info!(event = "phase.entered", session_id = %session_id, iteration, phase = %phase);
}

pub fn emit_quorum_reached(phase: Phase, responded: usize, registered: usize) {
    info!(event = "quorum.reached", phase = %phase, responded, registered);
}

pub fn emit_verdict_decided(session_id: &str, iteration: u32, verdict: Verdict, approve_ratio: f64) {
    info!(
        event = "verdict.decided",
        session_id = %session_id,
        iteration,
        verdict = %verdict,
        approve_ratio,
    );
}

pub fn emit_checkpoint_written(session_id: &str, seq: u64, phase: Phase) {
    info!(event = "checkpoint.written", session_id = %session_id, seq, phase = %phase);
}

pub fn emit_session_finished(session_id: &str, status: SessionStatus, iterations: usize) {
    info!(
        event = "session.finished",
        session_id = %session_id,
        status = %status,
        iterations,
    );
}

/// Checkpoint write failure (warning level).
pub fn emit_checkpoint_error(session_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "checkpoint.error", session_id = %session_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_inside_session_span() {
        session_span("test-session").in_scope(|| {
            emit_phase_entered("test-session", 1, Phase::Planning);
            emit_verdict_decided("test-session", 1, Verdict::Approve, 1.0);
        });
    }
}
