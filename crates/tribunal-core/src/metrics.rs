//! Per-session counters.
//!
//! Counters live inside [`OrchestrationState`](crate::domain::OrchestrationState)
//! so they are checkpointed with the session and survive a resume. Call
//! [`SessionMetrics::flush`] to emit the current values as a single
//! `tracing::info!` event (e.g. when a session finishes).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMetrics {
    pub plans_proposed: u64,
    pub plans_synthesized: u64,
    pub steps_executed: u64,
    pub step_retries: u64,
    pub reviews_conducted: u64,
    pub vetoes_issued: u64,
    pub revisions_requested: u64,
    pub agents_dropped: u64,
    pub checkpoints_written: u64,
}

impl SessionMetrics {
    pub fn add_plans_proposed(&mut self, n: usize) {
        self.plans_proposed += n as u64;
        tracing::trace!(metric = "plans_proposed", "counter incremented");
    }

    pub fn inc_plans_synthesized(&mut self) {
        self.plans_synthesized += 1;
        tracing::trace!(metric = "plans_synthesized", "counter incremented");
    }

    pub fn add_steps_executed(&mut self, n: usize) {
        self.steps_executed += n as u64;
        tracing::trace!(metric = "steps_executed", "counter incremented");
    }

    pub fn add_step_retries(&mut self, n: u64) {
        self.step_retries += n;
        tracing::trace!(metric = "step_retries", "counter incremented");
    }

    pub fn add_reviews_conducted(&mut self, n: usize) {
        self.reviews_conducted += n as u64;
        tracing::trace!(metric = "reviews_conducted", "counter incremented");
    }

    pub fn add_vetoes(&mut self, n: usize) {
        self.vetoes_issued += n as u64;
        tracing::trace!(metric = "vetoes_issued", "counter incremented");
    }

    pub fn inc_revisions_requested(&mut self) {
        self.revisions_requested += 1;
        tracing::trace!(metric = "revisions_requested", "counter incremented");
    }

    pub fn add_agents_dropped(&mut self, n: usize) {
        self.agents_dropped += n as u64;
        tracing::trace!(metric = "agents_dropped", "counter incremented");
    }

    pub fn inc_checkpoints_written(&mut self) {
        self.checkpoints_written += 1;
        tracing::trace!(metric = "checkpoints_written", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self, session_id: &str) {
        tracing::info!(
            metric = "flush",
            session_id = %session_id,
            plans_proposed = self.plans_proposed,
            plans_synthesized = self.plans_synthesized,
            steps_executed = self.steps_executed,
            step_retries = self.step_retries,
            reviews_conducted = self.reviews_conducted,
            vetoes_issued = self.vetoes_issued,
            revisions_requested = self.revisions_requested,
            agents_dropped = self.agents_dropped,
            checkpoints_written = self.checkpoints_written,
        );
    }
}
