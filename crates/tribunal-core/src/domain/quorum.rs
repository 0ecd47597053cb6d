//! Fan-out accounting shared by the planner and critic pools.

use serde::{Deserialize, Serialize};

use crate::domain::state::Phase;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedAgent {
    pub agent_id: String,
    pub reason: String,
}

/// Who answered a fan-out phase, who was dropped and who was cut off.
///
/// Lets callers tell "rejected on merits" apart from "degraded because
/// agents were unavailable".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumReport {
    pub phase: Phase,
    pub registered: usize,
    pub required: usize,
    pub responded: Vec<String>,
    pub dropped: Vec<DroppedAgent>,
    pub cancelled: Vec<String>,
}

impl QuorumReport {
    pub fn new(phase: Phase, registered: usize, required: usize) -> Self {
        Self {
            phase,
            registered,
            required,
            responded: Vec::new(),
            dropped: Vec::new(),
            cancelled: Vec::new(),
        }
    }

    pub fn reached(&self) -> bool {
        self.responded.len() >= self.required
    }

    pub fn degraded(&self) -> bool {
        self.responded.len() < self.registered
    }

    /// Sort every list so reports compare equal regardless of arrival order.
    pub(crate) fn normalize(&mut self) {
        self.responded.sort();
        self.cancelled.sort();
        self.dropped.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    }
}

impl std::fmt::Display for QuorumReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}/{} responded (quorum {}), {} dropped, {} cancelled",
            self.phase,
            self.responded.len(),
            self.registered,
            self.required,
            self.dropped.len(),
            self.cancelled.len()
        )
    }
}
