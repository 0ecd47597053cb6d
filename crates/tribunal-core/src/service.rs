//! `GovernanceService`: background sessions over one orchestrator.
//!
//! `start` spawns a session on the tokio runtime and returns its id at once.
//! Readers get whole-state snapshots published through a `watch` channel at
//! every phase boundary; sessions that are not running in this process are
//! read from their latest checkpoint instead. A finished session is dropped
//! from memory by `wait` once its terminal state is on disk.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    CriticReview, OrchestrationState, PlanComparison, PlanProposal, PlanningContext,
    SynthesisConflict,
};
use crate::governance::error::OrchestrationError;
use crate::governance::orchestrator::{GovernanceOrchestrator, OrchestrationResult};

pub type SessionId = String;

/// Rival proposals and their pairwise comparison for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateEntry {
    pub iteration: u32,
    pub proposals: Vec<PlanProposal>,
    pub comparisons: Vec<PlanComparison>,
    pub conflicts: Vec<SynthesisConflict>,
}

type SessionTask = JoinHandle<Result<OrchestrationResult, OrchestrationError>>;

struct SessionHandle {
    snapshots: watch::Receiver<OrchestrationState>,
    cancel: CancellationToken,
    task: Option<SessionTask>,
}

pub struct GovernanceService {
    orchestrator: Arc<GovernanceOrchestrator>,
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl GovernanceService {
    pub fn new(orchestrator: Arc<GovernanceOrchestrator>) -> Self {
        Self {
            orchestrator,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<GovernanceOrchestrator> {
        &self.orchestrator
    }

    /// Sessions held in memory, sorted.
    pub async fn resident_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Spawn a new session and return its id.
    pub async fn start(
        &self,
        requirements: &str,
        context: PlanningContext,
        max_iterations: u32,
    ) -> SessionId {
        let state = self
            .orchestrator
            .new_session(requirements, context, max_iterations);
        let session_id = state.session_id.clone();
        self.spawn(state).await;
        info!(session_id = %session_id, "session started");
        session_id
    }

    /// Spawn a run continuing a checkpointed session.
    pub async fn resume(&self, session_id: &str) -> Result<SessionId, OrchestrationError> {
        if self.sessions.lock().await.contains_key(session_id) {
            return Ok(session_id.to_string());
        }
        let state = self.orchestrator.load_state(session_id).await?;
        self.spawn(state).await;
        Ok(session_id.to_string())
    }

    async fn spawn(&self, state: OrchestrationState) {
        let session_id = state.session_id.clone();
        let (tx, rx) = watch::channel(state.clone());
        let cancel = CancellationToken::new();
        let orchestrator = Arc::clone(&self.orchestrator);
        let token = cancel.clone();
        let task = tokio::spawn(async move { orchestrator.drive(state, &token, Some(&tx)).await });
        self.sessions.lock().await.insert(
            session_id,
            SessionHandle {
                snapshots: rx,
                cancel,
                task: Some(task),
            },
        );
    }

    /// Latest committed state of a session.
    pub async fn get_state(&self, session_id: &str) -> Result<OrchestrationState, OrchestrationError> {
        if let Some(handle) = self.sessions.lock().await.get(session_id) {
            return Ok(handle.snapshots.borrow().clone());
        }
        self.orchestrator.load_state(session_id).await
    }

    /// Proposals and comparisons of every recorded iteration, plus the
    /// in-flight one when it has proposals.
    pub async fn get_debate_log(&self, session_id: &str) -> Result<Vec<DebateEntry>, OrchestrationError> {
        let state = self.get_state(session_id).await?;
        Ok(debate_log(&state))
    }

    pub async fn get_review_details(
        &self,
        session_id: &str,
        iteration: u32,
    ) -> Result<Vec<CriticReview>, OrchestrationError> {
        let state = self.get_state(session_id).await?;
        Ok(state
            .record(iteration)
            .map(|r| r.reviews.clone())
            .unwrap_or_default())
    }

    /// Ask a running session to stop at its next cancellation point.
    pub async fn cancel(&self, session_id: &str) -> Result<(), OrchestrationError> {
        let sessions = self.sessions.lock().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| OrchestrationError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        handle.cancel.cancel();
        Ok(())
    }

    /// Wait for a session to finish. A session already waited on, or only
    /// known from its checkpoints, answers from its terminal state.
    pub async fn wait(&self, session_id: &str) -> Result<OrchestrationResult, OrchestrationError> {
        let task = {
            let mut sessions = self.sessions.lock().await;
            sessions.get_mut(session_id).and_then(|h| h.task.take())
        };
        if let Some(task) = task {
            let outcome = match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "session task aborted");
                    Err(OrchestrationError::Aborted {
                        session_id: session_id.to_string(),
                        reason: e.to_string(),
                    })
                }
            };
            self.evict_if_persisted(session_id).await;
            return outcome;
        }

        let state = self.get_state(session_id).await?;
        if state.is_terminal() {
            Ok(OrchestrationResult::from_state(&state))
        } else {
            Err(OrchestrationError::SessionNotFound {
                session_id: session_id.to_string(),
            })
        }
    }

    /// Forget a finished session when its checkpoints already say so. A
    /// session whose last write failed stays resident so readers keep
    /// seeing its final state.
    async fn evict_if_persisted(&self, session_id: &str) {
        let persisted = match self.orchestrator.load_state(session_id).await {
            Ok(state) => state.is_terminal(),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "could not read final checkpoint");
                false
            }
        };
        if persisted {
            self.sessions.lock().await.remove(session_id);
            debug!(session_id = %session_id, "finished session evicted");
        }
    }
}

pub fn debate_log(state: &OrchestrationState) -> Vec<DebateEntry> {
    let mut entries: Vec<DebateEntry> = state
        .history
        .iter()
        .map(|r| DebateEntry {
            iteration: r.iteration,
            proposals: r.proposals.clone(),
            comparisons: r.debate.clone(),
            conflicts: r.conflicts.clone(),
        })
        .collect();
    if let Some(draft) = &state.in_flight {
        if !draft.proposals.is_empty() {
            entries.push(DebateEntry {
                iteration: state.iteration,
                proposals: draft.proposals.clone(),
                comparisons: draft.debate.clone(),
                conflicts: draft.conflicts.clone(),
            });
        }
    }
    entries
}
