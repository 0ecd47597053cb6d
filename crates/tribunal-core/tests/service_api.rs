use std::sync::Arc;

use tribunal_core::fakes::{plan_json, review_json, ScriptedAgentClient, ScriptedCodeWriter};
use tribunal_core::{
    CriticPool, CriticPoolConfig, CriticRegistration, GovernanceOrchestrator, GovernanceService,
    OrchestrationError, Philosophy, PlannerPool, PlannerPoolConfig, PlannerRegistration,
    PlanningContext, SessionStatus, Specialty,
};
use tribunal_state::fakes::MemoryCheckpointStore;

fn orchestrator(store: Arc<MemoryCheckpointStore>) -> Arc<GovernanceOrchestrator> {
    let planners = Philosophy::all()
        .into_iter()
        .map(|philosophy| PlannerRegistration {
            planner_id: format!("{philosophy}-planner"),
            philosophy,
            client: Arc::new(ScriptedAgentClient::replying(plan_json(
                &["Model the inventory", "Expose stock endpoints", philosophy.as_str()],
                "medium",
            ))),
        })
        .collect();
    let critics = Specialty::all()
        .into_iter()
        .map(|specialty| {
            CriticRegistration::new(
                format!("{specialty}-critic"),
                specialty,
                Arc::new(ScriptedAgentClient::new()
                    .then_text(review_json("needs_revision", &[("medium", "thin error handling")]))
                    .then_text(review_json("approve", &[]))),
            )
        })
        .collect();
    Arc::new(GovernanceOrchestrator::new(
        PlannerPool::new(planners, PlannerPoolConfig::default()),
        CriticPool::new(critics, CriticPoolConfig::default()),
        Arc::new(ScriptedCodeWriter::new()),
        store,
    ))
}

#[tokio::test(start_paused = true)]
async fn started_session_can_be_inspected_after_it_finishes() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let service = GovernanceService::new(orchestrator(store.clone()));

    let session_id = service
        .start("Track warehouse stock", PlanningContext::default(), 3)
        .await;
    let result = service.wait(&session_id).await.unwrap();
    assert_eq!(result.status, SessionStatus::Approved);
    assert_eq!(result.iterations_run, 2);

    let state = service.get_state(&session_id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Approved);
    assert_eq!(state.history.len(), 2);

    let debate = service.get_debate_log(&session_id).await.unwrap();
    assert_eq!(debate.len(), 2);
    assert_eq!(debate[0].iteration, 1);
    assert_eq!(debate[0].proposals.len(), 3);
    assert_eq!(debate[0].comparisons.len(), 3);

    let first = service.get_review_details(&session_id, 1).await.unwrap();
    assert_eq!(first.len(), 5);
    assert!(first.iter().all(|r| !r.issues.is_empty()));
    assert!(service
        .get_review_details(&session_id, 7)
        .await
        .unwrap()
        .is_empty());

    // A second wait answers from the terminal snapshot.
    let again = service.wait(&session_id).await.unwrap();
    assert_eq!(again.status, SessionStatus::Approved);
}

#[tokio::test(start_paused = true)]
async fn unknown_to_memory_falls_back_to_checkpoints() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let first = GovernanceService::new(orchestrator(store.clone()));
    let session_id = first
        .start("Track warehouse stock", PlanningContext::default(), 3)
        .await;
    first.wait(&session_id).await.unwrap();

    let second = GovernanceService::new(orchestrator(store));
    let state = second.get_state(&session_id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Approved);
    let result = second.wait(&session_id).await.unwrap();
    assert!(result.approved);

    let missing = second.get_state("no-such-session").await.unwrap_err();
    assert!(matches!(missing, OrchestrationError::SessionNotFound { .. }));
}

#[tokio::test(start_paused = true)]
async fn cancelled_session_ends_fatal_and_is_checkpointed() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let service = GovernanceService::new(orchestrator(store.clone()));

    let session_id = service
        .start("Track warehouse stock", PlanningContext::default(), 3)
        .await;
    service.cancel(&session_id).await.unwrap();

    let err = service.wait(&session_id).await.unwrap_err();
    let OrchestrationError::PhaseFailed { state, .. } = err else {
        panic!("expected a failed phase, got {err:?}");
    };
    assert_eq!(state.status, SessionStatus::Fatal);

    let stored = service.get_state(&session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Fatal);
    assert!(service.cancel("no-such-session").await.is_err());
}

#[tokio::test(start_paused = true)]
async fn finished_sessions_leave_memory_once_persisted() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let service = GovernanceService::new(orchestrator(store.clone()));

    let session_id = service
        .start("Track warehouse stock", PlanningContext::default(), 3)
        .await;
    assert_eq!(service.resident_sessions().await, vec![session_id.clone()]);

    service.wait(&session_id).await.unwrap();
    assert!(service.resident_sessions().await.is_empty());

    // Reads fall back to the checkpoint store.
    let state = service.get_state(&session_id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Approved);
    assert_eq!(service.get_review_details(&session_id, 2).await.unwrap().len(), 5);
    assert!(service.wait(&session_id).await.unwrap().approved);
}

#[tokio::test(start_paused = true)]
async fn session_with_unpersisted_end_stays_resident() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let service = GovernanceService::new(orchestrator(store.clone()));
    store.fail_writes_after(2);

    let session_id = service
        .start("Track warehouse stock", PlanningContext::default(), 3)
        .await;
    assert!(service.wait(&session_id).await.is_err());

    assert_eq!(service.resident_sessions().await, vec![session_id.clone()]);
    let state = service.get_state(&session_id).await.unwrap();
    assert_eq!(state.status, SessionStatus::Fatal);
    let stored = service.orchestrator().load_state(&session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Running);
}
