use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tribunal_core::domain::step_id_for;
use tribunal_core::fakes::{
    plan_json, review_json, ScriptedAgentClient, ScriptedCodeWriter, ScriptedReply,
    ScriptedVetoProbe,
};
use tribunal_core::governance::PhaseError;
use tribunal_core::{
    AgentError, CriticPool, CriticPoolConfig, CriticRegistration, FsCheckpointStore,
    GovernanceOrchestrator, OrchestrationError, OrchestrationState, Phase, PhaseTimeouts,
    Philosophy, PlannerPool, PlannerPoolConfig, PlannerRegistration, PlanningContext,
    SessionStatus, Specialty, Verdict,
};
use tribunal_state::fakes::MemoryCheckpointStore;
use tribunal_state::CheckpointStore;

const COMMON: [&str; 3] = [
    "Design the schema",
    "Implement the API",
    "Write integration tests",
];

struct Panel {
    planners: Vec<Arc<ScriptedAgentClient>>,
    critics: Vec<Arc<ScriptedAgentClient>>,
    writer: Arc<ScriptedCodeWriter>,
    store: Arc<MemoryCheckpointStore>,
}

fn planner_clients() -> Vec<Arc<ScriptedAgentClient>> {
    [
        vec![COMMON[0], COMMON[1], COMMON[2], "Add caching", "Add metrics"],
        vec![COMMON[0], COMMON[1], COMMON[2], "Add auth", "Add docs", "Add CI"],
        vec![COMMON[0], COMMON[1], COMMON[2], "Add logging"],
    ]
    .iter()
    .map(|steps| Arc::new(ScriptedAgentClient::replying(plan_json(steps, "medium"))))
    .collect()
}

fn planner_pool(clients: &[Arc<ScriptedAgentClient>], quorum: Option<usize>) -> PlannerPool {
    let philosophies = Philosophy::all();
    let planners = clients
        .iter()
        .enumerate()
        .map(|(i, client)| PlannerRegistration {
            planner_id: format!("planner-{i}"),
            philosophy: philosophies[i % philosophies.len()],
            client: client.clone(),
        })
        .collect();
    PlannerPool::new(
        planners,
        PlannerPoolConfig {
            quorum,
            ..PlannerPoolConfig::default()
        },
    )
}

const CRITIC_IDS: [(&str, Specialty); 5] = [
    ("correctness", Specialty::Correctness),
    ("security", Specialty::Security),
    ("performance", Specialty::Performance),
    ("ux", Specialty::Ux),
    ("requirements", Specialty::RequirementsMatch),
];

fn critic_pool(clients: &[Arc<ScriptedAgentClient>], quorum: Option<usize>) -> CriticPool {
    let critics = clients
        .iter()
        .zip(CRITIC_IDS)
        .map(|(client, (id, specialty))| CriticRegistration::new(id, specialty, client.clone()))
        .collect();
    CriticPool::new(
        critics,
        CriticPoolConfig {
            quorum,
            ..CriticPoolConfig::default()
        },
    )
}

fn critic_clients(replies: [&String; 5]) -> Vec<Arc<ScriptedAgentClient>> {
    replies
        .iter()
        .map(|r| Arc::new(ScriptedAgentClient::replying(r.as_str())))
        .collect()
}

fn panel(critics: Vec<Arc<ScriptedAgentClient>>) -> Panel {
    Panel {
        planners: planner_clients(),
        critics,
        writer: Arc::new(ScriptedCodeWriter::new()),
        store: Arc::new(MemoryCheckpointStore::new()),
    }
}

fn orchestrator(panel: &Panel) -> GovernanceOrchestrator {
    GovernanceOrchestrator::new(
        planner_pool(&panel.planners, None),
        critic_pool(&panel.critics, None),
        panel.writer.clone(),
        panel.store.clone(),
    )
}

fn approve() -> String {
    review_json("approve", &[])
}

#[tokio::test(start_paused = true)]
async fn unanimous_approval_finishes_in_one_iteration() {
    let approve = approve();
    let panel = panel(critic_clients([&approve, &approve, &approve, &approve, &approve]));
    let orch = orchestrator(&panel);

    let result = orch
        .run("Build a todo service", PlanningContext::default(), 3)
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Approved);
    assert!(result.approved);
    assert_eq!(result.verdict, Some(Verdict::Approve));
    assert_eq!(result.iterations_run, 1);
    assert!(result.unresolved_concerns.is_empty());

    // 5, 6 and 4 steps sharing three: nine distinct steps in the merge.
    let plan = result.plan.unwrap();
    assert!((4..=15).contains(&plan.steps.len()));
    assert_eq!(plan.steps.len(), 9);
    for common in COMMON {
        let id = step_id_for(common);
        assert!(plan.steps.iter().any(|s| s.id == id), "missing {common}");
    }
    let artifact = result.artifact.unwrap();
    assert_eq!(artifact.files.len(), plan.steps.len());
    assert!(!artifact.partial);

    assert_eq!(result.metrics.plans_proposed, 3);
    assert_eq!(result.metrics.plans_synthesized, 1);
    assert_eq!(result.metrics.reviews_conducted, 5);
    assert_eq!(result.metrics.checkpoints_written, 5);
    assert_eq!(panel.store.write_count(), 5);
    assert_eq!(result.critic_quorum.unwrap().responded.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn security_veto_overrides_the_majority() {
    let approve = approve();
    let reject = review_json("reject", &[("critical", "SQL built from user input")]);
    let panel = panel(critic_clients([&approve, &reject, &approve, &approve, &approve]));
    let orch = orchestrator(&panel);

    let result = orch
        .run("Build a todo service", PlanningContext::default(), 1)
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Exhausted);
    assert!(!result.approved);
    assert_eq!(result.verdict, Some(Verdict::Reject));
    assert_eq!(result.unresolved_concerns[0], "security: scripted reject");
    assert!(result
        .unresolved_concerns
        .contains(&"security [critical] SQL built from user input".to_string()));
    assert_eq!(result.metrics.vetoes_issued, 1);
}

#[tokio::test(start_paused = true)]
async fn review_feedback_reaches_the_next_iteration() {
    let approve = approve();
    let correctness = Arc::new(
        ScriptedAgentClient::new()
            .then_text(review_json("needs_revision", &[("high", "missing input validation")]))
            .then_text(approve.clone()),
    );
    let mut critics = vec![correctness];
    critics.extend(critic_clients([&approve, &approve, &approve, &approve, &approve]).into_iter().take(4));
    let panel = panel(critics);
    let orch = orchestrator(&panel);

    let result = orch
        .run("Build a todo service", PlanningContext::default(), 3)
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Approved);
    assert_eq!(result.iteration, Some(2));
    assert_eq!(result.iterations_run, 2);
    assert_eq!(result.metrics.revisions_requested, 1);

    let second_round = &panel.planners[0].requests()[1];
    assert!(second_round.prompt.contains("missing input validation"));
    assert!(panel.writer.feedback_seen().contains(&Some(1)));
    assert!(panel.writer.feedback_seen().contains(&None));
}

#[tokio::test(start_paused = true)]
async fn exhaustion_returns_best_iteration_and_respects_the_budget() {
    let needs = review_json("needs_revision", &[]);
    let approve = approve();
    let a = Arc::new(ScriptedAgentClient::replying(approve.clone()));
    let b = Arc::new(
        ScriptedAgentClient::new()
            .then_text(approve.clone())
            .then_text(needs.clone())
            .then_text(approve.clone()),
    );
    let mut critics = vec![a, b];
    critics.extend(critic_clients([&needs, &needs, &needs, &needs, &needs]).into_iter().take(3));
    let panel = panel(critics);
    let orch = orchestrator(&panel);

    let result = orch
        .run("Build a todo service", PlanningContext::default(), 3)
        .await
        .unwrap();

    // Ratios 2/5, 1/5, 2/5: the tie goes to the later iteration.
    assert_eq!(result.status, SessionStatus::Exhausted);
    assert!(!result.approved);
    assert_eq!(result.iteration, Some(3));
    assert_eq!(result.iterations_run, 3);
    assert!(result.artifact.is_some());
    for planner in &panel.planners {
        assert_eq!(planner.call_count(), 3);
    }
    for critic in &panel.critics {
        assert_eq!(critic.call_count(), 3);
    }
}

#[tokio::test(start_paused = true)]
async fn planning_quorum_failure_is_fatal_and_resume_does_not_rerun() {
    let approve = approve();
    let panel = Panel {
        planners: vec![
            Arc::new(ScriptedAgentClient::replying(plan_json(&COMMON, "low"))),
            Arc::new(ScriptedAgentClient::new().then_error(AgentError::Provider {
                status: Some(503),
                message: "overloaded".into(),
            })),
            Arc::new(ScriptedAgentClient::new().then_error(AgentError::RateLimited {
                retry_after_ms: Some(1000),
            })),
        ],
        ..panel(critic_clients([&approve, &approve, &approve, &approve, &approve]))
    };
    let orch = GovernanceOrchestrator::new(
        planner_pool(&panel.planners, Some(2)),
        critic_pool(&panel.critics, None),
        panel.writer.clone(),
        panel.store.clone(),
    );

    let err = orch
        .run("Build a todo service", PlanningContext::default(), 3)
        .await
        .unwrap_err();
    let OrchestrationError::PhaseFailed { phase, source, state } = err else {
        panic!("expected a phase failure");
    };
    assert_eq!(phase, Phase::Planning);
    assert!(matches!(source, PhaseError::FanOut(_)));
    assert_eq!(state.status, SessionStatus::Fatal);
    let report = state.planner_quorum.clone().unwrap();
    assert_eq!(report.responded, vec!["planner-0"]);
    assert_eq!(report.dropped.len(), 2);

    let resumed = orch.resume(&state.session_id).await.unwrap();
    assert_eq!(resumed.status, SessionStatus::Fatal);
    assert!(resumed.error.unwrap().contains("quorum not reached"));
    assert_eq!(panel.planners[0].call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn checkpoint_failure_is_fatal_and_resume_skips_completed_phases() {
    let approve = approve();
    let panel = panel(critic_clients([&approve, &approve, &approve, &approve, &approve]));
    let orch = orchestrator(&panel);

    // Initial and post-planning checkpoints succeed, the post-synthesis one fails.
    panel.store.fail_writes_after(2);
    let err = orch
        .run("Build a todo service", PlanningContext::default(), 3)
        .await
        .unwrap_err();
    let OrchestrationError::PhaseFailed { phase, source, state } = err else {
        panic!("expected a phase failure");
    };
    assert_eq!(phase, Phase::Synthesizing);
    assert!(matches!(source, PhaseError::Checkpoint(_)));
    assert_eq!(state.status, SessionStatus::Fatal);
    let draft = state.in_flight.clone().unwrap();
    assert_eq!(draft.proposals.len(), 3);
    assert!(draft.plan.is_none());

    // The persisted session is still the last good one.
    let stored = orch.load_state(&state.session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Running);
    assert_eq!(stored.phase, Phase::Synthesizing);

    panel.store.fail_writes_after(usize::MAX);
    let result = orch.resume(&state.session_id).await.unwrap();
    assert_eq!(result.status, SessionStatus::Approved);
    for planner in &panel.planners {
        assert_eq!(planner.call_count(), 1);
    }
    assert_eq!(result.metrics.plans_proposed, 3);
}

#[tokio::test(start_paused = true)]
async fn malformed_critic_still_counts_toward_quorum() {
    let approve = approve();
    let critics = vec![
        Arc::new(ScriptedAgentClient::replying("this is not json")),
        Arc::new(ScriptedAgentClient::replying(approve)),
    ];
    let panel = panel(critics);
    let orch = GovernanceOrchestrator::new(
        planner_pool(&panel.planners, None),
        critic_pool(&panel.critics, Some(2)),
        panel.writer.clone(),
        panel.store.clone(),
    );

    let result = orch
        .run("Build a todo service", PlanningContext::default(), 1)
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Exhausted);
    assert_eq!(result.verdict, Some(Verdict::NeedsRevision));
    assert_eq!(result.critic_quorum.unwrap().responded.len(), 2);
    assert!(result
        .unresolved_concerns
        .iter()
        .any(|c| c.contains("unparseable review")));
}

#[tokio::test(start_paused = true)]
async fn execution_veto_loops_back_without_review() {
    let approve = approve();
    let panel = panel(critic_clients([&approve, &approve, &approve, &approve, &approve]));
    let orch = orchestrator(&panel).with_veto_probe(Arc::new(ScriptedVetoProbe::on_step(
        step_id_for(COMMON[2]),
        "license violation",
    )));

    let result = orch
        .run("Build a todo service", PlanningContext::default(), 2)
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Exhausted);
    assert_eq!(result.verdict, Some(Verdict::Reject));
    assert_eq!(result.iteration, Some(2));
    assert_eq!(result.unresolved_concerns, vec!["veto probe: license violation"]);
    let artifact = result.artifact.unwrap();
    assert!(artifact.vetoed());
    assert_eq!(artifact.files.len(), 2);
    assert_eq!(result.metrics.vetoes_issued, 2);
    for critic in &panel.critics {
        assert_eq!(critic.call_count(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn failed_execution_loops_back_instead_of_ending_the_session() {
    let approve = approve();
    let panel = Panel {
        writer: Arc::new(ScriptedCodeWriter::new().fail_persistent(step_id_for(COMMON[0]))),
        ..panel(critic_clients([&approve, &approve, &approve, &approve, &approve]))
    };
    let orch = orchestrator(&panel);

    let result = orch
        .run("Build a todo service", PlanningContext::default(), 2)
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::Exhausted);
    assert_eq!(result.verdict, Some(Verdict::NeedsRevision));
    assert_eq!(result.iterations_run, 2);
    assert_eq!(result.metrics.revisions_requested, 2);
    let artifact = result.artifact.unwrap();
    assert_eq!(artifact.file_count(), 0);
    assert!(artifact.partial);
    assert_eq!(artifact.failure_report.unwrap().failed.len(), 1);
    assert!(result
        .unresolved_concerns
        .iter()
        .any(|c| c.contains("failed after 1 attempt")));

    let second_round = &panel.planners[0].requests()[1];
    assert!(second_round.prompt.contains("EXECUTION FAILED"));
    for critic in &panel.critics {
        assert_eq!(critic.call_count(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn execution_deadline_keeps_finished_files() {
    let approve = approve();
    let writer = ScriptedCodeWriter::new().delay(step_id_for(COMMON[2]), Duration::from_secs(60));
    let panel = Panel {
        writer: Arc::new(writer),
        ..panel(critic_clients([&approve, &approve, &approve, &approve, &approve]))
    };
    let orch = orchestrator(&panel).with_timeouts(PhaseTimeouts {
        execution: Duration::from_secs(5),
        ..PhaseTimeouts::default()
    });

    let started = tokio::time::Instant::now();
    let result = orch
        .run("Build a todo service", PlanningContext::default(), 1)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(60));

    let artifact = result.artifact.unwrap();
    assert!(artifact.partial);
    let completed: Vec<_> = artifact.completed_steps().collect();
    assert_eq!(
        completed,
        vec![step_id_for(COMMON[0]).as_str(), step_id_for(COMMON[1]).as_str()]
    );
    let report = artifact.failure_report.unwrap();
    assert!(report.cancelled);
    assert!(report.failed.is_empty());
    assert_eq!(panel.writer.completed().len(), 2);
    // The partial artifact still goes to review.
    assert_eq!(result.metrics.reviews_conducted, 5);
}

#[tokio::test(start_paused = true)]
async fn slow_planner_does_not_block_planning() {
    let clients = vec![
        Arc::new(ScriptedAgentClient::replying(plan_json(&COMMON, "low"))),
        Arc::new(ScriptedAgentClient::replying(plan_json(&COMMON, "medium"))),
        Arc::new(ScriptedAgentClient::new().then(
            ScriptedReply::text(plan_json(&COMMON, "high")).delayed(Duration::from_secs(5)),
        )),
    ];
    let pool = planner_pool(&clients, Some(2));

    let started = tokio::time::Instant::now();
    let round = pool
        .propose_plans(
            "Build a todo service",
            &PlanningContext::default(),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(round.proposals.len(), 2);
    assert_eq!(round.report.responded, vec!["planner-0", "planner-1"]);
    assert_eq!(round.report.cancelled, vec!["planner-2"]);
    assert!(round.report.degraded());
}

#[tokio::test]
async fn filesystem_checkpoints_replay_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsCheckpointStore::new(dir.path()).unwrap());
    let approve = approve();
    let panel = panel(critic_clients([&approve, &approve, &approve, &approve, &approve]));
    let orch = GovernanceOrchestrator::new(
        planner_pool(&panel.planners, None),
        critic_pool(&panel.critics, None),
        panel.writer.clone(),
        store.clone(),
    );

    let result = orch
        .run("Build a todo service", PlanningContext::default(), 3)
        .await
        .unwrap();

    let keys = store.list(&result.session_id).await.unwrap();
    let phases: Vec<_> = keys.iter().map(|k| k.phase.as_str()).collect();
    assert_eq!(
        phases,
        vec!["planning", "synthesizing", "executing", "reviewing", "complete"]
    );

    for key in &keys {
        let record = store.load(key).await.unwrap();
        let state: OrchestrationState = serde_json::from_value(record.document).unwrap();
        let again: OrchestrationState =
            serde_json::from_str(&serde_json::to_string(&state).unwrap()).unwrap();
        assert_eq!(state.next_step(), again.next_step());
        assert_eq!(state.checkpoint_seq, key.seq);
    }

    let resumed = orch.resume(&result.session_id).await.unwrap();
    assert_eq!(resumed, result);
}
