//! Tribunal - governance orchestrator CLI
//!
//! The `tribunal` command drives governance sessions: rival planners
//! propose, the plans are merged and executed, and a critic panel decides.
//!
//! ## Commands
//!
//! - `run`: Start a new session and wait for its verdict
//! - `resume`: Continue a session from its latest checkpoint
//! - `status`: Show where a session stands
//! - `debate`: Show planner proposals and pairwise comparisons
//! - `reviews`: Show critic reviews of one iteration
//! - `checkpoints`: List the checkpoints of a session
//! - `sessions`: List every session with checkpoints
//! - `config`: Print the effective configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

use tribunal_core::{
    CheckpointStore, CriticReview, FsCheckpointStore, GovernanceConfig, GovernanceOrchestrator,
    GovernanceService, OrchestrationResult, OrchestrationState, Phase, PlanningContext,
    SessionStatus,
};
use tribunal_core::service::{debate_log, DebateEntry};
use tribunal_state::CheckpointKey;

#[derive(Parser)]
#[command(name = "tribunal")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Governance orchestrator for rival planning, execution and review agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to a TOML config file
    #[arg(short, long, global = true, env = "TRIBUNAL_CONFIG")]
    config: Option<PathBuf>,

    /// API key for the agent endpoint (default: the variable named by agent.api_key_env)
    #[arg(long, global = true, hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new governance session and wait for its verdict
    Run {
        /// Requirements text
        #[arg(short, long, conflicts_with = "requirements_file")]
        requirements: Option<String>,

        /// Read requirements from a file
        #[arg(long)]
        requirements_file: Option<PathBuf>,

        /// Planning hint as key=value (repeatable)
        #[arg(long = "context", value_parser = parse_key_val)]
        context: Vec<(String, String)>,

        /// Iteration budget (default: orchestrator.max_iterations)
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Continue a session from its latest checkpoint
    Resume {
        /// Session ID
        session: String,
    },

    /// Show where a session stands
    Status {
        /// Session ID
        session: String,
    },

    /// Show planner proposals and pairwise comparisons
    Debate {
        /// Session ID
        session: String,
    },

    /// Show critic reviews of one iteration
    Reviews {
        /// Session ID
        session: String,

        /// Iteration number (1-based)
        #[arg(short, long)]
        iteration: u32,
    },

    /// List the checkpoints of a session
    Checkpoints {
        /// Session ID
        session: String,
    },

    /// List every session with checkpoints
    Sessions,

    /// Print the effective configuration
    Config {
        /// Print as TOML instead of JSON
        #[arg(long)]
        toml: bool,
    },
}

/// Where a session stands, without the full history.
#[derive(Debug, Serialize)]
struct StatusView {
    session_id: String,
    status: SessionStatus,
    phase: Phase,
    iteration: u32,
    max_iterations: u32,
    iterations_recorded: usize,
    checkpoint_seq: u64,
    error: Option<String>,
}

impl From<&OrchestrationState> for StatusView {
    fn from(state: &OrchestrationState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            status: state.status,
            phase: state.phase,
            iteration: state.iteration,
            max_iterations: state.max_iterations,
            iterations_recorded: state.history.len(),
            checkpoint_seq: state.checkpoint_seq,
            error: state.error.clone(),
        }
    }
}

/// Parse a `key=value` pair.
fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tribunal_core::init_tracing(cli.json, level);

    let config = GovernanceConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load tribunal config")?;

    if let Commands::Config { toml } = cli.command {
        return cmd_config(&config, toml);
    }

    let store = FsCheckpointStore::new(config.checkpoint_dir()).with_context(|| {
        format!(
            "Failed to open checkpoint directory {}",
            config.checkpoint_dir().display()
        )
    })?;
    let store: Arc<dyn CheckpointStore> = Arc::new(store);
    let client = Arc::new(config.http_client(cli.api_key));
    let orchestrator = GovernanceOrchestrator::from_config(&config, client, Arc::clone(&store))
        .context("Invalid governance config")?;
    let service = GovernanceService::new(Arc::new(orchestrator));

    match cli.command {
        Commands::Run {
            requirements,
            requirements_file,
            context,
            max_iterations,
        } => {
            let requirements = read_requirements(requirements, requirements_file)?;
            let max_iterations = max_iterations.unwrap_or(config.orchestrator.max_iterations);
            let result = cmd_run(&service, &requirements, context, max_iterations).await?;
            print_json(&result)
        }
        Commands::Resume { session } => print_json(&cmd_resume(&service, &session).await?),
        Commands::Status { session } => print_json(&cmd_status(&service, &session).await?),
        Commands::Debate { session } => print_json(&cmd_debate(&service, &session).await?),
        Commands::Reviews { session, iteration } => {
            print_json(&cmd_reviews(&service, &session, iteration).await?)
        }
        Commands::Checkpoints { session } => {
            print_json(&cmd_checkpoints(store.as_ref(), &session).await?)
        }
        Commands::Sessions => print_json(&store.sessions().await?),
        Commands::Config { .. } => Ok(()),
    }
}

fn read_requirements(inline: Option<String>, file: Option<PathBuf>) -> Result<String> {
    let text = match (inline, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read requirements from {}", path.display()))?,
        (None, None) => bail!("Provide --requirements or --requirements-file"),
    };
    if text.trim().is_empty() {
        bail!("Requirements must not be empty");
    }
    Ok(text)
}

/// Start a session and wait for it. Ctrl-C cancels the session, which still
/// checkpoints before it stops.
async fn cmd_run(
    service: &GovernanceService,
    requirements: &str,
    context: Vec<(String, String)>,
    max_iterations: u32,
) -> Result<OrchestrationResult> {
    let hints: BTreeMap<String, String> = context.into_iter().collect();
    let session_id = service
        .start(requirements, PlanningContext::with_hints(hints), max_iterations)
        .await;
    info!(session_id = %session_id, max_iterations, "session started");
    wait_or_interrupt(service, &session_id).await
}

async fn cmd_resume(service: &GovernanceService, session_id: &str) -> Result<OrchestrationResult> {
    let session_id = service
        .resume(session_id)
        .await
        .with_context(|| format!("Failed to resume session {session_id}"))?;
    wait_or_interrupt(service, &session_id).await
}

async fn wait_or_interrupt(
    service: &GovernanceService,
    session_id: &str,
) -> Result<OrchestrationResult> {
    let result = tokio::select! {
        result = service.wait(session_id) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(session_id = %session_id, "interrupted, cancelling session");
            service.cancel(session_id).await?;
            service.wait(session_id).await
        }
    };
    result.with_context(|| format!("Session {session_id} failed"))
}

async fn cmd_status(service: &GovernanceService, session_id: &str) -> Result<StatusView> {
    let state = service
        .get_state(session_id)
        .await
        .with_context(|| format!("Session not found: {session_id}"))?;
    Ok(StatusView::from(&state))
}

async fn cmd_debate(service: &GovernanceService, session_id: &str) -> Result<Vec<DebateEntry>> {
    let state = service
        .get_state(session_id)
        .await
        .with_context(|| format!("Session not found: {session_id}"))?;
    Ok(debate_log(&state))
}

async fn cmd_reviews(
    service: &GovernanceService,
    session_id: &str,
    iteration: u32,
) -> Result<Vec<CriticReview>> {
    let reviews = service
        .get_review_details(session_id, iteration)
        .await
        .with_context(|| format!("Session not found: {session_id}"))?;
    if reviews.is_empty() {
        warn!(session_id = %session_id, iteration, "no reviews recorded for iteration");
    }
    Ok(reviews)
}

async fn cmd_checkpoints(store: &dyn CheckpointStore, session_id: &str) -> Result<Vec<CheckpointKey>> {
    store
        .list(session_id)
        .await
        .with_context(|| format!("Failed to list checkpoints of {session_id}"))
}

fn cmd_config(config: &GovernanceConfig, toml: bool) -> Result<()> {
    if toml {
        print!("{}", config.to_toml_string()?);
        Ok(())
    } else {
        print_json(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tribunal_core::fakes::{plan_json, review_json, ScriptedAgentClient};
    use tribunal_core::{
        CriticPool, CriticPoolConfig, CriticRegistration, Philosophy, PlannerPool,
        PlannerPoolConfig, PlannerRegistration, Specialty,
    };
    use tribunal_core::fakes::ScriptedCodeWriter;

    fn build_service(store: Arc<dyn CheckpointStore>) -> GovernanceService {
        let planners = Philosophy::all()
            .into_iter()
            .map(|philosophy| PlannerRegistration {
                planner_id: format!("{philosophy}-planner"),
                philosophy,
                client: Arc::new(ScriptedAgentClient::replying(plan_json(
                    &["Parse the input", "Write the report"],
                    "low",
                ))),
            })
            .collect();
        let critics = Specialty::all()
            .into_iter()
            .map(|specialty| {
                CriticRegistration::new(
                    format!("{specialty}-critic"),
                    specialty,
                    Arc::new(ScriptedAgentClient::replying(review_json("approve", &[]))),
                )
            })
            .collect();
        let orchestrator = GovernanceOrchestrator::new(
            PlannerPool::new(planners, PlannerPoolConfig::default()),
            CriticPool::new(critics, CriticPoolConfig::default()),
            Arc::new(ScriptedCodeWriter::new()),
            store,
        );
        GovernanceService::new(Arc::new(orchestrator))
    }

    #[test]
    fn parse_key_val_splits_on_first_equals() {
        assert_eq!(
            parse_key_val("stack=rust").unwrap(),
            ("stack".to_string(), "rust".to_string())
        );
        assert_eq!(
            parse_key_val("url = a=b").unwrap(),
            ("url".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("no-equals").is_err());
        assert!(parse_key_val("=value").is_err());
    }

    #[test]
    fn requirements_come_from_flag_or_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("req.md");
        std::fs::write(&path, "Build a CSV importer").unwrap();

        assert_eq!(
            read_requirements(None, Some(path)).unwrap(),
            "Build a CSV importer"
        );
        assert_eq!(read_requirements(Some("inline".into()), None).unwrap(), "inline");
        assert!(read_requirements(None, None).is_err());
        assert!(read_requirements(Some("  ".into()), None).is_err());
    }

    #[tokio::test]
    async fn run_then_inspect_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CheckpointStore> =
            Arc::new(FsCheckpointStore::new(dir.path()).unwrap());
        let service = build_service(Arc::clone(&store));

        let result = cmd_run(
            &service,
            "Build a CSV importer",
            vec![("stack".into(), "rust".into())],
            2,
        )
        .await
        .unwrap();
        assert!(result.approved);

        let status = cmd_status(&service, &result.session_id).await.unwrap();
        assert_eq!(status.status, SessionStatus::Approved);
        assert_eq!(status.iterations_recorded, 1);

        let debate = cmd_debate(&service, &result.session_id).await.unwrap();
        assert_eq!(debate.len(), 1);
        assert_eq!(debate[0].proposals.len(), 3);

        let reviews = cmd_reviews(&service, &result.session_id, 1).await.unwrap();
        assert_eq!(reviews.len(), 5);

        let keys = cmd_checkpoints(store.as_ref(), &result.session_id)
            .await
            .unwrap();
        assert_eq!(keys.len(), 5);
        assert_eq!(keys.last().unwrap().phase, "complete");

        // A fresh process sees the same session through the store.
        let fresh = build_service(Arc::clone(&store));
        let resumed = cmd_resume(&fresh, &result.session_id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Approved);
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn CheckpointStore> =
            Arc::new(FsCheckpointStore::new(dir.path()).unwrap());
        let service = build_service(store);
        let err = cmd_status(&service, "missing").await.unwrap_err();
        assert!(err.to_string().contains("Session not found"));
    }
}
