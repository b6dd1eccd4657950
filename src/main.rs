//! Thin CLI entry point.
//!
//! The session is created here, once per invocation, before any agent
//! runs; the audit trail is created from it and threaded through the
//! orchestrator. All policy logic lives in the library.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use warden::gate::ConsoleOperator;
use warden::{AuditTrail, Orchestrator, SessionContext};

#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "Agent orchestration with verify-then-commit tool gates and an append-only audit trail"
)]
struct Cli {
    /// Human identity running this session, for audit attribution.
    #[arg(short, long, global = true, env = "WARDEN_OPERATOR")]
    operator: Option<String>,

    /// Directory for audit JSONL streams.
    #[arg(long, global = true, env = "AUDIT_LOG_DIR", default_value = ".audit_logs")]
    audit_dir: PathBuf,

    /// Directory holding agent definition files.
    #[arg(long, global = true, default_value = "agents")]
    agents_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single agent on a task.
    Run {
        /// Path to the agent definition file (TOML).
        agent: PathBuf,
        /// Task description for the agent.
        task: String,
        /// Optional context string.
        #[arg(short, long, default_value = "")]
        context: String,
    },
    /// Run a multi-agent workflow: load every definition in the agents
    /// directory, then run the named entry agent.
    Orchestrate {
        /// Path to the entry agent definition file (TOML).
        agent: PathBuf,
        /// High-level task for the entry agent.
        task: String,
        #[arg(short, long, default_value = "")]
        context: String,
    },
    /// List the tools an agent definition enables, without running it.
    ListTools {
        /// Path to the agent definition file (TOML).
        agent: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            agent,
            task,
            context,
        } => {
            run_session(cli.operator, cli.audit_dir, cli.agents_dir, false, agent, task, context)
                .await
        }
        Command::Orchestrate {
            agent,
            task,
            context,
        } => {
            run_session(cli.operator, cli.audit_dir, cli.agents_dir, true, agent, task, context)
                .await
        }
        Command::ListTools { agent } => list_tools(&agent),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    operator: Option<String>,
    audit_dir: PathBuf,
    agents_dir: PathBuf,
    load_all: bool,
    agent_file: PathBuf,
    task: String,
    context: String,
) -> anyhow::Result<()> {
    let session = SessionContext::new(operator);
    let audit = Arc::new(
        AuditTrail::new(&audit_dir, &session).context("creating audit trail")?,
    );
    println!(
        "Session: {}  Audit log: {}",
        &session.session_id.simple().to_string()[..8],
        audit.path().display()
    );

    let orchestrator = Orchestrator::new(agents_dir, Arc::clone(&audit), Arc::new(ConsoleOperator));
    if load_all {
        orchestrator.load_agents_dir();
    }

    let result = Arc::clone(&orchestrator)
        .run_from_file(&agent_file, &task, &context)
        .await;
    audit.close().context("closing audit trail")?;

    match result {
        Ok(text) => {
            println!("\n=== Final Result ===\n{text}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn list_tools(agent_file: &PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(agent_file)
        .with_context(|| format!("reading {}", agent_file.display()))?;
    let config: warden::AgentConfig = toml::from_str(&raw)
        .with_context(|| format!("parsing {}", agent_file.display()))?;
    config.check_policy()?;

    println!("Tools for agent '{}':", config.name);
    for name in &config.tools.builtin {
        println!("  {name} (builtin)");
    }
    for external in &config.tools.external {
        println!("  [{}] via {} ({})", external.name, external.command, external.transport);
    }
    if !config.handoff.can_delegate_to.is_empty() {
        println!("  delegate (targets: {})", config.handoff.can_delegate_to.join(", "));
    }
    Ok(())
}
