//! CLI entry point: wire the engine, tools, transport, and REPL together.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_core::{
    ApprovalGate, ApprovalMode, ApprovalState, EngineConfig, ResultCache, ToolExecutionOrchestrator,
    ToolRegistry,
};
use agent_tools::{register_builtin_tools, WorkspaceRoot};
use anyhow::Context;
use chat_api::{ChatApiClient, ChatApiConfig};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coding_agent::app::AgentApp;
use coding_agent::prompt::StdinPrompt;
use coding_agent::providers::{ChatCompletionsProvider, ChatProvider, MockProvider};

const DEFAULT_INSTRUCTIONS: &str = "You are a coding agent working inside the user's workspace. \
Use the available tools to read, search, and modify files; keep answers short and concrete.";

#[derive(Debug, Parser)]
#[command(name = "coding_agent", about = "Approval-gated CLI coding agent")]
struct Cli {
    /// Workspace root the agent operates in.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Model identifier requested from the provider.
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// Provider API key.
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    api_key: String,

    /// Provider base URL override.
    #[arg(long, default_value = "")]
    base_url: String,

    /// Approval mode: approve_all, approve_none, approve_write, interactive.
    #[arg(long, default_value = "approve_write")]
    approval: String,

    /// Cap on simultaneously executing tool calls.
    #[arg(long, default_value_t = agent_core::config::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Overall per-batch deadline in seconds.
    #[arg(long, default_value_t = 120)]
    execute_timeout_sec: u64,

    /// Use the offline mock provider instead of the HTTP transport.
    #[arg(long)]
    mock: bool,
}

fn parse_approval_mode(input: &str) -> anyhow::Result<ApprovalMode> {
    match input {
        "approve_all" => Ok(ApprovalMode::ApproveAll),
        "approve_none" => Ok(ApprovalMode::ApproveNone),
        "approve_write" => Ok(ApprovalMode::ApproveWrite),
        "interactive" => Ok(ApprovalMode::Interactive),
        other => anyhow::bail!("unknown approval mode '{other}'"),
    }
}

fn build_provider(cli: &Cli) -> anyhow::Result<Box<dyn ChatProvider>> {
    if cli.mock {
        return Ok(Box::new(MockProvider::text_only(
            "Mock provider ready; no model behind this session.",
        )));
    }

    let mut config = ChatApiConfig::new(cli.api_key.clone());
    if !cli.base_url.trim().is_empty() {
        config = config.with_base_url(cli.base_url.clone());
    }
    let client = ChatApiClient::new(config.with_timeout(Duration::from_secs(120)))
        .context("failed to build chat client")?;
    Ok(Box::new(ChatCompletionsProvider::new(client, cli.model.clone())))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let approval_mode = parse_approval_mode(&cli.approval)?;

    let workspace = Arc::new(
        WorkspaceRoot::new(&cli.workspace)
            .map_err(|error| anyhow::anyhow!("invalid workspace: {error}"))?,
    );
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, Arc::clone(&workspace))
        .context("failed to register builtin tools")?;

    let config = EngineConfig::new()
        .with_concurrency(cli.concurrency)
        .with_execute_timeout(Duration::from_secs(cli.execute_timeout_sec));
    let gate = ApprovalGate::new(
        approval_mode,
        ApprovalState::new(),
        Box::new(StdinPrompt::new()),
        config.approval_record_cap,
    );
    let cache = ResultCache::new(config.cache.clone());
    let orchestrator = ToolExecutionOrchestrator::new(
        Arc::new(registry),
        workspace,
        Arc::new(gate),
        config,
    );

    let provider = build_provider(&cli)?;
    let session_id = format!("session-{}", std::process::id());
    info!(session = %session_id, workspace = %cli.workspace.display(), "agent ready");

    let mut app = AgentApp::new(
        provider,
        orchestrator,
        cache,
        session_id,
        DEFAULT_INSTRUCTIONS,
    );

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if matches!(prompt, "exit" | "quit") {
            break;
        }

        let cancel = CancellationToken::new();
        match app.run_turn(prompt, &cancel).await {
            Ok(outcome) => {
                for report in &outcome.tool_reports {
                    writeln!(stdout, "{report}")?;
                }
                for narrative in &outcome.narrative {
                    writeln!(stdout, "{narrative}")?;
                }
            }
            Err(error) => {
                writeln!(stdout, "turn failed: {error}")?;
            }
        }
    }

    Ok(())
}
