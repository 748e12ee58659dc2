//! mcp-agents CLI entry point.

use mcp_agents::backend::{Provider, ReasoningEffort, Selection};
use mcp_agents::config::{Config, DEFAULT_TIMEOUT_MS, ModelConfig};
use mcp_agents::passthrough::PassthroughSession;

use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "mcp-agents", version)]
#[command(about = "Expose claude, gemini or codex to MCP clients over stdio")]
struct Cli {
    /// Backend to serve
    #[arg(long, value_enum, default_value_t = Provider::Claude)]
    provider: Provider,

    /// Default per-call timeout budget in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Run gemini in sandbox mode unless a call says otherwise
    #[arg(long)]
    sandbox: bool,

    /// Model passed to claude
    #[arg(long)]
    claude_model: Option<String>,

    /// Model passed to gemini
    #[arg(long)]
    gemini_model: Option<String>,

    /// Model passed to codex
    #[arg(long)]
    codex_model: Option<String>,

    /// Reasoning effort passed to codex (minimal, low, medium, high)
    #[arg(long)]
    codex_reasoning_effort: Option<ReasoningEffort>,

    /// Executable to run instead of the provider's default
    #[arg(long)]
    command: Option<String>,

    /// Also write logs to a daily-rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            provider: self.provider,
            default_timeout_ms: self.timeout_ms,
            sandbox: self.sandbox,
            models: ModelConfig {
                claude: self.claude_model.clone(),
                gemini: self.gemini_model.clone(),
                codex: self.codex_model.clone(),
            },
            codex_reasoning_effort: self.codex_reasoning_effort,
            command: self.command.clone(),
            log_dir: self.log_dir.clone(),
            debug: self.debug,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match mcp_agents::logging::init(cli.debug, cli.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("[mcp-agents] failed to initialize logging: {error:#}");
            return ExitCode::FAILURE;
        }
    };

    // Panics only log here. A panic inside a tool call surfaces as that call's
    // error; one on the main task is caught below and ends the process.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("[mcp-agents] panic: {info}");
    }));

    let outcome = tokio::spawn(async move { run(&cli).await }).await;

    match outcome {
        Ok(Ok(code)) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Ok(Err(error)) => {
            tracing::error!("[mcp-agents] fatal: {error:#}");
            ExitCode::FAILURE
        }
        Err(error) => {
            tracing::error!("[mcp-agents] fatal: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<i32> {
    let config = cli
        .config()
        .validate()
        .context("invalid startup configuration")?;

    tracing::info!(
        provider = %config.provider,
        timeout_ms = config.default_timeout_ms,
        sandbox = config.sandbox,
        "starting mcp-agents"
    );

    match config.selection() {
        Selection::Tools(backend) => {
            mcp_agents::mcp::serve_stdio(backend, config.default_timeout()).await?;
            Ok(0)
        }
        Selection::Passthrough(passthrough) => {
            tracing::info!("[mcp-agents] ready (provider: {})", config.provider);
            let code = PassthroughSession::new(passthrough)
                .run()
                .await
                .context("pass-through session failed")?;
            Ok(code)
        }
    }
}
