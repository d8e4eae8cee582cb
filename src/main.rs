#![forbid(unsafe_code)]

//! `agent-relay` — ACP bridge binary.
//!
//! Started by the editor; speaks ACP on stdin/stdout, so all diagnostics
//! go to stderr. Bootstraps configuration, the tracing subscriber, and the
//! ACP endpoint, then serves until the client closes the stream.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::acp::endpoint;
use agent_relay::config::RelayConfig;
use agent_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "ACP bridge for agent subprocesses", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Missing files are fine — the built-in defaults describe a stock
    /// `claude` child reachable on PATH.
    #[arg(long, default_value = "agent-relay.toml")]
    config: PathBuf,

    /// Log output format (text or json). Logs always go to stderr;
    /// stdout carries the protocol stream.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the agent executable from the config file.
    #[arg(long)]
    agent: Option<String>,

    /// Override the relay state directory.
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = RelayConfig::load_from_path(&args.config)?;
    if let Some(agent) = args.agent {
        config.agent.executable = agent;
    }
    if let Some(state_dir) = args.state_dir {
        config.state_dir = Some(state_dir);
    }

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    endpoint::serve(config, stdin, stdout).await
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))
}
