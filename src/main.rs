use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chat_bridge_core::{LineWriter, OllamaClient, Session, SessionConfig};

const LOG_ENV: &str = "CHAT_BRIDGE_LOG";

#[derive(Parser)]
#[command(name = "chat-bridge")]
#[command(about = "Bridge a desktop host to a local chat model over stdin/stdout")]
struct Cli {
    /// Directory holding config.json and system_prompt.txt
    /// (defaults to ../modelConfig next to the executable)
    #[arg(long, env = "CHAT_BRIDGE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Ollama base URL; overrides config.json and OLLAMA_HOST
    #[arg(long)]
    ollama_url: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    // Stdout carries the protocol and nothing else.
    let mut out = LineWriter::new(std::io::stdout());

    let config = SessionConfig::load_and_report(cli.config_dir.as_deref(), &mut out)?;

    let backend = OllamaClient::new(&config.ollama_base_url(cli.ollama_url.as_deref()));
    tracing::info!(
        model = %config.model_id,
        summary_model = %config.summary_model,
        url = %backend.base_url(),
        "starting session"
    );

    if tracing::enabled!(tracing::Level::DEBUG) {
        match backend.list_models().await {
            Ok(models) => tracing::debug!(?models, "backend reachable"),
            Err(e) => tracing::debug!(error = %e, "backend not reachable yet"),
        }
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut session = Session::new(backend, config);
    session.run(stdin, &mut out).await?;

    tracing::info!(history_len = session.history().len(), "session finished");
    Ok(())
}

/// Logging is off unless `CHAT_BRIDGE_LOG` is set; the host reads stderr
/// together with stdout.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder.with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}
