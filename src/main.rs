use anyhow::Result;
use clap::{Parser, Subcommand};
use qingyan_config::{Config, ConfigWatcher, LogConfig, LogFormat};
use qingyan_relay::{AgentClient, DialogRequest};
use qingyan_types::{CredentialSource, DONE_SENTINEL, RelayError, RelayEvent};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt::writer::BoxMakeWriter};

#[derive(Parser, Debug)]
#[command(name = "qingyan", about = "qingyan — streaming relay for the Qingyan assistant API")]
struct Cli {
    /// Path to the YAML configuration file (default: `QINGYAN_*` env only).
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Exchange the API key pair for a bearer token and report its lifetime.
    Token,
    /// Open a new conversation and print its id.
    Bootstrap {
        /// Assistant id.
        agent_id: String,
    },
    /// Stream one turn, printing each payload on its own line. Ctrl-C aborts.
    Chat {
        /// Assistant id.
        agent_id: String,
        /// Existing conversation id (default: start a new one).
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,
        /// Prompt; a blank prompt is replaced by the configured greeting.
        prompt: String,
    },
    /// Send one message and print the raw aggregate response.
    Send {
        /// Assistant id.
        agent_id: String,
        /// Existing conversation id.
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, watcher) = match &cli.config {
        Some(path) => {
            let watcher = ConfigWatcher::new(path.clone())
                .map_err(|e| anyhow::anyhow!("config error: {e}"))?;
            (Config::clone(&watcher.load()), Some(Arc::new(watcher)))
        }
        None => (
            Config::from_env().map_err(|e| anyhow::anyhow!("config error: {e}"))?,
            None,
        ),
    };
    let _log_guard = init_logging(&config.log);

    let source: Arc<dyn CredentialSource> = match &watcher {
        Some(w) => Arc::clone(w) as Arc<dyn CredentialSource>,
        None => Arc::new(config.clone()),
    };
    let client = AgentClient::with_source(&config, source)?;

    let result = match cli.command {
        Commands::Token => cmd_token(&client).await,
        Commands::Bootstrap { agent_id } => cmd_bootstrap(&client, &agent_id).await,
        Commands::Chat {
            agent_id,
            conversation,
            prompt,
        } => {
            // a streamed turn can outlast a key rotation
            if let Some(w) = watcher {
                if let Err(e) = w.watch() {
                    tracing::warn!(error = %e, "config hot-reload unavailable");
                }
            }
            cmd_chat(&client, agent_id, conversation, prompt).await
        }
        Commands::Send {
            agent_id,
            conversation,
            message,
        } => cmd_send(&client, &agent_id, conversation.as_deref(), &message).await,
    };

    client.shutdown().await;
    result
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
fn init_logging(log: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let (writer, guard) = match &log.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let prefix = path
                .file_name()
                .map_or_else(|| "qingyan.log".into(), ToOwned::to_owned);
            let (w, g) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, prefix));
            (BoxMakeWriter::new(w), Some(g))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    guard
}

async fn cmd_token(client: &AgentClient) -> Result<()> {
    let credential = client.credential().await?;
    if credential.expires_in_secs > 0 {
        println!("token obtained, expires in {}s", credential.expires_in_secs);
    } else {
        println!("token obtained, no expiry reported");
    }
    Ok(())
}

async fn cmd_bootstrap(client: &AgentClient, agent_id: &str) -> Result<()> {
    let id = client.create_conversation_id(agent_id).await?;
    println!("{id}");
    Ok(())
}

async fn cmd_chat(
    client: &AgentClient,
    agent_id: String,
    conversation: Option<String>,
    prompt: String,
) -> Result<()> {
    let request = DialogRequest::new(agent_id, conversation.as_deref(), prompt);
    let handle = client
        .relay(request, |event: RelayEvent| match event {
            RelayEvent::Data(payload) if payload != DONE_SENTINEL => println!("{payload}"),
            _ => {}
        })
        .await;

    let abort = handle.abort_handle();
    let outcome = tokio::select! {
        r = handle.wait() => r,
        _ = tokio::signal::ctrl_c() => {
            abort.abort();
            eprintln!("aborted");
            Err(RelayError::Cancelled)
        }
    };
    outcome?;
    Ok(())
}

async fn cmd_send(
    client: &AgentClient,
    agent_id: &str,
    conversation: Option<&str>,
    message: &str,
) -> Result<()> {
    let raw = client.send_dialog_once(agent_id, conversation, message).await?;
    print!("{raw}");
    Ok(())
}
