//! Charla command-line interface.
//!
//! `charla chat` wires the engine together with the in-memory store and the
//! configured provider, then runs a stdin REPL where each line is delivered
//! as one inbound unit of work.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use charla::agent::{Engine, InboundMessage};
use charla::config::Config;
use charla::providers::{AnthropicProvider, CompletionProvider, RetryProvider};
use charla::session::{FileBackend, KeyValueBackend, MemoryBackend, SessionStore};
use charla::tools::{build_registry, MemoryDirectory};
use charla::utils::logging::init_logging;

#[derive(Parser)]
#[command(name = "charla", version, about = "Conversational agent engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant on stdin/stdout
    Chat {
        /// Identity to converse as (defaults to "cli")
        #[arg(long, default_value = "cli")]
        identity: String,
    },
    /// Print the config file location
    ConfigPath,
}

/// CLI entry point.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Chat { identity } => chat(config, &identity).await,
        Commands::ConfigPath => {
            println!("{}", Config::path().display());
            Ok(())
        }
    }
}

async fn chat(config: Config, identity: &str) -> anyhow::Result<()> {
    let api_key = config
        .providers
        .anthropic
        .as_ref()
        .and_then(|p| p.api_key.clone());
    let Some(api_key) = api_key else {
        bail!(
            "no provider configured — set CHARLA_PROVIDERS_ANTHROPIC_API_KEY or edit {}",
            Config::path().display()
        );
    };

    let mut anthropic = AnthropicProvider::new(&api_key);
    if let Some(base) = config
        .providers
        .anthropic
        .as_ref()
        .and_then(|p| p.api_base.as_deref())
    {
        anthropic = anthropic.with_api_base(base);
    }
    let provider: Arc<dyn CompletionProvider> =
        Arc::new(RetryProvider::new(Box::new(anthropic)));

    let backend: Arc<dyn KeyValueBackend> = match &config.session.storage_path {
        Some(path) => Arc::new(FileBackend::new(path.into())?),
        None => Arc::new(MemoryBackend::new()),
    };
    let store = SessionStore::new(backend, config.session.clone());
    store.connect().await?;

    let registry = Arc::new(build_registry(
        &config.tools,
        Arc::new(MemoryDirectory::new()),
    ));
    let engine = Engine::new(config, store, provider, registry);

    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"charla ready. Type a message, or 'fin' to end.\n").await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let reply = engine
            .handle_message(&InboundMessage::new(identity, text))
            .await;
        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }

    engine.store().disconnect().await?;
    Ok(())
}
