//! llmrelay - a streaming chat relay for a local Ollama daemon.
//!
//! Serves a browser front-end, forwards prompts to Ollama, streams the tokens
//! back as server-sent events and keeps a short, file-backed chat history per
//! session.

mod config;
mod daemon;
mod protocol;
mod store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llmrelay")]
#[command(author, version, about = "A streaming chat relay for a local Ollama daemon")]
struct Cli {
    /// Path to the config file (default: ~/.config/llmrelay/config.toml)
    #[arg(short = 'c', long, global = true, env = "LLMRELAY_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server in the foreground
    Serve {
        /// Override the listen host
        #[arg(long)]
        host: Option<String>,
        /// Override the listen port
        #[arg(short = 'p', long)]
        port: Option<u16>,
    },
    /// List stored chat sessions
    Sessions,
    /// List models available in Ollama
    Models,
    /// Open configuration file in $EDITOR
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };

    match cli.command {
        Commands::Serve { host, port } => serve(&config_path, host, port).await,
        Commands::Sessions => list_sessions(&config_path).await,
        Commands::Models => list_models(&config_path).await,
        Commands::Config => handle_config(&config_path),
    }
}

/// Run the relay server.
async fn serve(config_path: &Path, host: Option<String>, port: Option<u16>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("llmrelay=info".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .init();

    info!("Starting llmrelay...");

    let mut config = Config::load_from(config_path).context("Failed to load configuration")?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    info!(
        "Using Ollama at {} (default model: {})",
        config.ollama.base_url, config.ollama.model
    );

    let server = daemon::DaemonServer::new(config)?;
    server.run().await
}

/// Print the sessions held in the data file.
async fn list_sessions(config_path: &Path) -> Result<()> {
    let config = Config::load_from(config_path)?;
    let store = store::SessionStore::open(&config.memory);
    let sessions = store.list().await;

    println!("Chat Sessions ({})", store.len().await);
    println!("=============\n");

    if sessions.is_empty() {
        println!("No sessions stored in {}", config.memory.memory_file.display());
        return Ok(());
    }

    for session in sessions {
        println!(
            "  {}\n    messages: {}\n    created: {}\n    last active: {}\n    preview: {}\n",
            session.session_id,
            session.message_count,
            session.created_at,
            session.last_active,
            session.preview
        );
    }

    Ok(())
}

/// List available Ollama models.
async fn list_models(config_path: &Path) -> Result<()> {
    let config = Config::load_from(config_path)?;
    let client = daemon::llm::OllamaClient::new(&config.ollama)?;
    let data = client
        .list_models()
        .await
        .context("Failed to connect to Ollama. Is it running?")?;

    println!("Available Models");
    println!("================\n");

    let models = data
        .get("models")
        .and_then(|m| m.as_array())
        .cloned()
        .unwrap_or_default();
    if models.is_empty() {
        println!("No models installed.");
        return Ok(());
    }

    for model in models {
        let name = model.get("name").and_then(|n| n.as_str()).unwrap_or("unknown");
        let size = model
            .get("size")
            .and_then(|s| s.as_u64())
            .map(format_size)
            .unwrap_or_else(|| "?".to_string());
        let marker = if name == config.ollama.model { " (default)" } else { "" };
        println!("  {}{} ({})", name, marker, size);
    }

    Ok(())
}

/// Format bytes to human-readable size.
fn format_size(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;

    if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.0}MB", bytes as f64 / MB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Handle the config command.
fn handle_config(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        Config::default().save_to(config_path)?;
        println!("Created default config at {}", config_path.display());
    }

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let status = ProcessCommand::new(&editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        eprintln!("Editor exited with non-zero status");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(5 * 1024 * 1024), "5MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 / 2), "1.5GB");
    }

    #[test]
    fn test_cli_parses_serve_overrides() {
        let cli = Cli::try_parse_from(["llmrelay", "--config", "/tmp/x.toml", "serve", "-p", "8080"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
        assert!(matches!(cli.command, Commands::Serve { port: Some(8080), host: None }));
    }
}
