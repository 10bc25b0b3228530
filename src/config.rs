//! Configuration management for llmrelay.
//!
//! Configuration is loaded from `~/.config/llmrelay/config.toml` unless a path
//! is given on the command line.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Downstream Ollama settings.
    #[serde(default)]
    pub ollama: OllamaConfig,
    /// Session store settings.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Front-end UI settings, handed to the browser as-is.
    #[serde(default)]
    pub ui: Map<String, Value>,
    /// Front-end visualization settings, handed to the browser as-is.
    #[serde(default)]
    pub neural_visualization: Map<String, Value>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding the front-end bundle.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

/// Downstream Ollama settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama host URL (default: http://localhost:11434).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model used when a request does not name one.
    #[serde(default = "default_model")]
    pub model: String,
    /// Name shown in the UI instead of the raw model tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Stall timeout for the streaming generate call, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Timeout for the availability check, in seconds.
    #[serde(default = "default_check_timeout")]
    pub connection_check_timeout: u64,
    /// How many prior turns are sent along with a prompt.
    #[serde(default = "default_history_limit")]
    pub history_context_limit: usize,
    #[serde(default)]
    pub api_endpoints: ApiEndpoints,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            display_name: None,
            request_timeout: default_request_timeout(),
            connection_check_timeout: default_check_timeout(),
            history_context_limit: default_history_limit(),
            api_endpoints: ApiEndpoints::default(),
        }
    }
}

impl OllamaConfig {
    pub fn generate_url(&self) -> String {
        join_url(&self.base_url, &self.api_endpoints.generate)
    }

    pub fn tags_url(&self) -> String {
        join_url(&self.base_url, &self.api_endpoints.tags)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_check_timeout)
    }

    /// Display name, falling back to the model tag.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.model)
    }
}

/// Paths of the Ollama endpoints, relative to `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoints {
    #[serde(default = "default_generate_path")]
    pub generate: String,
    #[serde(default = "default_tags_path")]
    pub tags: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            generate: default_generate_path(),
            tags: default_tags_path(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_generate_path() -> String {
    "/api/generate".to_string()
}

fn default_tags_path() -> String {
    "/api/tags".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_check_timeout() -> u64 {
    5
}

fn default_history_limit() -> usize {
    10
}

/// Session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_max_history")]
    pub max_history_per_session: usize,
    /// Snapshot file for all sessions.
    #[serde(default = "default_memory_file")]
    pub memory_file: PathBuf,
    /// Write a snapshot after every mutation.
    #[serde(default = "default_true")]
    pub auto_save: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_history_per_session: default_max_history(),
            memory_file: default_memory_file(),
            auto_save: true,
        }
    }
}

fn default_max_sessions() -> usize {
    10
}

fn default_max_history() -> usize {
    20
}

fn default_memory_file() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("llmrelay"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chat_memory.json")
}

fn default_true() -> bool {
    true
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl Config {
    /// Get the config directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("llmrelay"))
            .context("Could not determine config directory")
    }

    /// Get the default config file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from a file, using defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Self = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ollama.base_url.trim().is_empty() {
            bail!("ollama.base_url must not be empty");
        }
        if self.ollama.model.trim().is_empty() {
            bail!("ollama.model must not be empty");
        }
        if self.memory.max_sessions == 0 {
            bail!("memory.max_sessions must be at least 1");
        }
        Ok(())
    }

    /// The subset of configuration exposed to the front-end.
    pub fn frontend_view(&self) -> Value {
        serde_json::json!({
            "ollama": {
                "model": self.ollama.model,
                "display_name": self.ollama.display_name(),
            },
            "ui": self.ui,
            "neural_visualization": self.neural_visualization,
        })
    }
}
