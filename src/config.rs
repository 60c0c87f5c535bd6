//! Configuration management for Palaver
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//! Later layers win: file, then `PALAVER_*` environment variables, then
//! command-line flags.

use crate::error::{PalaverError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Main configuration structure for Palaver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP backend settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream Ollama settings
    #[serde(default)]
    pub ollama: OllamaConfig,
    /// Session storage settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Interactive chat and orchestrator settings
    #[serde(default)]
    pub chat: ChatConfig,
}

/// HTTP backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Origins allowed by CORS; `*` allows any origin
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    [
        "http://localhost:5173",
        "http://localhost:5174",
        "tauri://localhost",
        "https://tauri.localhost",
        "http://tauri.localhost",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind.parse().map_err(|e| {
            PalaverError::Config(format!("Invalid server.bind {:?}: {}", self.bind, e)).into()
        })
    }
}

/// Ollama upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama server base URL
    #[serde(default = "default_ollama_host")]
    pub host: String,

    /// Model used when the caller does not pick one
    #[serde(default = "default_ollama_model")]
    pub model: String,

    /// Deadline for non-streaming calls, and the longest gap tolerated
    /// between two chunks of a streamed reply
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Time allowed to establish the upstream connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_ollama_model(),
            request_timeout_seconds: default_request_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

/// Session storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend name: `json`, `sqlite` or `memory`
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Directory (json) or database file (sqlite); defaults under the
    /// platform data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_storage_backend() -> String {
    "json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

pub const STORAGE_BACKENDS: [&str; 3] = ["json", "sqlite", "memory"];

impl StorageConfig {
    /// Location the selected backend should use
    ///
    /// An explicit `path` wins. Otherwise `chats/` (json) or `sessions.db`
    /// (sqlite) under the platform data directory.
    pub fn resolve_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }

        let dirs = ProjectDirs::from("dev", "palaver", "palaver").ok_or_else(|| {
            PalaverError::Config("Could not determine data directory".to_string())
        })?;
        let data_dir = dirs.data_dir();
        Ok(match self.backend.as_str() {
            "sqlite" => data_dir.join("sessions.db"),
            _ => data_dir.join("chats"),
        })
    }
}

/// Chat front end and orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base URL of a `palaver serve` backend used by `chat --remote`
    #[serde(default)]
    pub backend_url: Option<String>,

    /// How long shutdown waits for queued saves to settle
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_seconds: u64,

    /// Buffer size of the orchestrator event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_flush_timeout() -> u64 {
    10
}

fn default_event_capacity() -> usize {
    256
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            flush_timeout_seconds: default_flush_timeout(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from file, env vars, and CLI overrides
    ///
    /// A missing file is not an error; defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PalaverError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse a YAML document; every section and field is optional
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| PalaverError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(host) = std::env::var("PALAVER_OLLAMA_HOST") {
            self.ollama.host = host;
        }

        if let Ok(model) = std::env::var("PALAVER_OLLAMA_MODEL") {
            self.ollama.model = model;
        }

        if let Ok(timeout) = std::env::var("PALAVER_OLLAMA_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.ollama.request_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid PALAVER_OLLAMA_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(backend) = std::env::var("PALAVER_STORAGE_BACKEND") {
            self.storage.backend = backend.to_lowercase();
        }

        if let Ok(path) = std::env::var("PALAVER_STORAGE_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }

        if let Ok(bind) = std::env::var("PALAVER_SERVER_BIND") {
            self.server.bind = bind;
        }

        if let Ok(origins) = std::env::var("PALAVER_ALLOWED_ORIGINS") {
            let origins: Vec<String> = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !origins.is_empty() {
                tracing::debug!(?origins, "Env override: PALAVER_ALLOWED_ORIGINS");
                self.server.allowed_origins = origins;
            }
        }

        if let Ok(url) = std::env::var("PALAVER_BACKEND_URL") {
            self.chat.backend_url = Some(url);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(backend) = &cli.storage_backend {
            self.storage.backend = backend.to_lowercase();
        }

        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(path.clone());
        }

        if let Some(host) = &cli.ollama_host {
            self.ollama.host = host.clone();
        }

        match &cli.command {
            crate::cli::Commands::Serve { bind: Some(bind) } => {
                self.server.bind = bind.clone();
            }
            crate::cli::Commands::Chat { model, remote, .. } => {
                if let Some(model) = model {
                    self.ollama.model = model.clone();
                }
                if let Some(url) = remote {
                    self.chat.backend_url = Some(url.clone());
                }
            }
            _ => {}
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.ollama.host.trim().is_empty() {
            return Err(PalaverError::Config("ollama.host cannot be empty".to_string()).into());
        }

        url::Url::parse(&self.ollama.host).map_err(|e| {
            PalaverError::Config(format!("Invalid ollama.host {:?}: {}", self.ollama.host, e))
        })?;

        if self.ollama.request_timeout_seconds == 0 || self.ollama.connect_timeout_seconds == 0 {
            return Err(PalaverError::Config(
                "ollama timeouts must be greater than 0".to_string(),
            )
            .into());
        }

        if !STORAGE_BACKENDS.contains(&self.storage.backend.as_str()) {
            return Err(PalaverError::Config(format!(
                "Invalid storage backend: {}. Must be one of: {}",
                self.storage.backend,
                STORAGE_BACKENDS.join(", ")
            ))
            .into());
        }

        self.server.socket_addr()?;

        if let Some(url) = &self.chat.backend_url {
            url::Url::parse(url).map_err(|e| {
                PalaverError::Config(format!("Invalid chat.backend_url {:?}: {}", url, e))
            })?;
        }

        if self.chat.event_capacity == 0 {
            return Err(PalaverError::Config(
                "chat.event_capacity must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
