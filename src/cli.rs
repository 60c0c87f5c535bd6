//! Command-line interface definition for Palaver
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for serving the HTTP backend, chatting, and
//! inspecting stored sessions and models.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Palaver - streaming chat sessions over local models
///
/// Streams model output with cooperative cancellation and keeps every
/// conversation durable with strictly ordered per-session saves.
#[derive(Parser, Debug, Clone)]
#[command(name = "palaver")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Storage backend override (json, sqlite, memory)
    #[arg(long, global = true)]
    pub storage_backend: Option<String>,

    /// Storage location override (directory for json, file for sqlite)
    #[arg(long, global = true)]
    pub storage_path: Option<PathBuf>,

    /// Ollama host override
    #[arg(long, global = true)]
    pub ollama_host: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Palaver
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP backend (streaming and session endpoints)
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:8000
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Start an interactive chat session
    Chat {
        /// Model to use for new turns
        #[arg(short, long)]
        model: Option<String>,

        /// Talk to a running `palaver serve` backend instead of local storage and Ollama
        #[arg(long)]
        remote: Option<String>,

        /// Session id to open instead of the most recent one
        #[arg(long)]
        resume: Option<String>,
    },

    /// Inspect and manage stored sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// List models available from the Ollama host
    Models {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Session management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// List sessions, most recently updated first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print one session's transcript
    Show {
        /// Session id
        id: String,

        /// Output the raw document as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a session
    Delete {
        /// Session id
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            storage_backend: None,
            storage_path: None,
            ollama_host: None,
            command: Commands::Sessions {
                command: SessionCommand::List { json: false },
            },
        }
    }
}
