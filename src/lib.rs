//! Palaver - streaming chat-session engine
//!
//! Streams a model's answer to a caller with cooperative cancellation and
//! keeps every conversation durable with strictly ordered per-session
//! writes.
//!
//! # Architecture
//!
//! - `storage`: durable per-session documents ([`storage::SessionStore`])
//! - `gateway`: cancellable model streams ([`gateway::ModelGateway`])
//! - `transport`: SSE wire protocol, HTTP backend and remote clients
//! - `orchestrator`: single-flight turns, save queue, scroll-follow,
//!   lifecycle-guarded initialization
//! - `session`: data model and title derivation
//! - `config`, `cli`, `commands`, `error`, `telemetry`: the binary's plumbing
//!
//! # Example
//!
//! ```no_run
//! use palaver::orchestrator::{OrchestratorSettings, PinnedViewport, SessionOrchestrator};
//! use palaver::{Config, OllamaGateway};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let orchestrator = SessionOrchestrator::new(
//!         palaver::storage::open_store(&config.storage)?,
//!         Arc::new(OllamaGateway::new(&config.ollama)?),
//!         Arc::new(PinnedViewport),
//!         OrchestratorSettings::from(&config),
//!     );
//!     orchestrator.initialize(None).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{PalaverError, Result};
pub use gateway::{Frame, ModelGateway, OllamaGateway};
pub use orchestrator::SessionOrchestrator;
pub use session::{ChatSession, Message};
pub use storage::SessionStore;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
