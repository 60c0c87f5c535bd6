//! Durable session persistence
//!
//! [`SessionStore`] is the key-value contract the orchestrator and the HTTP
//! server program against. Three backends implement it:
//!
//! - [`JsonFileStore`]: one pretty-printed `{id}.json` document per session
//! - [`SqliteStore`]: a single SQLite database file
//! - [`MemoryStore`]: process-local, for tests and throwaway sessions
//!
//! Stores do not serialize concurrent writes to the same id. The
//! orchestrator's save queue owns that ordering. Each individual `save`
//! must still produce a complete document.

use crate::config::StorageConfig;
use crate::error::{PalaverError, Result};
use crate::session::{ChatSession, Message, SaveReceipt, SessionSummary};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

pub mod json_file;
pub mod memory;
pub mod sqlite;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Longest accepted session id
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Errors produced by a [`SessionStore`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No document for this id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The id contains characters outside `[A-Za-z0-9_-]` or is too long
    #[error("Invalid session id: {0:?}")]
    InvalidId(String),

    /// A document exists but could not be parsed
    #[error("Session {id} is corrupted: {reason}")]
    Corrupt { id: String, reason: String },

    /// Any read/write failure; retryable by the caller
    #[error("Storage I/O failure: {0}")]
    Io(String),
}

impl StoreError {
    pub fn io(err: impl std::fmt::Display) -> Self {
        StoreError::Io(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<StoreError> for PalaverError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::NotFound(id) => PalaverError::NotFound(id),
            StoreError::InvalidId(_) => PalaverError::Validation(message),
            StoreError::Corrupt { .. } | StoreError::Io(_) => PalaverError::Persistence(message),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable key-value persistence for conversation documents
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Summaries of every readable session, most recently updated first
    async fn list(&self) -> StoreResult<Vec<SessionSummary>>;

    /// Load a full session document
    async fn get(&self, id: &str) -> StoreResult<ChatSession>;

    /// Upsert a session, fully replacing its messages
    ///
    /// A new id gets `createdAt = updatedAt = now`. An existing id keeps its
    /// `createdAt` and gets `updatedAt = max(now, createdAt)`.
    async fn save(&self, id: &str, title: &str, messages: &[Message]) -> StoreResult<SaveReceipt>;

    /// Remove a session
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Short backend name for logs and diagnostics
    fn backend_name(&self) -> &'static str;
}

fn session_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern compiles"))
}

/// Reject ids that could escape a storage directory or break a URL path
pub fn validate_session_id(id: &str) -> StoreResult<()> {
    if id.len() > MAX_SESSION_ID_LEN || !session_id_pattern().is_match(id) {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Open the backend named in configuration
///
/// # Errors
///
/// Returns a configuration error for unknown backend names, or a
/// persistence error if the backend cannot be initialized.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match config.backend.as_str() {
        "json" => Arc::new(JsonFileStore::new(config.resolve_path()?)),
        "sqlite" => Arc::new(
            SqliteStore::new_with_path(config.resolve_path()?)
                .map_err(PalaverError::from)?,
        ),
        "memory" => Arc::new(MemoryStore::new()),
        other => {
            return Err(
                PalaverError::Config(format!("Unknown storage backend: {}", other)).into(),
            )
        }
    };

    tracing::debug!(backend = store.backend_name(), "Opened session store");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_generated_and_legacy_ids() {
        assert!(validate_session_id("chat-01HZX3Q9T6J8K2M4N5P7R8S9TV").is_ok());
        assert!(validate_session_id("chat_1712345678901").is_ok());
        assert!(validate_session_id("abc").is_ok());
    }

    #[test]
    fn test_validate_rejects_path_tricks() {
        for bad in ["", "../etc/passwd", "a/b", "a.json", "spaces here", "ü"] {
            assert_eq!(
                validate_session_id(bad),
                Err(StoreError::InvalidId(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_overlong_ids() {
        let long = "a".repeat(MAX_SESSION_ID_LEN + 1);
        assert!(validate_session_id(&long).is_err());
        assert!(validate_session_id(&long[1..]).is_ok());
    }

    #[test]
    fn test_store_error_maps_into_taxonomy() {
        let err: PalaverError = StoreError::NotFound("x".into()).into();
        assert!(matches!(err, PalaverError::NotFound(_)));

        let err: PalaverError = StoreError::InvalidId("../".into()).into();
        assert!(matches!(err, PalaverError::Validation(_)));

        let err: PalaverError = StoreError::Corrupt {
            id: "x".into(),
            reason: "eof".into(),
        }
        .into();
        assert!(matches!(err, PalaverError::Persistence(_)));
    }

    #[test]
    fn test_open_store_rejects_unknown_backend() {
        let config = StorageConfig {
            backend: "redis".into(),
            path: None,
        };
        let err = match open_store(&config) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("Unknown storage backend"));
    }

    #[test]
    fn test_open_store_memory_backend() {
        let config = StorageConfig {
            backend: "memory".into(),
            path: None,
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.backend_name(), "memory");
    }
}
