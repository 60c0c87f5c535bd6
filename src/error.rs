//! Error types for Palaver
//!
//! This module defines the engine-wide error taxonomy using `thiserror`.
//! Application code propagates errors as `anyhow::Error` through the
//! [`Result`] alias and downcasts to [`PalaverError`] where the class of
//! failure matters (HTTP status mapping, validation vs. not-found).

use thiserror::Error;

/// Main error type for Palaver operations
///
/// The first six variants form the engine taxonomy. `Validation` and
/// `NotFound` propagate to the immediate caller. `Transport`, `Upstream`
/// and `Persistence` are absorbed by the orchestrator and turned into
/// history entries or log lines.
#[derive(Error, Debug)]
pub enum PalaverError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected input (empty message, missing model id, bad session id)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown session id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Network or stream failure between the engine and a backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// Error reported by the model backend itself
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Store I/O failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Palaver operations
pub type Result<T> = anyhow::Result<T>;

/// Find the [`PalaverError`] carried by an `anyhow::Error`, if any
pub fn classify(err: &anyhow::Error) -> Option<&PalaverError> {
    err.chain().find_map(|cause| cause.downcast_ref::<PalaverError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_config_error_display() {
        let error = PalaverError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_validation_error_display() {
        let error = PalaverError::Validation("message is empty".to_string());
        assert_eq!(error.to_string(), "Validation error: message is empty");
    }

    #[test]
    fn test_not_found_error_display() {
        let error = PalaverError::NotFound("chat-1".to_string());
        assert_eq!(error.to_string(), "Session not found: chat-1");
    }

    #[test]
    fn test_upstream_error_display() {
        let error = PalaverError::Upstream("model not loaded".to_string());
        assert_eq!(error.to_string(), "Upstream error: model not loaded");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: PalaverError = io_error.into();
        assert!(error.to_string().contains("IO error"));
    }

    #[test]
    fn test_classify_sees_through_context() {
        let err: anyhow::Error = Err::<(), _>(PalaverError::NotFound("abc".into()))
            .context("loading session")
            .unwrap_err();
        assert!(matches!(classify(&err), Some(PalaverError::NotFound(id)) if id == "abc"));
    }

    #[test]
    fn test_classify_returns_none_for_foreign_errors() {
        let err = anyhow::anyhow!("something else");
        assert!(classify(&err).is_none());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PalaverError>();
    }
}
