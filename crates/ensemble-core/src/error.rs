//! Unified error types for Ensemble

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Ensemble operations
#[derive(Error, Debug)]
pub enum EnsembleError {
    // Run structure errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    // Worker errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    // API errors
    #[error("API error: {0}")]
    Api(String),

    #[error("API limit reached: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Config file errors
    #[error("Config file error: {0}")]
    ConfigFile(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Failure of a single worker call.
///
/// Local to one turn: the coordinator records it on the round and treats it
/// as non-progress. It never aborts a run by itself.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum WorkerError {
    #[error("call cancelled")]
    Cancelled,

    #[error("worker is busy with another call")]
    Busy,

    #[error("worker unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("no response within {after_ms}ms")]
    TimedOut { after_ms: u64 },
}

/// Structural problems detected while planning a run
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no participants registered")]
    NoParticipants,

    #[error("duplicate participant key: {0}")]
    DuplicateParticipant(String),

    #[error("{0} must be greater than zero")]
    NonPositiveLimit(&'static str),

    #[error("synthesizer '{0}' is not a registered participant")]
    UnknownSynthesizer(String),

    #[error("similarity threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),
}

/// Result type alias using EnsembleError
pub type Result<T> = std::result::Result<T, EnsembleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_error_display() {
        assert_eq!(WorkerError::Busy.to_string(), "worker is busy with another call");
        assert_eq!(
            WorkerError::TimedOut { after_ms: 1500 }.to_string(),
            "no response within 1500ms"
        );
    }

    #[test]
    fn test_config_error_converts() {
        let err: EnsembleError = ConfigError::NonPositiveLimit("round_limit").into();
        assert_eq!(
            err.to_string(),
            "Configuration error: round_limit must be greater than zero"
        );
    }

    #[test]
    fn test_worker_error_serde_shape() {
        let json = serde_json::to_value(WorkerError::Unavailable("down".into())).unwrap();
        assert_eq!(json["kind"], "unavailable");
        assert_eq!(json["detail"], "down");
    }
}
