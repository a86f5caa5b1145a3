//! Error types for elohim-scorm
//!
//! System-level failures only. RTE protocol errors never leave the API
//! boundary as `Result`s (see [`crate::rte::RteError`]), and import failures
//! have their own structured taxonomy in [`crate::package::ImportError`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScormError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid launch: {0}")]
    Launch(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Commit pipeline closed for session {0}")]
    PipelineClosed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
