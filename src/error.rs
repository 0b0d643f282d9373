//! Error types for the sleep detector

use thiserror::Error;

/// Errors that can occur while ingesting, tracking or persisting sleep data
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Invalid configuration value for {key}: {value}")]
    Config { key: String, value: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for DetectorError {
    fn from(e: tokio::task::JoinError) -> Self {
        DetectorError::Join(e.to_string())
    }
}
