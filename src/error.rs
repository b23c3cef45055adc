/// Error types for Ambient Scribe
///
/// Uses thiserror for ergonomic error handling with proper Display implementations.
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session conflict: {0}")]
    SessionConflict(String),

    #[error("Session missing: {0}")]
    SessionMissing(String),

    #[error("Session finalized: {0}")]
    SessionFinalized(String),

    #[error("Log write failed: {0}")]
    LogWrite(String),

    #[error("Transcription error (transient): {0}")]
    AsrTransient(String),

    #[error("Transcription error (persistent): {0}")]
    AsrPersistent(String),

    #[error("Audio persistence error: {0}")]
    PersistenceWrite(String),

    #[error("Speaker recognition error: {0}")]
    SpeakerRecognition(String),

    #[error("Memory store error: {0}")]
    Memory(String),

    #[error("LLM service error: {0}")]
    Llm(String),

    #[error("Job timed out after {0:?}")]
    JobTimeout(std::time::Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether a retry is worthwhile for this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::AsrTransient(_)
                | AppError::Http(_)
                | AppError::LogWrite(_)
                | AppError::PersistenceWrite(_)
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
