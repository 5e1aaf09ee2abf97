//! Error types for the memory service

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, MemoriaError>;

/// Crate-wide error type, one variant per behavioral error kind rather than
/// per call site.
#[derive(Error, Debug)]
pub enum MemoriaError {
    #[error("store error: {0}")]
    Store(String),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("chain integrity error for session {session_id}: {detail}")]
    Chain { session_id: String, detail: String },

    #[error("indexing error: {0}")]
    Indexing(String),

    #[error("upstream generator error: {0}")]
    Generator(String),

    #[error("upstream embedder error: {0}")]
    Embedder(String),

    #[error("upstream call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MemoriaError {
    /// Whether a failed operation is worth retrying (upstream transient only).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoriaError::Generator(_)
                | MemoriaError::Embedder(_)
                | MemoriaError::Timeout(_)
                | MemoriaError::Http(_)
        )
    }

    /// Whether this is a store-read failure on an auxiliary path, which the
    /// caller should degrade from rather than propagate.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            MemoriaError::Store(_)
                | MemoriaError::Embedder(_)
                | MemoriaError::Generator(_)
                | MemoriaError::Timeout(_)
                | MemoriaError::Chain { .. }
                | MemoriaError::Indexing(_)
        )
    }
}
