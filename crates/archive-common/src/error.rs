//! Error types for the archiver.

use thiserror::Error;

/// Result type alias using ArchiveError.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Primary error type for archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    // === Per-file outcomes ===
    #[error("File not found: {0}")]
    SourceNotFound(String),

    #[error("File already present in upload area: {0}")]
    AlreadyUploaded(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    // === Batch-level setup ===
    #[error("Failed to create upload directory '{path}': {message}")]
    DirectoryBootstrap { path: String, message: String },

    // === Protocol errors ===
    #[error("Object store error: {0}")]
    Source(String),

    #[error("Upload server error: {0}")]
    Remote(String),

    #[error("Invalid source locator: {0}")]
    InvalidLocator(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// I/O failures surface while bytes are moving, so they are transfer errors.
impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Transfer(err.to_string())
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::Internal(format!("JSON error: {}", err))
    }
}
