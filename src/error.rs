//! Error types for neurogrow

use thiserror::Error;

/// Result type alias for neurogrow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the engine
///
/// Learning and querying never surface storage errors; these variants reach
/// callers only from explicit persistence and configuration calls.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Checkpoint failed after {attempts} attempts: {reason}")]
    CheckpointFailed { attempts: u32, reason: String },
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
