//! Error types for albuild-blob

use thiserror::Error;

/// Errors that can occur while talking to the blob store
#[derive(Error, Debug)]
pub enum BlobError {
    /// Connection string could not be parsed
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// Request could not be sent or the response could not be read
    #[error("HTTP error: {0}")]
    Http(String),

    /// Service answered with a non-success status
    #[error("Blob service returned {status} for {key}")]
    Status { status: u16, key: String },

    /// Download broke off mid-stream
    #[error("Transfer of {key} failed: {reason}")]
    Transfer { key: String, reason: String },

    /// Blob does not exist
    #[error("Blob not found: {container}/{key}")]
    NotFound { container: String, key: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for BlobError {
    fn from(err: reqwest::Error) -> Self {
        BlobError::Http(err.to_string())
    }
}
