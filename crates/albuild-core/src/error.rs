//! Error taxonomy for the build pipeline.

use std::path::PathBuf;

use albuild_blob::BlobError;

/// Errors raised while reading, validating or writing a project manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("cannot read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse manifest {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("manifest {} is missing required field `{field}`", .path.display())]
    MissingField { path: PathBuf, field: String },

    #[error("manifest field `{field}` has invalid value {value:?}: {reason}")]
    InvalidField {
        field: String,
        value: String,
        reason: String,
    },

    #[error("cannot write manifest {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Pipeline errors. Every variant is fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("transfer failed: {0}")]
    Transfer(#[from] BlobError),

    #[error("compiling {manifest} failed with exit code {exit_code}")]
    Compile {
        manifest: String,
        exit_code: i32,
        output: String,
    },

    #[error("signing {} failed with exit code {exit_code}", .artifact.display())]
    Sign {
        artifact: PathBuf,
        exit_code: i32,
        output: String,
    },

    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: BlobError,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("no *app.json manifests found in {}", .0.display())]
    NoManifests(PathBuf),

    #[error("git error: {0}")]
    Git(String),

    #[error("marketplace error: {0}")]
    Marketplace(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Marketplace(err.to_string())
    }
}

impl From<zip::result::ZipError> for PipelineError {
    fn from(err: zip::result::ZipError) -> Self {
        PipelineError::Archive(err.to_string())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
