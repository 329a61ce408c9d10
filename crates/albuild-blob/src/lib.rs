//! albuild-blob: remote symbol and artifact storage
//!
//! This crate is the storage layer of albuild. It defines the `BlobStore`
//! seam, an Azure Blob REST implementation, an in-memory fake for tests and
//! the `BlobFetcher` that streams blobs into local cache directories.

pub mod azure;
pub mod error;
pub mod fakes;
pub mod fetch;
pub mod store;

pub use azure::{AzureBlobStore, BlobConfig, BlobCredential};
pub use error::BlobError;
pub use fakes::MemoryBlobStore;
pub use fetch::{BlobFetcher, LogProgress, ProgressSink, TransferProgress};
pub use store::{file_name_of, BlobDownload, BlobItem, BlobStore, ChunkStream};

/// Result type for blob operations
pub type Result<T> = std::result::Result<T, BlobError>;
