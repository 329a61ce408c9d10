//! Blob store abstraction.
//!
//! `BlobStore` is the seam between the pipeline and remote storage:
//! list-by-prefix, streamed download and overwriting upload against named
//! containers. `AzureBlobStore` is the production backend; `MemoryBlobStore`
//! in the `fakes` module backs tests.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::Result;

/// A remote object found by a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    /// Full path-like key inside the container.
    pub name: String,
    /// Declared size in bytes, when the listing carries it.
    pub size: Option<u64>,
}

impl BlobItem {
    /// Last `/` segment of the key, used as the local file name.
    pub fn file_name(&self) -> &str {
        file_name_of(&self.name)
    }
}

/// Last `/` segment of a blob key.
pub fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Stream of body chunks for one download.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>>>;

/// An opened download: declared size plus the body as a chunk stream.
pub struct BlobDownload {
    /// Total size announced by the service; `None` or `Some(0)` when unknown.
    pub size: Option<u64>,
    pub chunks: ChunkStream,
}

impl std::fmt::Debug for BlobDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobDownload")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Remote blob storage.
///
/// Guarantees:
/// - `list` returns every blob whose key starts with `prefix`, in service order.
/// - `upload` overwrites an existing blob at the same key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List blobs in `container` whose key begins with `prefix`.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobItem>>;

    /// Open a streamed download of `key`.
    async fn open(&self, container: &str, key: &str) -> Result<BlobDownload>;

    /// Upload `data` to `key`, replacing any existing blob.
    async fn upload(&self, container: &str, key: &str, data: Vec<u8>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_last_segment() {
        let item = BlobItem {
            name: "22/microsoft/Base Application.app".to_string(),
            size: None,
        };
        assert_eq!(item.file_name(), "Base Application.app");
    }

    #[test]
    fn test_file_name_without_separator() {
        assert_eq!(file_name_of("22.base-app-symbols.zip"), "22.base-app-symbols.zip");
    }
}
