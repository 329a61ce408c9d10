//! In-memory blob store (testing only)
//!
//! `MemoryBlobStore` satisfies the `BlobStore` contract without network
//! access, splits downloads into fixed-size chunks, records how often each
//! blob was opened and can be told to break a download mid-stream.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::error::BlobError;
use crate::store::{BlobDownload, BlobItem, BlobStore};
use crate::Result;

/// In-memory blob store backed by `container -> (key -> bytes)` maps.
#[derive(Debug)]
pub struct MemoryBlobStore {
    containers: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    opens: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, usize>>,
    chunk_size: usize,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self {
            containers: Mutex::default(),
            opens: Mutex::default(),
            failures: Mutex::default(),
            chunk_size: 4,
        }
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different download chunk size (minimum 1).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Seed a blob.
    pub fn insert(&self, container: &str, key: &str, data: impl Into<Vec<u8>>) {
        let mut containers = self.containers.lock().unwrap();
        containers
            .entry(container.to_string())
            .or_default()
            .insert(key.to_string(), data.into());
    }

    /// Read back a blob, e.g. one written by `upload`.
    pub fn get(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        let containers = self.containers.lock().unwrap();
        containers.get(container).and_then(|c| c.get(key)).cloned()
    }

    /// All keys currently stored in `container`.
    pub fn keys(&self, container: &str) -> Vec<String> {
        let containers = self.containers.lock().unwrap();
        containers
            .get(container)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of times `key` in `container` has been opened for download.
    pub fn open_count(&self, container: &str, key: &str) -> usize {
        let opens = self.opens.lock().unwrap();
        opens.get(&slot(container, key)).copied().unwrap_or(0)
    }

    /// Make downloads of `key` fail after `chunks` chunks have been delivered.
    pub fn fail_after(&self, container: &str, key: &str, chunks: usize) {
        let mut failures = self.failures.lock().unwrap();
        failures.insert(slot(container, key), chunks);
    }
}

fn slot(container: &str, key: &str) -> String {
    format!("{container}/{key}")
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobItem>> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .get(container)
            .map(|blobs| {
                blobs
                    .iter()
                    .filter(|(name, _)| name.starts_with(prefix))
                    .map(|(name, data)| BlobItem {
                        name: name.clone(),
                        size: Some(data.len() as u64),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn open(&self, container: &str, key: &str) -> Result<BlobDownload> {
        let data = self.get(container, key).ok_or_else(|| BlobError::NotFound {
            container: container.to_string(),
            key: key.to_string(),
        })?;
        *self
            .opens
            .lock()
            .unwrap()
            .entry(slot(container, key))
            .or_default() += 1;

        let fail_after = self.failures.lock().unwrap().get(&slot(container, key)).copied();
        let size = Some(data.len() as u64);

        let mut chunks: Vec<Result<Vec<u8>>> = data
            .chunks(self.chunk_size)
            .map(|c| Ok(c.to_vec()))
            .collect();
        if let Some(limit) = fail_after {
            chunks.truncate(limit);
            chunks.push(Err(BlobError::Transfer {
                key: key.to_string(),
                reason: "connection reset by peer".to_string(),
            }));
        }

        Ok(BlobDownload {
            size,
            chunks: stream::iter(chunks).boxed(),
        })
    }

    async fn upload(&self, container: &str, key: &str, data: Vec<u8>) -> Result<()> {
        self.insert(container, key, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let store = MemoryBlobStore::new();
        store.insert("deps", "22.base.zip", b"a".to_vec());
        store.insert("deps", "21.base.zip", b"b".to_vec());

        let items = store.list("deps", "22").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "22.base.zip");
        assert!(store.list("missing", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_overwrites() {
        let store = MemoryBlobStore::new();
        store.upload("apps", "k", b"one".to_vec()).await.unwrap();
        store.upload("apps", "k", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("apps", "k"), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_open_missing_blob() {
        let store = MemoryBlobStore::new();
        let err = store.open("deps", "nope").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_injected_failure_ends_stream_with_error() {
        let store = MemoryBlobStore::new().with_chunk_size(2);
        store.insert("deps", "k", b"abcdef".to_vec());
        store.fail_after("deps", "k", 1);

        let download = store.open("deps", "k").await.unwrap();
        let chunks: Vec<_> = download.chunks.collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(matches!(chunks[1], Err(BlobError::Transfer { .. })));
        assert_eq!(store.open_count("deps", "k"), 1);
    }
}
