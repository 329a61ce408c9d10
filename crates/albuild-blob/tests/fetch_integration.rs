//! Integration tests for BlobFetcher with MemoryBlobStore.

use albuild_blob::{BlobError, BlobFetcher, MemoryBlobStore, ProgressSink, TransferProgress};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<TransferProgress>>,
}

impl ProgressSink for RecordingSink {
    fn report(&self, _key: &str, progress: &TransferProgress) {
        self.seen.lock().unwrap().push(*progress);
    }
}

/// Test: blob lands under its last key segment with identical bytes
#[tokio::test]
async fn test_fetch_writes_file_named_after_last_segment() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("symbols", "22/microsoft/System.app", b"system symbols".to_vec());
    let dir = tempfile::tempdir().unwrap();

    let fetcher = BlobFetcher::new(store.clone());
    let path = fetcher
        .fetch("symbols", "22/microsoft/System.app", dir.path())
        .await
        .expect("fetch failed");

    assert_eq!(path, dir.path().join("System.app"));
    assert_eq!(std::fs::read(&path).unwrap(), b"system symbols");
}

/// Test: progress is reported per percent change and never decreases
#[tokio::test]
async fn test_progress_is_monotonic() {
    let store = Arc::new(MemoryBlobStore::new().with_chunk_size(3));
    store.insert("symbols", "22.base.zip", vec![7u8; 10]);
    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();

    let fetcher = BlobFetcher::with_progress(store, sink.clone());
    fetcher
        .fetch("symbols", "22.base.zip", dir.path())
        .await
        .expect("fetch failed");

    let seen = sink.seen.lock().unwrap();
    assert_eq!(seen.len(), 4, "10 bytes in chunks of 3 -> 4 chunks");
    assert!(seen.windows(2).all(|w| w[0].percent <= w[1].percent));
    assert!(seen.windows(2).all(|w| w[0].bytes < w[1].bytes));
    assert_eq!(seen.last().unwrap().percent, 100);
    assert_eq!(seen.last().unwrap().bytes, 10);
}

/// Test: many small chunks report only when the whole percentage changes
#[tokio::test]
async fn test_progress_throttled_to_whole_percent_changes() {
    let store = Arc::new(MemoryBlobStore::new().with_chunk_size(1));
    store.insert("symbols", "22.large.zip", vec![1u8; 1000]);
    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();

    BlobFetcher::with_progress(store, sink.clone())
        .fetch("symbols", "22.large.zip", dir.path())
        .await
        .expect("fetch failed");

    let seen = sink.seen.lock().unwrap();
    // 1000 one-byte chunks: 0% after the first byte, then 1..=100.
    assert_eq!(seen.len(), 101);
    assert!(seen.windows(2).all(|w| w[0].percent < w[1].percent));
    assert_eq!(seen.first().unwrap().percent, 0);
    assert_eq!(seen.last().unwrap().percent, 100);
    assert_eq!(seen.last().unwrap().bytes, 1000);
}

/// Test: empty blob reports no progress (unknown/zero total)
#[tokio::test]
async fn test_empty_blob_reports_no_progress() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("symbols", "22.empty.zip", Vec::new());
    let sink = Arc::new(RecordingSink::default());
    let dir = tempfile::tempdir().unwrap();

    let path = BlobFetcher::with_progress(store, sink.clone())
        .fetch("symbols", "22.empty.zip", dir.path())
        .await
        .expect("fetch failed");

    assert!(path.exists());
    assert!(sink.seen.lock().unwrap().is_empty());
}

/// Test: mid-stream failure surfaces a transfer error and leaves the partial file
#[tokio::test]
async fn test_mid_stream_failure_leaves_partial_file() {
    let store = Arc::new(MemoryBlobStore::new().with_chunk_size(4));
    store.insert("symbols", "22.big.zip", b"0123456789abcdef".to_vec());
    store.fail_after("symbols", "22.big.zip", 2);
    let dir = tempfile::tempdir().unwrap();

    let err = BlobFetcher::new(store)
        .fetch("symbols", "22.big.zip", dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err, BlobError::Transfer { .. }));
    let partial = dir.path().join("22.big.zip");
    assert!(partial.exists(), "partial file stays on disk");
    assert_eq!(std::fs::read(partial).unwrap(), b"01234567");
}

/// Test: missing blob fails before any file is created
#[tokio::test]
async fn test_missing_blob_creates_no_file() {
    let store = Arc::new(MemoryBlobStore::new());
    let dir = tempfile::tempdir().unwrap();

    let err = BlobFetcher::new(store)
        .fetch("symbols", "22.none.zip", dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err, BlobError::NotFound { .. }));
    assert!(!dir.path().join("22.none.zip").exists());
}
