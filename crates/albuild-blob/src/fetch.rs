//! Streamed blob downloads with progress accounting.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::store::{file_name_of, BlobStore};
use crate::Result;

/// Progress of one download after a chunk has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes written so far.
    pub bytes: u64,
    /// Declared total size (always positive).
    pub total: u64,
    /// `floor(100 * bytes / total)`, capped at 100.
    pub percent: u8,
}

impl TransferProgress {
    pub fn new(bytes: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0
        } else {
            (bytes.saturating_mul(100) / total).min(100) as u8
        };
        Self {
            bytes,
            total,
            percent,
        }
    }
}

/// Receives progress updates for downloads.
pub trait ProgressSink: Send + Sync {
    fn report(&self, key: &str, progress: &TransferProgress);
}

/// Emits progress as `tracing` info events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, key: &str, progress: &TransferProgress) {
        info!(
            key,
            percent = progress.percent,
            kb = format!("{:.1}", progress.bytes as f64 / 1024.0),
            total_kb = format!("{:.1}", progress.total as f64 / 1024.0),
            "Download progress"
        );
    }
}

/// Downloads blobs into local directories.
#[derive(Clone)]
pub struct BlobFetcher {
    store: Arc<dyn BlobStore>,
    progress: Arc<dyn ProgressSink>,
}

impl BlobFetcher {
    /// Create a fetcher that logs progress through `tracing`.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_progress(store, Arc::new(LogProgress))
    }

    pub fn with_progress(store: Arc<dyn BlobStore>, progress: Arc<dyn ProgressSink>) -> Self {
        Self { store, progress }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Download `key` from `container` into `destination_dir`.
    ///
    /// The local file is named after the last `/` segment of the key. A
    /// transport failure mid-stream returns `BlobError::Transfer` and leaves
    /// the partially written file in place.
    pub async fn fetch(
        &self,
        container: &str,
        key: &str,
        destination_dir: &Path,
    ) -> Result<PathBuf> {
        let local_path = destination_dir.join(file_name_of(key));
        self.fetch_to(container, key, &local_path).await?;
        Ok(local_path)
    }

    /// Download `key` from `container` to an explicit file path.
    ///
    /// Progress is reported only when the whole percentage changes, so a
    /// blob streamed in many small chunks yields at most 101 reports.
    pub async fn fetch_to(&self, container: &str, key: &str, local_path: &Path) -> Result<u64> {
        info!(container, key, "Starting download");

        let mut download = self.store.open(container, key).await?;
        let total = download.size.filter(|s| *s > 0);
        let mut file = tokio::fs::File::create(local_path).await?;
        let mut bytes = 0u64;
        let mut last_percent = None;

        while let Some(chunk) = download.chunks.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;

            if let Some(total) = total {
                let progress = TransferProgress::new(bytes, total);
                if last_percent != Some(progress.percent) {
                    last_percent = Some(progress.percent);
                    self.progress.report(key, &progress);
                }
            }
        }
        file.flush().await?;

        info!(key, bytes, path = %local_path.display(), "Download complete");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent_floor() {
        assert_eq!(TransferProgress::new(1, 3).percent, 33);
        assert_eq!(TransferProgress::new(2, 3).percent, 66);
        assert_eq!(TransferProgress::new(3, 3).percent, 100);
    }

    #[test]
    fn test_progress_percent_capped() {
        assert_eq!(TransferProgress::new(10, 5).percent, 100);
    }

    #[test]
    fn test_progress_zero_total() {
        assert_eq!(TransferProgress::new(10, 0).percent, 0);
    }
}
