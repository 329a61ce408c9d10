//! Post-compile handling of the artifact: discard, or sign and upload.

use std::path::Path;
use std::sync::Arc;

use albuild_blob::BlobStore;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::signing;
use crate::symbols::symbol_name;
use crate::version::VersionTag;

/// What happened to a compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    /// Test compile; the artifact was discarded.
    CompileTestOk,
    /// Signed and uploaded.
    BuildOk {
        version: VersionTag,
        /// `{version}_{short_commit}`
        build_number: String,
        blob_key: String,
        sha256: String,
    },
}

/// `{application_major}/{symbol_name(repo)}/{file_name}`
pub fn artifact_blob_key(application_major: u32, repo_name: &str, file_name: &str) -> String {
    format!("{application_major}/{}/{file_name}", symbol_name(repo_name))
}

pub struct ArtifactPublisher<'a> {
    config: &'a BuildConfig,
    store: Arc<dyn BlobStore>,
}

impl<'a> ArtifactPublisher<'a> {
    pub fn new(config: &'a BuildConfig, store: Arc<dyn BlobStore>) -> Self {
        Self { config, store }
    }

    /// Discard or sign and upload `artifact` depending on the run's event.
    ///
    /// A signing failure leaves the artifact on disk; nothing is uploaded.
    pub async fn publish(
        &self,
        artifact: &Path,
        application_major: u32,
        version: &VersionTag,
        ctx: &RunContext,
    ) -> Result<PublishResult> {
        if !ctx.event.is_production() {
            remove_if_present(artifact).await?;
            return Ok(PublishResult::CompileTestOk);
        }

        let container = self.config.storage.artifacts()?;
        signing::sign(&self.config.signing, artifact).await?;

        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                PipelineError::Config(format!("artifact path {} has no file name", artifact.display()))
            })?;
        let blob_key = artifact_blob_key(application_major, &ctx.repo_name, &file_name);

        let data = tokio::fs::read(artifact).await?;
        let sha256 = hex::encode(Sha256::digest(&data));
        let size = data.len();

        info!(container, key = %blob_key, size, "Uploading artifact");
        self.store
            .upload(container, &blob_key, data)
            .await
            .map_err(|source| PipelineError::Upload {
                key: blob_key.clone(),
                source,
            })?;

        remove_if_present(artifact).await?;
        Ok(PublishResult::BuildOk {
            version: *version,
            build_number: format!("{version}_{}", ctx.short_commit()),
            blob_key,
            sha256,
        })
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed local artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
