//! End-to-end build for every manifest in a project directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use albuild_blob::{BlobFetcher, BlobStore};
use chrono::{Local, NaiveDateTime};
use tracing::{error, info, instrument};

use crate::compiler::{apply_permission_shim, artifact_file_name, CompilerInvoker};
use crate::config::BuildConfig;
use crate::context::RunContext;
use crate::error::Result;
use crate::manifest::{AppManifest, ManifestGuard};
use crate::publisher::{ArtifactPublisher, PublishResult};
use crate::symbols::SymbolResolver;
use crate::version::{self, VersionTag};

/// Outcome of building one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestReport {
    pub manifest: PathBuf,
    pub name: String,
    pub version: VersionTag,
    pub short_commit: String,
    pub result: PublishResult,
}

pub struct BuildPipeline {
    config: BuildConfig,
    store: Arc<dyn BlobStore>,
    fetcher: BlobFetcher,
}

impl BuildPipeline {
    pub fn new(config: BuildConfig, store: Arc<dyn BlobStore>) -> Self {
        let fetcher = BlobFetcher::new(store.clone());
        Self::with_fetcher(config, store, fetcher)
    }

    /// Use a custom fetcher, e.g. one with a different progress sink.
    pub fn with_fetcher(config: BuildConfig, store: Arc<dyn BlobStore>, fetcher: BlobFetcher) -> Self {
        Self {
            config,
            store,
            fetcher,
        }
    }

    /// Build every manifest in order, stopping at the first failure.
    pub async fn run(&self, ctx: &RunContext) -> Result<Vec<ManifestReport>> {
        self.run_at(ctx, Local::now().naive_local()).await
    }

    /// [`run`](Self::run) with an explicit clock reading for versioning.
    pub async fn run_at(&self, ctx: &RunContext, now: NaiveDateTime) -> Result<Vec<ManifestReport>> {
        CompilerInvoker::new(&self.config.compiler, &ctx.work_dir, &ctx.output_dir)
            .ensure_available()?;

        info!(
            repo = %ctx.repo_name,
            event = %ctx.event,
            commit = ctx.short_commit(),
            manifests = ctx.manifests.len(),
            "Starting build"
        );

        let mut reports = Vec::with_capacity(ctx.manifests.len());
        for manifest in &ctx.manifests {
            match self.process_manifest_at(ctx, manifest, now).await {
                Ok(report) => {
                    log_success(ctx, &report);
                    reports.push(report);
                }
                Err(e) => {
                    error!(
                        manifest = %manifest.display(),
                        commit = ctx.short_commit(),
                        error = %e,
                        "Build failed"
                    );
                    return Err(e);
                }
            }
        }
        Ok(reports)
    }

    /// Build one manifest. The working tree is restored before returning.
    #[instrument(skip_all, fields(manifest = %manifest.display()))]
    pub async fn process_manifest_at(
        &self,
        ctx: &RunContext,
        manifest: &Path,
        now: NaiveDateTime,
    ) -> Result<ManifestReport> {
        let mut guard = ManifestGuard::acquire(&ctx.work_dir, manifest)?;
        let result = self.build_active(ctx, manifest, &mut guard, now).await;
        let released = guard.release();
        let report = result?;
        released?;
        Ok(report)
    }

    async fn build_active(
        &self,
        ctx: &RunContext,
        manifest_path: &Path,
        guard: &mut ManifestGuard,
        now: NaiveDateTime,
    ) -> Result<ManifestReport> {
        let mut manifest = AppManifest::load(guard.active_path())?;
        let version = version::generate_at(&manifest, &ctx.event, now)?;
        manifest.set_version(&version);
        manifest.save()?;
        info!(app = %manifest.name, %version, "Version set");

        let out_name = artifact_file_name(&manifest.name, &version, ctx.short_commit());
        apply_permission_shim(&ctx.work_dir, manifest.runtime_version()?)?;

        let application_major = manifest.application_major()?;
        let cache_dir = SymbolResolver::new(
            &self.fetcher,
            &self.config.storage,
            self.config.symbol_concurrency,
        )
        .resolve(application_major, &manifest.dependencies, &ctx.symbol_cache_dir())
        .await?;

        let artifact = CompilerInvoker::new(&self.config.compiler, &ctx.work_dir, &ctx.output_dir)
            .compile(&manifest, &cache_dir, &out_name)
            .await?
            .into_artifact(&manifest_path.display().to_string())?;

        let result = ArtifactPublisher::new(&self.config, self.store.clone())
            .publish(&artifact, application_major, &version, ctx)
            .await?;

        if ctx.event.is_production() && !guard.is_substituted() {
            guard.persist();
        }

        Ok(ManifestReport {
            manifest: manifest_path.to_path_buf(),
            name: manifest.name,
            version,
            short_commit: ctx.short_commit().to_string(),
            result,
        })
    }
}

fn log_success(ctx: &RunContext, report: &ManifestReport) {
    match &report.result {
        PublishResult::BuildOk {
            build_number,
            blob_key,
            ..
        } => info!(
            repo = %ctx.repo_name,
            app = %report.name,
            build_number = %build_number,
            key = %blob_key,
            "Successful Build {} {}",
            report.version,
            report.short_commit
        ),
        PublishResult::CompileTestOk => info!(
            repo = %ctx.repo_name,
            app = %report.name,
            "Successful Compile Test {} {}",
            report.version,
            report.short_commit
        ),
    }
}
