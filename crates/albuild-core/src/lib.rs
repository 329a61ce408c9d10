//! albuild core: versioning, symbol resolution, compile, sign and publish.
//!
//! A run discovers every `*app.json` manifest in a project directory and,
//! for each one, stamps a version, downloads the symbol archives the
//! compiler needs, compiles the app and then either discards the artifact
//! (test compile) or signs and uploads it (production build).

pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod git;
pub mod manifest;
pub mod marketplace;
pub mod pipeline;
pub mod process;
pub mod publisher;
pub mod signing;
pub mod symbols;
pub mod telemetry;
pub mod toolchain;
pub mod version;

pub use compiler::{apply_permission_shim, artifact_file_name, CompileOutcome, CompilerInvoker};
pub use config::{
    BuildConfig, CompilerConfig, MarketplaceConfig, SigningConfig, StorageConfig, ToolchainConfig,
};
pub use context::{short_commit, EventKind, RunContext};
pub use error::{ManifestError, PipelineError, Result};
pub use manifest::{discover_manifests, AppManifest, Dependency, ManifestGuard, CANONICAL_MANIFEST};
pub use marketplace::{find_app_file, find_library_app, product_name_for, MarketplaceClient};
pub use pipeline::{BuildPipeline, ManifestReport};
pub use process::{CapturedOutput, CommandSpec, ProcessOutcome};
pub use publisher::{artifact_blob_key, ArtifactPublisher, PublishResult};
pub use symbols::{symbol_name, SymbolResolver};
pub use telemetry::init_tracing;
pub use toolchain::install_compiler;
pub use version::VersionTag;
