//! albuild - build and release pipeline for AL apps
//!
//! ## Commands
//!
//! - `build`: version, compile and (for `push`) sign and upload every manifest
//! - `fetch-compiler`: download and unpack the compiler package
//! - `submit`: submit a signed app to the partner marketplace

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use albuild_blob::{AzureBlobStore, BlobFetcher};
use albuild_core::marketplace::{
    find_app_file, find_library_app, product_name_for, MarketplaceClient,
};
use albuild_core::publisher::PublishResult;
use albuild_core::toolchain::{install_compiler, DEFAULT_INSTALL_DIR};
use albuild_core::{
    git, AppManifest, BuildConfig, BuildPipeline, EventKind, RunContext, CANONICAL_MANIFEST,
};

#[derive(Parser)]
#[command(name = "albuild")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, sign and publish AL app packages", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project directory holding the manifests (default: current directory)
    #[arg(long, global = true, env = "WORK_PATH")]
    work_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every *app.json manifest in the project directory
    Build {
        /// Repository name, used in artifact blob keys
        #[arg(short, long)]
        repo: String,

        /// Triggering event; only `push` signs and uploads
        #[arg(short, long)]
        event: Option<String>,

        /// Commit hash (auto-detected from the project directory if omitted)
        #[arg(short, long)]
        commit: Option<String>,
    },

    /// Download the compiler package and unpack it
    FetchCompiler {
        /// Installation directory
        #[arg(long, default_value = DEFAULT_INSTALL_DIR)]
        dest: PathBuf,
    },

    /// Submit a signed app to the marketplace
    Submit(SubmitOptions),
}

#[derive(Args)]
struct SubmitOptions {
    /// App file to submit (default: first .app in the current directory)
    #[arg(long)]
    app_file: Option<PathBuf>,

    /// Library app submitted alongside the main app
    /// (default: detected from MARKET_LIBRARY_DEPENDENCY in app.json)
    #[arg(long)]
    library_file: Option<PathBuf>,

    /// Directory searched for the library app (default: current directory)
    #[arg(long)]
    library_dir: Option<PathBuf>,

    /// Marketplace product name (default: derived from app.json)
    #[arg(long)]
    product: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    albuild_core::init_tracing(cli.json, level);

    let config = BuildConfig::from_env().context("Invalid configuration")?;
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let work_dir = cli.work_dir.unwrap_or_else(|| cwd.clone());

    match cli.command {
        Commands::Build {
            repo,
            event,
            commit,
        } => cmd_build(config, &work_dir, &cwd, &repo, event.as_deref(), commit.as_deref()).await,
        Commands::FetchCompiler { dest } => cmd_fetch_compiler(&config, &dest).await,
        Commands::Submit(options) => cmd_submit(&config, &work_dir, &cwd, options).await,
    }
}

fn blob_store(config: &BuildConfig) -> Result<Arc<AzureBlobStore>> {
    let blob = config.blob().context("Blob storage is not configured")?;
    let store = AzureBlobStore::new(blob.clone()).context("Failed to create blob client")?;
    Ok(Arc::new(store))
}

/// Build every manifest in `work_dir`, writing artifacts to `output_dir`
async fn cmd_build(
    config: BuildConfig,
    work_dir: &Path,
    output_dir: &Path,
    repo: &str,
    event: Option<&str>,
    commit: Option<&str>,
) -> Result<()> {
    let commit = git::resolve_commit(commit, work_dir).await;
    let ctx = RunContext::discover(repo, EventKind::parse(event), commit, work_dir, output_dir)
        .context("Failed to prepare build")?;

    let store = blob_store(&config)?;
    let pipeline = BuildPipeline::new(config, store);
    let reports = pipeline.run(&ctx).await.context("Build failed")?;

    for report in &reports {
        match &report.result {
            PublishResult::BuildOk {
                build_number,
                blob_key,
                sha256,
                ..
            } => {
                println!("{}: build {}", report.name, build_number);
                println!("  Uploaded: {}", blob_key);
                println!("  SHA-256:  {}", sha256);
            }
            PublishResult::CompileTestOk => {
                println!(
                    "{}: compile test {} {}",
                    report.name, report.version, report.short_commit
                );
            }
        }
    }
    Ok(())
}

/// Download and unpack the compiler package
async fn cmd_fetch_compiler(config: &BuildConfig, dest: &Path) -> Result<()> {
    let fetcher = BlobFetcher::new(blob_store(config)?);
    let binary = install_compiler(&fetcher, &config.toolchain, dest)
        .await
        .context("Failed to install compiler")?;

    println!("{}", binary.display());
    Ok(())
}

fn load_manifest(work_dir: &Path) -> Result<AppManifest> {
    let path = work_dir.join(CANONICAL_MANIFEST);
    AppManifest::load(&path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Submit an app (and optional library app) to the marketplace
async fn cmd_submit(
    config: &BuildConfig,
    work_dir: &Path,
    output_dir: &Path,
    options: SubmitOptions,
) -> Result<()> {
    let app_file = match options.app_file {
        Some(path) => path,
        None => find_app_file(output_dir).context("No app file to submit")?,
    };

    let product = match options.product {
        Some(name) => name,
        None => product_name_for(
            &load_manifest(work_dir)?.name,
            config.marketplace.product_prefix.as_deref(),
        ),
    };
    let library_file = match (options.library_file, &config.marketplace.library_dependency) {
        (Some(path), _) => Some(path),
        (None, Some(dependency)) => {
            let search_dir = options.library_dir.as_deref().unwrap_or(output_dir);
            find_library_app(
                &load_manifest(work_dir)?.dependencies,
                Some(dependency.as_str()),
                search_dir,
            )
            .context("Failed to locate the library app")?
        }
        (None, None) => None,
    };

    let client = MarketplaceClient::new(&config.marketplace)?;
    let token = client
        .authenticate()
        .await
        .context("Marketplace authentication failed")?;
    let found = client
        .find_product(&token, &product)
        .await
        .with_context(|| format!("Unable to find marketplace product {product:?}"))?;

    info!(product = %found.name, id = %found.id, "Found marketplace product");
    client
        .submit(&token, &found.id, &app_file, library_file.as_deref())
        .await
        .context("Marketplace submission failed")?;

    match &library_file {
        Some(library) => println!(
            "Submitted {} with library {} to {}",
            app_file.display(),
            library.display(),
            found.name
        ),
        None => println!("Submitted {} to {}", app_file.display(), found.name),
    }
    Ok(())
}
