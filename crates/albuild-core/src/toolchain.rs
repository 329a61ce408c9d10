//! Compiler package download and installation.

use std::path::{Path, PathBuf};

use albuild_blob::BlobFetcher;
use tracing::info;

use crate::config::ToolchainConfig;
use crate::error::{PipelineError, Result};

/// Default installation directory, relative to the project directory.
pub const DEFAULT_INSTALL_DIR: &str = "../alc";

const PACKAGE_FILE: &str = "alc.zip";

/// Locations of the compiler binary inside an extracted package, in order of
/// preference.
const BINARY_CANDIDATES: &[&str] = &["extension/bin/linux/alc", "linux/alc"];

/// Download, extract and mark the compiler executable. Returns the binary path.
pub async fn install_compiler(
    fetcher: &BlobFetcher,
    config: &ToolchainConfig,
    dest_dir: &Path,
) -> Result<PathBuf> {
    let container = config.container()?;
    let package = config.package()?;
    tokio::fs::create_dir_all(dest_dir).await?;

    let archive = dest_dir.join(PACKAGE_FILE);
    info!(container, package, dest = %dest_dir.display(), "Downloading compiler package");
    fetcher.fetch_to(container, package, &archive).await?;

    let extract_from = archive.clone();
    let extract_to = dest_dir.to_path_buf();
    tokio::task::spawn_blocking(move || extract(&extract_from, &extract_to))
        .await
        .map_err(|e| PipelineError::Archive(format!("extraction task failed: {e}")))??;
    tokio::fs::remove_file(&archive).await?;

    let binary = locate_binary(dest_dir)?;
    make_executable(&binary)?;
    info!(path = %binary.display(), "Compiler installed");
    Ok(binary)
}

fn extract(archive: &Path, dest_dir: &Path) -> Result<()> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    zip.extract(dest_dir)?;
    Ok(())
}

fn locate_binary(dest_dir: &Path) -> Result<PathBuf> {
    BINARY_CANDIDATES
        .iter()
        .map(|candidate| dest_dir.join(candidate))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            PipelineError::Config(format!(
                "compiler binary not found in package extracted to {}",
                dest_dir.display()
            ))
        })
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
