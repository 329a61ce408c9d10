//! Git integration for resolving the commit being built.

use std::path::Path;

use tokio::process::Command;

use crate::error::{PipelineError, Result};

/// Placeholder commit used when the working directory is not a repository.
pub const UNKNOWN_COMMIT: &str = "0000000000000000000000000000000000000000";

/// Capture the HEAD commit SHA of the repository containing `repo_dir`.
pub async fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .await
        .map_err(|e| PipelineError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::Git(format!(
            "git rev-parse HEAD failed: {}",
            stderr.trim()
        )));
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        return Err(PipelineError::Git(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }

    Ok(sha)
}

/// Explicit commit if given, else HEAD of `repo_dir`, else [`UNKNOWN_COMMIT`].
pub async fn resolve_commit(explicit: Option<&str>, repo_dir: &Path) -> String {
    if let Some(commit) = explicit.map(str::trim).filter(|c| !c.is_empty()) {
        return commit.to_string();
    }
    capture_head_sha(repo_dir).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Could not determine commit, using placeholder");
        UNKNOWN_COMMIT.to_string()
    })
}
