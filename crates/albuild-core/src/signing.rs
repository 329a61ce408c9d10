//! Key-vault code signing through an external tool.

use std::path::Path;

use tracing::{error, info};

use crate::config::SigningConfig;
use crate::error::{PipelineError, Result};
use crate::process::{self, CommandSpec, ProcessOutcome};

/// The signing command for `artifact`. Fails when credentials are missing.
pub fn sign_command(config: &SigningConfig, artifact: &Path) -> Result<CommandSpec> {
    let creds = config.credentials()?;
    Ok(CommandSpec::new(&config.tool)
        .arg("sign")
        .arg("-kvu")
        .arg(creds.vault_uri)
        .arg("-kvc")
        .arg(creds.certificate_name)
        .arg("-kvi")
        .arg(creds.application_id)
        .arg("-kvs")
        .secret_arg(creds.application_secret)
        .arg("-kvt")
        .arg(creds.tenant_id)
        .arg("-tr")
        .arg(&config.timestamp_url)
        .arg("-v")
        .arg(artifact.display().to_string()))
}

/// Sign `artifact` in place.
pub async fn sign(config: &SigningConfig, artifact: &Path) -> Result<()> {
    let spec = sign_command(config, artifact)?;
    info!(artifact = %artifact.display(), "Signing artifact");
    match process::run(&spec).await? {
        ProcessOutcome::Success { .. } => Ok(()),
        ProcessOutcome::Failure { exit_code, output } => {
            error!(artifact = %artifact.display(), exit_code, "Signing failed");
            Err(PipelineError::Sign {
                artifact: artifact.to_path_buf(),
                exit_code,
                output: output.combined(),
            })
        }
    }
}
