//! Compiler invocation and the permission-set shim that precedes it.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::config::CompilerConfig;
use crate::error::{PipelineError, Result};
use crate::manifest::AppManifest;
use crate::process::{self, CapturedOutput, CommandSpec, ProcessOutcome};
use crate::symbols::symbol_name;
use crate::version::VersionTag;

/// Runtimes at or above this use `PermissionSet*.al` objects instead of the
/// legacy XML permission file.
pub const PERMISSION_OBJECT_RUNTIME: f64 = 8.1;

const LEGACY_PERMISSION_FILE: &str = "extensionsPermissionSet.xml";
const PERMISSION_OBJECT_PREFIX: &str = "PermissionSet";

/// `{symbol_name(name)}_{version}_{short_commit}_unsigned.app`
pub fn artifact_file_name(app_name: &str, version: &VersionTag, short_commit: &str) -> String {
    format!(
        "{}_{}_{}_unsigned.app",
        symbol_name(app_name),
        version,
        short_commit
    )
}

/// Remove whichever permission definition the target runtime cannot accept.
///
/// Returns the removed files.
pub fn apply_permission_shim(work_dir: &Path, runtime: f64) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if runtime >= PERMISSION_OBJECT_RUNTIME {
        let legacy = work_dir.join(LEGACY_PERMISSION_FILE);
        if legacy.is_file() {
            std::fs::remove_file(&legacy)?;
            removed.push(legacy);
        }
    } else {
        for entry in std::fs::read_dir(work_dir)? {
            let path = entry?.path();
            let is_permission_object = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(PERMISSION_OBJECT_PREFIX) && n.ends_with(".al"))
                .unwrap_or(false);
            if is_permission_object && path.is_file() {
                std::fs::remove_file(&path)?;
                removed.push(path);
            }
        }
        removed.sort();
    }
    for path in &removed {
        debug!(path = %path.display(), runtime, "Removed permission definition");
    }
    Ok(removed)
}

/// Result of one compiler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Success {
        artifact: PathBuf,
        output: CapturedOutput,
    },
    Failure {
        exit_code: i32,
        output: CapturedOutput,
    },
}

impl CompileOutcome {
    /// Turn a failed compile into [`PipelineError::Compile`].
    pub fn into_artifact(self, manifest: &str) -> Result<PathBuf> {
        match self {
            CompileOutcome::Success { artifact, .. } => Ok(artifact),
            CompileOutcome::Failure { exit_code, output } => Err(PipelineError::Compile {
                manifest: manifest.to_string(),
                exit_code,
                output: output.combined(),
            }),
        }
    }
}

/// Runs the AL compiler for one project directory.
pub struct CompilerInvoker<'a> {
    config: &'a CompilerConfig,
    work_dir: &'a Path,
    output_dir: &'a Path,
}

impl<'a> CompilerInvoker<'a> {
    pub fn new(config: &'a CompilerConfig, work_dir: &'a Path, output_dir: &'a Path) -> Self {
        Self {
            config,
            work_dir,
            output_dir,
        }
    }

    /// Fail early when the configured compiler binary does not exist.
    pub fn ensure_available(&self) -> Result<()> {
        if self.config.program.is_file() {
            Ok(())
        } else {
            Err(PipelineError::Config(format!(
                "compiler not found at {} (set ALC_PATH or run `albuild fetch-compiler`)",
                self.config.program.display()
            )))
        }
    }

    /// The command line for compiling into `output_dir/out_name`.
    pub fn command(&self, manifest: &AppManifest, cache_dir: &Path, out_name: &str) -> CommandSpec {
        let cfg = self.config;
        CommandSpec::new(&cfg.program)
            .arg(format!("/packagecachepath:{}", cache_dir.display()))
            .arg(format!("/project:{}", self.work_dir.display()))
            .arg(format!("/out:{}", self.output_dir.join(out_name).display()))
            .arg(format!("/target:{}", manifest.target))
            .arg(format!("/loglevel:{}", cfg.log_level))
            .arg(format!("/errorlog:{}", cfg.error_log))
            .arg(format!("/generatereportlayout:{}", cfg.report_layout))
            .arg(format!(
                "/ruleset:{}",
                self.work_dir.join(&cfg.ruleset_file).display()
            ))
            .current_dir(self.work_dir)
    }

    pub async fn compile(
        &self,
        manifest: &AppManifest,
        cache_dir: &Path,
        out_name: &str,
    ) -> Result<CompileOutcome> {
        self.ensure_available()?;
        let spec = self.command(manifest, cache_dir, out_name);
        info!(app = %manifest.name, out = out_name, "Compiling");

        match process::run(&spec).await? {
            ProcessOutcome::Success { output } => {
                info!(app = %manifest.name, duration_ms = output.duration_ms, "Compile finished");
                Ok(CompileOutcome::Success {
                    artifact: self.output_dir.join(out_name),
                    output,
                })
            }
            ProcessOutcome::Failure { exit_code, output } => {
                error!(app = %manifest.name, exit_code, "Compiler returned non-zero exit code");
                Ok(CompileOutcome::Failure { exit_code, output })
            }
        }
    }
}
