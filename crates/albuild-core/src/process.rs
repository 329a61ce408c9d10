//! External process execution.
//!
//! Commands are described by a typed [`CommandSpec`] (program plus ordered
//! arguments), validated before launch, and their result is a
//! [`ProcessOutcome`]. Processes run to completion; there is no timeout.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// A program invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// Indices into `args` that must never be logged.
    secret_args: BTreeSet<usize>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            secret_args: BTreeSet::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append an argument that is redacted in `Display`/`Debug` output.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.insert(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Reject descriptors that cannot be launched.
    ///
    /// The program must be non-empty, and a program given as a path (rather
    /// than a bare name looked up on `PATH`) must exist.
    pub fn validate(&self) -> Result<()> {
        if self.program.as_os_str().is_empty() {
            return Err(PipelineError::InvalidCommand("empty program".to_string()));
        }
        let is_path = self.program.components().count() > 1;
        if is_path && !self.program.exists() {
            return Err(PipelineError::InvalidCommand(format!(
                "program not found: {}",
                self.program.display()
            )));
        }
        if let Some(arg) = self.args.iter().find(|a| a.contains('\0')) {
            return Err(PipelineError::InvalidCommand(format!(
                "argument contains NUL byte: {:?}",
                arg.replace('\0', "\\0")
            )));
        }
        Ok(())
    }

    fn rendered_args(&self) -> impl Iterator<Item = &str> {
        self.args.iter().enumerate().map(|(i, a)| {
            if self.secret_args.contains(&i) {
                "<redacted>"
            } else {
                a.as_str()
            }
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in self.rendered_args() {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.rendered_args().collect::<Vec<_>>())
            .field("current_dir", &self.current_dir)
            .finish()
    }
}

/// Captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CapturedOutput {
    /// stdout and stderr joined, for error reports.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success { output: CapturedOutput },
    /// Non-zero exit; `exit_code` is -1 when killed by a signal.
    Failure {
        exit_code: i32,
        output: CapturedOutput,
    },
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success { .. })
    }

    pub fn output(&self) -> &CapturedOutput {
        match self {
            ProcessOutcome::Success { output } | ProcessOutcome::Failure { output, .. } => output,
        }
    }
}

/// Validate and run `spec`, waiting for it to exit.
pub async fn run(spec: &CommandSpec) -> Result<ProcessOutcome> {
    spec.validate()?;
    debug!(command = %spec, "Launching process");

    let start = Instant::now();
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .await
        .map_err(|source| PipelineError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;

    let captured = CapturedOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    for line in captured.stdout.lines().chain(captured.stderr.lines()) {
        debug!(program = %program_name(&spec.program), "{line}");
    }

    if output.status.success() {
        Ok(ProcessOutcome::Success { output: captured })
    } else {
        Ok(ProcessOutcome::Failure {
            exit_code: output.status.code().unwrap_or(-1),
            output: captured,
        })
    }
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_redacts_secret_args() {
        let spec = CommandSpec::new("azuresigntool")
            .arg("sign")
            .arg("-kvs")
            .secret_arg("hunter2")
            .arg("app.app");
        let shown = spec.to_string();
        assert_eq!(shown, "azuresigntool sign -kvs <redacted> app.app");
        assert!(!format!("{spec:?}").contains("hunter2"));
        assert_eq!(spec.args[2], "hunter2");
    }

    #[test]
    fn test_validate_rejects_empty_program() {
        let err = CommandSpec::new("").validate().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidCommand(_)));
    }

    #[test]
    fn test_validate_rejects_missing_path() {
        let err = CommandSpec::new("./definitely/not/here/alc")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("program not found"));
    }

    #[test]
    fn test_validate_accepts_bare_names() {
        assert!(CommandSpec::new("echo").arg("hi").validate().is_ok());
    }

    #[test]
    fn test_combined_output() {
        let out = CapturedOutput {
            stdout: "compiled\n".to_string(),
            stderr: "warning\n".to_string(),
            duration_ms: 1,
        };
        assert_eq!(out.combined(), "compiled\nwarning");
        assert_eq!(CapturedOutput::default().combined(), "");
    }

    #[tokio::test]
    async fn test_run_simple_command() {
        let outcome = run(&CommandSpec::new("echo").arg("hello")).await.unwrap();
        assert!(outcome.is_success());
        assert!(outcome.output().stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_failing_command() {
        let outcome = run(&CommandSpec::new("false")).await.unwrap();
        match outcome {
            ProcessOutcome::Failure { exit_code, .. } => assert_ne!(exit_code, 0),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_respects_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&CommandSpec::new("pwd").current_dir(dir.path()))
            .await
            .unwrap();
        let printed = std::fs::canonicalize(outcome.output().stdout.trim()).unwrap();
        assert_eq!(printed, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_run_unknown_program_is_spawn_error() {
        let err = run(&CommandSpec::new("albuild-no-such-tool-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Spawn { .. }));
    }
}
