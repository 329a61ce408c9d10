//! Inputs that parameterize one pipeline execution.

use std::fmt;
use std::path::PathBuf;

use crate::error::{PipelineError, Result};
use crate::manifest::discover_manifests;

/// Name of the symbol cache directory created under the output directory.
pub const SYMBOL_CACHE_DIR: &str = "symbols";

/// Number of commit hash characters used in artifact and build names.
pub const SHORT_COMMIT_LEN: usize = 7;

/// The event that triggered the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Release-class event: version, sign and upload.
    Push,
    /// Anything else, including no event at all: test compile only.
    Other(Option<String>),
}

impl EventKind {
    pub fn parse(event: Option<&str>) -> Self {
        match event {
            Some("push") => EventKind::Push,
            other => EventKind::Other(other.map(str::to_string)),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, EventKind::Push)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Push => write!(f, "push"),
            EventKind::Other(Some(name)) => write!(f, "{name}"),
            EventKind::Other(None) => write!(f, "<none>"),
        }
    }
}

/// First seven characters of a commit hash (the whole hash if shorter).
pub fn short_commit(commit: &str) -> &str {
    match commit.char_indices().nth(SHORT_COMMIT_LEN) {
        Some((idx, _)) => &commit[..idx],
        None => commit,
    }
}

/// Shared inputs for every manifest processed in one invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub repo_name: String,
    pub event: EventKind,
    pub commit: String,
    /// Project directory holding the manifests and sources.
    pub work_dir: PathBuf,
    /// Directory receiving the symbol cache and the compiled artifact.
    pub output_dir: PathBuf,
    /// Manifests to build, in processing order.
    pub manifests: Vec<PathBuf>,
}

impl RunContext {
    /// Build a context, discovering every `*app.json` in `work_dir`.
    pub fn discover(
        repo_name: impl Into<String>,
        event: EventKind,
        commit: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let work_dir = work_dir.into();
        let manifests = discover_manifests(&work_dir)?;
        if manifests.is_empty() {
            return Err(PipelineError::NoManifests(work_dir));
        }
        Ok(Self {
            repo_name: repo_name.into(),
            event,
            commit: commit.into(),
            work_dir,
            output_dir: output_dir.into(),
            manifests,
        })
    }

    pub fn short_commit(&self) -> &str {
        short_commit(&self.commit)
    }

    pub fn symbol_cache_dir(&self) -> PathBuf {
        self.output_dir.join(SYMBOL_CACHE_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(EventKind::parse(Some("push")), EventKind::Push);
        assert!(EventKind::parse(Some("push")).is_production());
        assert!(!EventKind::parse(Some("pull_request")).is_production());
        assert!(!EventKind::parse(Some("Push")).is_production());
        assert!(!EventKind::parse(None).is_production());
    }

    #[test]
    fn test_short_commit() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("abc"), "abc");
        assert_eq!(short_commit(""), "");
    }

    #[test]
    fn test_discover_without_manifests_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunContext::discover("repo", EventKind::Push, "abc", dir.path(), dir.path())
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoManifests(_)));
    }

    #[test]
    fn test_discover_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.json"), "{}").unwrap();
        let out = dir.path().join("out");
        let ctx = RunContext::discover(
            "repo",
            EventKind::parse(Some("pull_request")),
            "0123456789",
            dir.path(),
            &out,
        )
        .unwrap();
        assert_eq!(ctx.manifests, vec![dir.path().join("app.json")]);
        assert_eq!(ctx.short_commit(), "0123456");
        assert_eq!(ctx.symbol_cache_dir(), out.join("symbols"));
    }
}
