use crate::Hunk;
use crate::gate::{ConcurrencyGate, GateError};
use crate::split::{self, SplitError};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("invalid git ref: {0}")]
    InvalidRef(String),
    #[error("malformed diff: {0}")]
    Split(#[from] SplitError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Which diff to split: `git diff <base> <head> -- <path>`.
#[derive(Debug, Clone)]
pub struct DiffRange {
    pub base: String,
    pub head: String,
    pub path: Option<String>,
}

impl DiffRange {
    fn args(&self) -> Vec<String> {
        let mut args = vec!["diff".to_string(), self.base.clone(), self.head.clone()];
        if let Some(path) = &self.path {
            args.push("--".to_string());
            args.push(path.clone());
        }
        args
    }
}

/// Validate a git ref to prevent shell injection (only for user-supplied refs).
pub fn validate_git_ref(ref_str: &str) -> Result<()> {
    if ref_str.is_empty() {
        return Err(GitError::InvalidRef("Empty git ref".to_string()));
    }

    for ch in ref_str.chars() {
        if !ch.is_alphanumeric()
            && !matches!(
                ch,
                '-' | '_' | '/' | '.' | '~' | '^' | '@' | ':' | '{' | '}'
            )
        {
            return Err(GitError::InvalidRef(format!(
                "Invalid character in git ref: '{}'",
                ch
            )));
        }
    }

    Ok(())
}

/// Run `git diff` and split its output while it streams, handing each hunk to
/// `sink`. Returns the number of hunks.
///
/// Failing to start git, a malformed separator, or a non-zero exit are all
/// fatal: everything downstream depends on this diff.
pub async fn split_diff_range<F>(gate: &ConcurrencyGate, range: &DiffRange, sink: F) -> Result<usize>
where
    F: FnMut(Hunk) -> split::Result<()>,
{
    validate_git_ref(&range.base)?;
    validate_git_ref(&range.head)?;

    let _slot = gate.acquire().await?;
    let args = range.args();
    tracing::debug!(?args, "spawning git");

    let mut child = Command::new("git")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| GitError::CommandFailed("git diff stdout not captured".to_string()))?;

    let split = split::split_stream(BufReader::new(stdout), sink).await;
    let status = child.wait().await?;
    let count = split?;

    if !status.success() {
        return Err(GitError::CommandFailed(format!("git diff exited with {status}")));
    }
    Ok(count)
}
