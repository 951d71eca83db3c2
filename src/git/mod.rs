use crate::parser::{ParseError, parse_patch};
use crate::{Diff, ParseLimits};
use std::io::BufReader;
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("invalid git revision: {0}")]
    InvalidRevision(String),
    #[error("cannot resolve '{revision}' to a commit: {stderr}")]
    BadCommit { revision: String, stderr: String },
    #[error("git command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Output format for [`raw_diff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawDiffFormat {
    /// Plain diff text, as fed to the parser.
    Diff,
    /// Mailbox-format patch text (`git format-patch`).
    Patch,
}

/// Validate a user-supplied revision to prevent shell injection.
pub fn validate_git_ref(ref_str: &str) -> Result<()> {
    if ref_str.is_empty() {
        return Err(GitError::InvalidRevision("empty git ref".to_string()));
    }

    // Check for shell metacharacters
    for ch in ref_str.chars() {
        if !ch.is_alphanumeric()
            && !matches!(
                ch,
                '-' | '_' | '/' | '.' | '~' | '^' | '@' | ':' | '{' | '}'
            )
        {
            return Err(GitError::InvalidRevision(format!(
                "invalid character in git ref: '{}'",
                ch
            )));
        }
    }

    Ok(())
}

/// Parsed diff of a commit against its first parent.
///
/// A commit without a parent is diffed against the empty tree, showing
/// its full content as additions.
pub fn diff_for_commit(repo_path: &Path, commit: &str, limits: ParseLimits) -> Result<Diff> {
    let oid = rev_parse(repo_path, commit)?;
    let parents = commit_parents(repo_path, &oid)?;

    match parents.first() {
        None => run_diff_command(repo_path, &["show", &oid], limits),
        Some(parent) => run_diff_command(repo_path, &["diff", "-M", parent, &oid], limits),
    }
}

/// Parsed diff between two commits.
pub fn diff_for_range(
    repo_path: &Path,
    before: &str,
    after: &str,
    limits: ParseLimits,
) -> Result<Diff> {
    let before_oid = rev_parse(repo_path, before)?;
    let after_oid = rev_parse(repo_path, after)?;
    run_diff_command(repo_path, &["diff", "-M", &before_oid, &after_oid], limits)
}

/// Raw diff or patch text of a commit against its first parent,
/// uninterpreted.
pub fn raw_diff(repo_path: &Path, commit: &str, format: RawDiffFormat) -> Result<String> {
    let oid = rev_parse(repo_path, commit)?;
    let parents = commit_parents(repo_path, &oid)?;

    let args: Vec<String> = match format {
        RawDiffFormat::Diff => match parents.first() {
            None => vec!["show".to_string(), oid],
            Some(parent) => vec![
                "diff".to_string(),
                "-M".to_string(),
                parent.clone(),
                oid,
            ],
        },
        RawDiffFormat::Patch => match parents.first() {
            None => vec![
                "format-patch".to_string(),
                "--no-signature".to_string(),
                "--stdout".to_string(),
                "--root".to_string(),
                oid,
            ],
            Some(parent) => vec![
                "format-patch".to_string(),
                "--no-signature".to_string(),
                "--stdout".to_string(),
                format!("{oid}...{parent}"),
            ],
        },
    };

    let output = Command::new("git")
        .args(&args)
        .current_dir(repo_path)
        .output()?;

    if !output.status.success() {
        return Err(command_failed(&args, &output.stderr));
    }

    Ok(String::from_utf8(output.stdout)?)
}

/// Spawn a git diff command and stream its stdout straight into the
/// parser.
///
/// The pipe is drained while the child runs; waiting first would deadlock
/// once the OS pipe buffer fills. On a parse failure the child is killed
/// before reaping, and the parse error wins over the exit status.
fn run_diff_command(repo_path: &Path, args: &[&str], limits: ParseLimits) -> Result<Diff> {
    log::debug!("running git {}", args.join(" "));

    let mut child = Command::new("git")
        .args(args)
        .current_dir(repo_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let parsed = match child.stdout.take() {
        Some(stdout) => parse_patch(limits, BufReader::new(stdout)),
        None => Err(ParseError::Io(std::io::Error::other(
            "child stdout not captured",
        ))),
    };

    if parsed.is_err() {
        let _ = child.kill();
    }
    let output = child.wait_with_output()?;

    let diff = parsed?;
    if !output.status.success() {
        return Err(command_failed(args, &output.stderr));
    }

    Ok(diff)
}

/// Resolve a revision to a full commit OID inside the repository.
fn rev_parse(repo_path: &Path, revision: &str) -> Result<String> {
    validate_git_ref(revision)?;

    let output = Command::new("git")
        .args(["rev-parse", "--verify", "--quiet"])
        .arg(format!("{revision}^{{commit}}"))
        .current_dir(repo_path)
        .output()?;

    if !output.status.success() {
        return Err(GitError::BadCommit {
            revision: revision.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8(output.stdout)?.trim().to_string())
}

/// Parent OIDs of a commit, in order.
fn commit_parents(repo_path: &Path, oid: &str) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args(["rev-list", "--parents", "-n", "1", oid])
        .current_dir(repo_path)
        .output()?;

    if !output.status.success() {
        return Err(GitError::BadCommit {
            revision: oid.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8(output.stdout)?;
    // First token is the commit itself, the rest are its parents.
    Ok(stdout
        .split_whitespace()
        .skip(1)
        .map(str::to_string)
        .collect())
}

fn command_failed<S: AsRef<str>>(args: &[S], stderr: &[u8]) -> GitError {
    let command = args
        .iter()
        .map(|a| a.as_ref())
        .collect::<Vec<_>>()
        .join(" ");
    GitError::CommandFailed {
        command: format!("git {command}"),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    }
}
