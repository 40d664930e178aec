use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitToolingError {
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),
    #[error("git {command} failed ({code}): {stderr}")]
    CommandFailed {
        command: String,
        code: String,
        stderr: String,
    },
    #[error("git produced non-UTF-8 output")]
    NonUtf8Output,
}

/// Run one git command and return its stdout.
///
/// stdout and stderr are fully drained before the exit status is
/// inspected; the child is reaped on every path, including cancellation
/// of the enclosing future.
async fn run_git(
    cwd: Option<&Path>,
    args: &[&str],
    stdin: Option<&str>,
) -> Result<String, GitToolingError> {
    let mut command = Command::new("git");
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!("running git {}", args.join(" "));

    let mut child = command.spawn()?;
    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }
    }
    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(GitToolingError::CommandFailed {
            command: args.join(" "),
            code: output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string()),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    String::from_utf8(output.stdout).map_err(|_| GitToolingError::NonUtf8Output)
}

/// Clone `url` into `dest`. The parent directory is created as needed.
pub async fn clone_repository(url: &str, dest: &Path) -> Result<(), GitToolingError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let dest = dest.to_string_lossy().into_owned();
    run_git(None, &["clone", url, dest.as_str()], None).await?;
    Ok(())
}

/// Resolve the branch new work should be cut from.
///
/// Preference order: the caller-supplied branch (when it exists in the
/// clone), then `main`, then `master`, then whatever HEAD currently
/// points at.
pub async fn resolve_base_branch(
    repo: &Path,
    preferred: Option<&str>,
) -> Result<String, GitToolingError> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(preferred) = preferred.filter(|name| !name.is_empty()) {
        candidates.push(preferred);
    }
    candidates.extend(["main", "master"]);
    for candidate in candidates {
        if branch_exists(repo, candidate).await? {
            return Ok(candidate.to_string());
        }
    }
    current_head(repo).await
}

async fn branch_exists(repo: &Path, name: &str) -> Result<bool, GitToolingError> {
    let local = format!("refs/heads/{name}");
    let remote = format!("refs/remotes/origin/{name}");
    for reference in [local, remote] {
        let result = run_git(
            Some(repo),
            &["show-ref", "--verify", "--quiet", reference.as_str()],
            None,
        )
        .await;
        match result {
            Ok(_) => return Ok(true),
            Err(GitToolingError::CommandFailed { .. }) => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(false)
}

/// Name of the branch HEAD points at (or the literal `HEAD` when
/// detached).
pub async fn current_head(repo: &Path) -> Result<String, GitToolingError> {
    let output = run_git(Some(repo), &["rev-parse", "--abbrev-ref", "HEAD"], None).await?;
    Ok(output.trim().to_string())
}

/// Create and check out `branch` starting at `base`.
pub async fn create_work_branch(
    repo: &Path,
    branch: &str,
    base: &str,
) -> Result<(), GitToolingError> {
    run_git(Some(repo), &["checkout", "-B", branch, base], None).await?;
    Ok(())
}

/// Apply a unified diff to the working tree.
pub async fn apply_unified_diff(repo: &Path, diff: &str) -> Result<(), GitToolingError> {
    run_git(
        Some(repo),
        &["apply", "--whitespace=nowarn", "--recount"],
        Some(diff),
    )
    .await?;
    Ok(())
}

/// Working-tree diff restricted to `paths` (repo-relative). Empty
/// `paths` yields an empty diff rather than the whole tree.
pub async fn diff_paths(repo: &Path, paths: &[String]) -> Result<String, GitToolingError> {
    if paths.is_empty() {
        return Ok(String::new());
    }
    let mut args: Vec<&str> = vec!["diff", "--"];
    args.extend(paths.iter().map(String::as_str));
    run_git(Some(repo), &args, None).await
}
