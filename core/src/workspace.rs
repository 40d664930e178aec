use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use concerto_git_tooling::apply_unified_diff;
use concerto_git_tooling::clone_repository;
use concerto_git_tooling::create_work_branch;
use concerto_git_tooling::diff_paths;
use concerto_git_tooling::resolve_base_branch;

use crate::error::EngineError;

pub struct WorkspaceRequest<'a> {
    pub url: &'a str,
    pub dest: &'a Path,
    /// Caller-supplied base branch; `None` resolves main → master → HEAD.
    pub preferred_base: Option<&'a str>,
    pub branch: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWorkspace {
    pub root: PathBuf,
    pub branch: String,
    pub base_branch: String,
}

/// Git workspace seam the phase dispatchers run against.
///
/// The engine never touches a repository directly; everything goes
/// through this trait so tests can substitute an in-memory double.
#[async_trait]
pub trait WorkspaceOps: Send + Sync {
    /// Clone the repository, resolve the base branch, and create the
    /// work branch.
    async fn prepare(
        &self,
        request: WorkspaceRequest<'_>,
    ) -> Result<PreparedWorkspace, EngineError>;

    async fn apply_patch(&self, repo_root: &Path, diff: &str) -> Result<(), EngineError>;

    /// Working-tree diff restricted to the given repo-relative paths.
    async fn diff(&self, repo_root: &Path, paths: &[String]) -> Result<String, EngineError>;

    /// Delete the workspace directory. Missing directories are fine.
    async fn remove(&self, repo_root: &Path) -> Result<(), EngineError>;
}

/// The production implementation, backed by the `git` CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitWorkspace;

#[async_trait]
impl WorkspaceOps for GitWorkspace {
    async fn prepare(
        &self,
        request: WorkspaceRequest<'_>,
    ) -> Result<PreparedWorkspace, EngineError> {
        clone_repository(request.url, request.dest).await?;
        let base_branch = resolve_base_branch(request.dest, request.preferred_base).await?;
        create_work_branch(request.dest, request.branch, base_branch.as_str()).await?;
        Ok(PreparedWorkspace {
            root: request.dest.to_path_buf(),
            branch: request.branch.to_string(),
            base_branch,
        })
    }

    async fn apply_patch(&self, repo_root: &Path, diff: &str) -> Result<(), EngineError> {
        Ok(apply_unified_diff(repo_root, diff).await?)
    }

    async fn diff(&self, repo_root: &Path, paths: &[String]) -> Result<String, EngineError> {
        Ok(diff_paths(repo_root, paths).await?)
    }

    async fn remove(&self, repo_root: &Path) -> Result<(), EngineError> {
        match tokio::fs::remove_dir_all(repo_root).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
