use std::collections::BTreeSet;
use std::path::Component;
use std::path::Path;

use concerto_protocol::FileAction;
use concerto_protocol::FileActionKind;
use concerto_protocol::ImplementorStepResult;

use crate::error::EngineError;
use crate::workspace::WorkspaceOps;

/// The one shape every implementor-proposed change is reduced to before
/// it touches the working tree. Both executor result flavors (explicit
/// file actions, unified diff) funnel through here so the allowed-files
/// constraint is enforced in a single place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mutation {
    WriteFile { path: String, content: String },
    DeleteFile { path: String },
    ApplyPatch { diff: String },
}

impl Mutation {
    pub(crate) fn from_step_result(
        result: &ImplementorStepResult,
    ) -> Result<Vec<Mutation>, EngineError> {
        if let Some(actions) = result.actions.as_ref().filter(|actions| !actions.is_empty()) {
            return actions.iter().map(Mutation::from_action).collect();
        }
        if let Some(diff) = result
            .diff
            .as_deref()
            .map(str::trim)
            .filter(|diff| !diff.is_empty())
        {
            return Ok(vec![Mutation::ApplyPatch {
                diff: diff.to_string(),
            }]);
        }
        Err(EngineError::Validation(
            "implementor result carries neither file actions nor a diff".to_string(),
        ))
    }

    fn from_action(action: &FileAction) -> Result<Mutation, EngineError> {
        match action.action {
            FileActionKind::Write => {
                let content = action.content.clone().ok_or_else(|| {
                    EngineError::Validation(format!(
                        "write action for {} carries no content",
                        action.path
                    ))
                })?;
                Ok(Mutation::WriteFile {
                    path: action.path.clone(),
                    content,
                })
            }
            FileActionKind::Delete => Ok(Mutation::DeleteFile {
                path: action.path.clone(),
            }),
        }
    }

    /// Repo-relative paths this mutation touches.
    pub(crate) fn touched_paths(&self) -> Vec<String> {
        match self {
            Mutation::WriteFile { path, .. } | Mutation::DeleteFile { path } => vec![path.clone()],
            Mutation::ApplyPatch { diff } => patch_paths(diff),
        }
    }
}

/// Paths referenced by a unified diff, in order of first appearance.
pub(crate) fn patch_paths(diff: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in diff.lines() {
        let candidate = line
            .strip_prefix("--- a/")
            .or_else(|| line.strip_prefix("+++ b/"))
            .or_else(|| line.strip_prefix("--- "))
            .or_else(|| line.strip_prefix("+++ "));
        let Some(candidate) = candidate else { continue };
        let candidate = candidate
            .split('\t')
            .next()
            .unwrap_or(candidate)
            .trim();
        if candidate.is_empty() || candidate == "/dev/null" {
            continue;
        }
        // Bare `--- path` headers keep any a/ b/ prefix git added.
        let candidate = candidate
            .strip_prefix("a/")
            .or_else(|| candidate.strip_prefix("b/"))
            .unwrap_or(candidate);
        if !paths.iter().any(|existing| existing == candidate) {
            paths.push(candidate.to_string());
        }
    }
    paths
}

/// Reject paths that escape the repository or fall outside the plan's
/// allowed set.
pub(crate) fn check_allowed(
    paths: &[String],
    allowed: &BTreeSet<String>,
) -> Result<(), EngineError> {
    for path in paths {
        let parsed = Path::new(path);
        let escapes = parsed.is_absolute()
            || parsed
                .components()
                .any(|component| matches!(component, Component::ParentDir));
        if escapes {
            return Err(EngineError::Validation(format!(
                "path escapes the repository root: {path}"
            )));
        }
        if !allowed.contains(path) {
            return Err(EngineError::Validation(format!(
                "path is not in allowed_files: {path}"
            )));
        }
    }
    Ok(())
}

/// Apply mutations in order, enforcing the allowed set uniformly.
/// Returns the repo-relative paths that changed, in first-touched order.
pub(crate) async fn apply_mutations(
    workspace: &dyn WorkspaceOps,
    repo_root: &Path,
    allowed: &BTreeSet<String>,
    mutations: Vec<Mutation>,
) -> Result<Vec<String>, EngineError> {
    let mut changed: Vec<String> = Vec::new();
    for mutation in mutations {
        let touched = mutation.touched_paths();
        check_allowed(&touched, allowed)?;
        match mutation {
            Mutation::WriteFile { path, content } => {
                let target = repo_root.join(&path);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&target, content).await?;
            }
            Mutation::DeleteFile { path } => {
                match tokio::fs::remove_file(repo_root.join(&path)).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
            Mutation::ApplyPatch { diff } => {
                workspace.apply_patch(repo_root, diff.as_str()).await?;
            }
        }
        for path in touched {
            if !changed.contains(&path) {
                changed.push(path);
            }
        }
    }
    Ok(changed)
}
