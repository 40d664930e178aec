use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use chrono::Utc;
use concerto_protocol::AGENT_IMPLEMENTER;
use concerto_protocol::AGENT_REVIEWER;
use concerto_protocol::ARTIFACT_IMPLEMENTOR;
use concerto_protocol::ARTIFACT_PLAN;
use concerto_protocol::HandoffUpdate;
use concerto_protocol::ImplementorArtifact;
use concerto_protocol::ImplementorHandoff;
use concerto_protocol::NextAction;
use concerto_protocol::Phase;
use concerto_protocol::PlanArtifact;
use concerto_protocol::PlanStep;
use concerto_protocol::RunHandoff;
use concerto_protocol::RunStatus;
use concerto_protocol::StepOutcome;
use concerto_protocol::handoff_snapshot_name;
use globset::GlobBuilder;
use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::agents::ImplementRequest;
use crate::artifacts::try_read_artifact;
use crate::artifacts::write_artifact;
use crate::error::EngineError;
use crate::handoff_io::write_handoff;

use super::PhaseContext;
use super::PhaseOutcome;
use super::mutation::Mutation;
use super::mutation::apply_mutations;

#[derive(Serialize)]
struct FailedStepAttempt<'a> {
    step_id: &'a str,
    attempt: u32,
    message: &'a str,
}

pub(super) async fn run(
    ctx: &PhaseContext<'_>,
    handoff: RunHandoff,
) -> Result<PhaseOutcome, EngineError> {
    let plan: PlanArtifact = try_read_artifact(&ctx.run_dir, ARTIFACT_PLAN)
        .await?
        .ok_or_else(|| EngineError::Validation("plan artifact is missing".to_string()))?;
    let repo_root = workspace_root(&handoff)?;
    let (steps, allowed) = expand_plan(&plan, repo_root.as_path())?;

    // Reviewer feedback rides on `next.instructions` when the run loops
    // back from a rejection.
    let feedback = handoff
        .next
        .as_ref()
        .filter(|next| next.agent == AGENT_IMPLEMENTER)
        .map(|next| next.instructions.clone())
        .unwrap_or_default();
    let mut implementor_handoff = ImplementorHandoff {
        task_id: handoff.task.id.clone(),
        prompt: handoff.task.prompt.clone(),
        plan,
        files: injected_files(repo_root.as_path(), &allowed).await?,
        feedback,
        implementor: None,
    };
    if let Some(snapshot) = handoff_snapshot_name(Phase::Implement) {
        write_artifact(&ctx.run_dir, snapshot.as_str(), &implementor_handoff).await?;
    }

    let mut outcomes: Vec<StepOutcome> = Vec::new();
    let mut changed_files: Vec<String> = Vec::new();
    let mut failure_count: u32 = 0;
    for step in &steps {
        let mut applied = false;
        let mut attempts = 0;
        let mut last_error = String::new();
        let mut summary = None;
        while attempts < ctx.config.max_implementor_retries.max(1) {
            attempts += 1;
            match attempt_step(ctx, &implementor_handoff, step, repo_root.as_path(), &allowed).await
            {
                Ok(AttemptOutcome::Applied { paths, note }) => {
                    for path in paths {
                        if !changed_files.contains(&path) {
                            changed_files.push(path);
                        }
                    }
                    summary = note;
                    applied = true;
                }
                Ok(AttemptOutcome::Rejected { message }) => {
                    warn!(
                        run_id = ctx.run_id,
                        step = step.id.as_str(),
                        attempts,
                        "implementor attempt rejected: {message}"
                    );
                    failure_count += 1;
                    let failed = FailedStepAttempt {
                        step_id: step.id.as_str(),
                        attempt: attempts,
                        message: message.as_str(),
                    };
                    write_artifact(
                        &ctx.run_dir,
                        format!("implementor.failed.{failure_count}.json").as_str(),
                        &failed,
                    )
                    .await?;
                    last_error = message;
                }
                Err(err) => return Err(err),
            }
            // The next attempt (or step) sees the tree as it now stands.
            implementor_handoff.files = injected_files(repo_root.as_path(), &allowed).await?;
            if applied {
                break;
            }
        }
        if !applied {
            return Err(EngineError::Executor(format!(
                "Implementor failed on step {}: {last_error}",
                step.id
            )));
        }
        outcomes.push(StepOutcome {
            step_id: step.id.clone(),
            attempts,
            summary,
        });
    }

    super::ensure_not_cancelled(&ctx.run_dir).await?;
    let diff = ctx
        .workspace
        .diff(repo_root.as_path(), changed_files.as_slice())
        .await?;
    let artifact = ImplementorArtifact {
        task_id: handoff.task.id.clone(),
        steps: outcomes,
        changed_files,
        diff,
    };
    write_artifact(&ctx.run_dir, ARTIFACT_IMPLEMENTOR, &artifact).await?;

    let updated = handoff.update(HandoffUpdate {
        phase: Phase::Implement,
        status: RunStatus::Completed,
        artifact: ARTIFACT_IMPLEMENTOR.to_string(),
        ended_at: Utc::now(),
        next: Some(NextAction {
            agent: AGENT_REVIEWER.to_string(),
            input_artifacts: vec![ARTIFACT_PLAN.to_string(), ARTIFACT_IMPLEMENTOR.to_string()],
            instructions: Vec::new(),
        }),
        artifacts: None,
        note: None,
    });
    write_handoff(&ctx.run_dir, &updated).await?;
    Ok(PhaseOutcome {
        next: Some(Phase::Review),
    })
}

enum AttemptOutcome {
    Applied {
        paths: Vec<String>,
        note: Option<String>,
    },
    /// The executor answered but its result could not be applied;
    /// consumes one retry.
    Rejected { message: String },
}

async fn attempt_step(
    ctx: &PhaseContext<'_>,
    implementor_handoff: &ImplementorHandoff,
    step: &PlanStep,
    repo_root: &Path,
    allowed: &BTreeSet<String>,
) -> Result<AttemptOutcome, EngineError> {
    let result = match ctx
        .agents
        .implement_step(ImplementRequest {
            handoff: implementor_handoff,
            step,
            repo_root,
        })
        .await
    {
        Ok(result) => result,
        Err(err) => {
            return Ok(AttemptOutcome::Rejected {
                message: err.to_string(),
            });
        }
    };
    let mutations = match Mutation::from_step_result(&result) {
        Ok(mutations) => mutations,
        Err(EngineError::Validation(message)) => return Ok(AttemptOutcome::Rejected { message }),
        Err(err) => return Err(err),
    };
    match apply_mutations(ctx.workspace, repo_root, allowed, mutations).await {
        Ok(paths) => Ok(AttemptOutcome::Applied {
            paths,
            note: result.summary,
        }),
        Err(EngineError::Validation(message)) => Ok(AttemptOutcome::Rejected { message }),
        // A patch git refuses to apply is a bad executor answer, not a
        // run-fatal fault.
        Err(EngineError::Git(err)) => Ok(AttemptOutcome::Rejected {
            message: err.to_string(),
        }),
        Err(err) => Err(err),
    }
}

pub(super) fn workspace_root(handoff: &RunHandoff) -> Result<PathBuf, EngineError> {
    let root = handoff.run.repo.root.as_str();
    if root.is_empty() {
        return Err(EngineError::Validation(
            "run has no workspace; plan has not completed".to_string(),
        ));
    }
    Ok(PathBuf::from(root))
}

/// Expand glob patterns in `allowed_files` and `steps[].file` against the
/// repository root. Each glob step becomes one step per match with a
/// synthesized `<id>#<n>` id; non-glob entries pass through verbatim.
pub(super) fn expand_plan(
    plan: &PlanArtifact,
    repo_root: &Path,
) -> Result<(Vec<PlanStep>, BTreeSet<String>), EngineError> {
    let tree = repo_files(repo_root);

    let mut allowed: BTreeSet<String> = BTreeSet::new();
    for entry in &plan.allowed_files {
        if is_glob(entry) {
            allowed.extend(matching_files(entry, &tree)?);
        } else {
            allowed.insert(entry.clone());
        }
    }

    let mut steps: Vec<PlanStep> = Vec::new();
    for step in &plan.steps {
        if is_glob(step.file.as_str()) {
            for (index, file) in matching_files(step.file.as_str(), &tree)?.iter().enumerate() {
                steps.push(PlanStep {
                    id: format!("{}#{}", step.id, index + 1),
                    file: file.clone(),
                    description: step.description.clone(),
                });
            }
        } else {
            steps.push(step.clone());
        }
    }
    Ok((steps, allowed))
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Repo-relative file paths, `.git` excluded, sorted.
fn repo_files(repo_root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(repo_root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(repo_root)
                .ok()
                .map(|path| path.to_string_lossy().into_owned())
        })
        .collect();
    files.sort();
    files
}

fn matching_files(pattern: &str, tree: &[String]) -> Result<Vec<String>, EngineError> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map_err(|err| EngineError::Validation(format!("invalid glob pattern {pattern:?}: {err}")))?
        .compile_matcher();
    Ok(tree
        .iter()
        .filter(|path| glob.is_match(path.as_str()))
        .cloned()
        .collect())
}

/// Current contents of every allowed file that exists on disk.
pub(super) async fn injected_files(
    repo_root: &Path,
    allowed: &BTreeSet<String>,
) -> Result<BTreeMap<String, String>, EngineError> {
    let mut files = BTreeMap::new();
    for path in allowed {
        match tokio::fs::read_to_string(repo_root.join(path)).await {
            Ok(contents) => {
                files.insert(path.clone(), contents);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            // Binary or unreadable content is simply not injected.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(files)
}
