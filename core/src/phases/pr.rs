use std::path::Path;

use chrono::Utc;
use concerto_protocol::ARTIFACT_PR_DRAFT;
use concerto_protocol::HandoffUpdate;
use concerto_protocol::Phase;
use concerto_protocol::PrDraft;
use concerto_protocol::PrDraftRepo;
use concerto_protocol::RunHandoff;
use concerto_protocol::RunStatus;
use tracing::warn;

use crate::artifacts::write_artifact;
use crate::error::EngineError;
use crate::handoff_io::write_handoff;

use super::PhaseContext;
use super::PhaseOutcome;

/// Terminal phase: record the PR draft, complete the run, and clean up
/// the workspace unless the submitter asked to keep it. Publishing the
/// draft is an external collaborator's job.
pub(super) async fn run(
    ctx: &PhaseContext<'_>,
    handoff: RunHandoff,
) -> Result<PhaseOutcome, EngineError> {
    super::ensure_not_cancelled(&ctx.run_dir).await?;
    let draft = PrDraft {
        task_id: handoff.task.id.clone(),
        status: PrDraft::STATUS_READY.to_string(),
        repo: PrDraftRepo {
            root: handoff.run.repo.root.clone(),
            branch: handoff.run.repo.branch.clone(),
            base_branch: handoff.run.repo.base_branch.clone(),
        },
    };
    write_artifact(&ctx.run_dir, ARTIFACT_PR_DRAFT, &draft).await?;

    let keep_workspace = handoff.run.keep_workspace;
    let workspace_root = handoff.run.repo.root.clone();
    let updated = handoff.update(HandoffUpdate {
        phase: Phase::Pr,
        status: RunStatus::Completed,
        artifact: ARTIFACT_PR_DRAFT.to_string(),
        ended_at: Utc::now(),
        next: None,
        artifacts: None,
        note: None,
    });
    write_handoff(&ctx.run_dir, &updated).await?;

    if !keep_workspace && !workspace_root.is_empty() {
        // The run is already completed; a failed cleanup is only noise.
        if let Err(err) = ctx.workspace.remove(Path::new(&workspace_root)).await {
            warn!(run_id = ctx.run_id, "failed to remove workspace: {err}");
        }
    }
    Ok(PhaseOutcome { next: None })
}
