use chrono::Utc;
use concerto_protocol::AGENT_IMPLEMENTER;
use concerto_protocol::ARTIFACT_PLAN;
use concerto_protocol::HandoffUpdate;
use concerto_protocol::NextAction;
use concerto_protocol::Phase;
use concerto_protocol::PlanArtifact;
use concerto_protocol::RunHandoff;
use concerto_protocol::RunStatus;
use tracing::warn;

use crate::agents::PlanRequest;
use crate::artifacts::write_artifact;
use crate::error::EngineError;
use crate::handoff_io::write_handoff;
use crate::workspace::WorkspaceRequest;

use super::PhaseContext;
use super::PhaseOutcome;

pub(super) async fn run(
    ctx: &PhaseContext<'_>,
    mut handoff: RunHandoff,
) -> Result<PhaseOutcome, EngineError> {
    let url = handoff.run.repo.url.clone();
    if url.trim().is_empty() {
        return Err(EngineError::Validation(
            "run has no repository url".to_string(),
        ));
    }

    let dest = ctx.config.workspace_dir(ctx.run_id);
    let branch = format!(
        "{}/{}",
        ctx.config.branch_prefix,
        slug(handoff.task.prompt.as_str())
    );
    let preferred_base = Some(handoff.run.repo.base_branch.as_str())
        .filter(|base| !base.is_empty());
    let prepared = ctx
        .workspace
        .prepare(WorkspaceRequest {
            url: url.as_str(),
            dest: dest.as_path(),
            preferred_base,
            branch: branch.as_str(),
        })
        .await?;
    handoff.run.repo.root = prepared.root.to_string_lossy().into_owned();
    handoff.run.repo.branch = prepared.branch;
    handoff.run.repo.base_branch = prepared.base_branch;

    let plan = invoke_planner(ctx, &handoff).await?;
    super::ensure_not_cancelled(&ctx.run_dir).await?;
    write_artifact(&ctx.run_dir, ARTIFACT_PLAN, &plan).await?;

    let mut constraints = handoff.constraints.clone().unwrap_or_default();
    constraints.require_tests_for_behavior_change = Some(plan.requires_tests());
    handoff.constraints = Some(constraints);
    let updated = handoff.update(HandoffUpdate {
        phase: Phase::Plan,
        status: RunStatus::Completed,
        artifact: ARTIFACT_PLAN.to_string(),
        ended_at: Utc::now(),
        next: Some(NextAction {
            agent: AGENT_IMPLEMENTER.to_string(),
            input_artifacts: vec![ARTIFACT_PLAN.to_string()],
            instructions: Vec::new(),
        }),
        artifacts: None,
        note: None,
    });
    write_handoff(&ctx.run_dir, &updated).await?;
    Ok(PhaseOutcome {
        next: Some(Phase::Implement),
    })
}

async fn invoke_planner(
    ctx: &PhaseContext<'_>,
    handoff: &RunHandoff,
) -> Result<PlanArtifact, EngineError> {
    let repo_root = std::path::PathBuf::from(handoff.run.repo.root.as_str());
    let mut last_error = String::new();
    for attempt in 1..=ctx.config.max_plan_retries.max(1) {
        match ctx
            .agents
            .plan(PlanRequest {
                handoff,
                repo_root: repo_root.as_path(),
            })
            .await
        {
            Ok(plan) => return Ok(plan),
            Err(err) => {
                warn!(run_id = ctx.run_id, attempt, "planner failed: {err}");
                last_error = err.to_string();
            }
        }
    }
    Err(EngineError::Executor(format!("Planner failed: {last_error}")))
}

/// Branch-name slug of the task prompt: lowercase alphanumerics joined
/// by single dashes, capped at 40 characters.
fn slug(prompt: &str) -> String {
    let mut out = String::new();
    let mut pending_dash = false;
    for ch in prompt.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if out.len() >= 40 {
            break;
        }
    }
    if out.is_empty() {
        "task".to_string()
    } else {
        out
    }
}
