use chrono::Utc;
use concerto_protocol::AGENT_IMPLEMENTER;
use concerto_protocol::AGENT_TESTER;
use concerto_protocol::ARTIFACT_IMPLEMENTOR;
use concerto_protocol::ARTIFACT_PLAN;
use concerto_protocol::ARTIFACT_REVIEW;
use concerto_protocol::HandoffUpdate;
use concerto_protocol::ImplementorArtifact;
use concerto_protocol::ImplementorHandoff;
use concerto_protocol::NextAction;
use concerto_protocol::Phase;
use concerto_protocol::PlanArtifact;
use concerto_protocol::ReviewDecision;
use concerto_protocol::RunHandoff;
use concerto_protocol::RunStatus;
use concerto_protocol::handoff_snapshot_name;
use tracing::info;

use crate::agents::ReviewRequest;
use crate::artifacts::try_read_artifact;
use crate::artifacts::write_artifact;
use crate::error::EngineError;
use crate::handoff_io::write_handoff;

use super::PhaseContext;
use super::PhaseOutcome;
use super::implement::expand_plan;
use super::implement::injected_files;
use super::implement::workspace_root;

pub(super) async fn run(
    ctx: &PhaseContext<'_>,
    mut handoff: RunHandoff,
) -> Result<PhaseOutcome, EngineError> {
    let plan: PlanArtifact = try_read_artifact(&ctx.run_dir, ARTIFACT_PLAN)
        .await?
        .ok_or_else(|| EngineError::Validation("plan artifact is missing".to_string()))?;
    let implementor: ImplementorArtifact = try_read_artifact(&ctx.run_dir, ARTIFACT_IMPLEMENTOR)
        .await?
        .ok_or_else(|| EngineError::Validation("implementor artifact is missing".to_string()))?;
    let repo_root = workspace_root(&handoff)?;

    let (_, allowed) = expand_plan(&plan, repo_root.as_path())?;
    let implementor_handoff = ImplementorHandoff {
        task_id: handoff.task.id.clone(),
        prompt: handoff.task.prompt.clone(),
        plan,
        files: injected_files(repo_root.as_path(), &allowed).await?,
        feedback: Vec::new(),
        implementor: Some(implementor.clone()),
    };
    if let Some(snapshot) = handoff_snapshot_name(Phase::Review) {
        write_artifact(&ctx.run_dir, snapshot.as_str(), &implementor_handoff).await?;
    }

    let review = ctx
        .agents
        .review(ReviewRequest {
            handoff: &implementor_handoff,
            implementor: &implementor,
            repo_root: repo_root.as_path(),
        })
        .await
        .map_err(|err| EngineError::Executor(format!("Reviewer failed: {err}")))?;
    super::ensure_not_cancelled(&ctx.run_dir).await?;
    write_artifact(&ctx.run_dir, ARTIFACT_REVIEW, &review).await?;

    let reasons = if review.reasons.is_empty() {
        "no reasons given".to_string()
    } else {
        review.reasons.join("; ")
    };
    match review.decision {
        ReviewDecision::Approved => {
            let updated = handoff.update(HandoffUpdate {
                phase: Phase::Review,
                status: RunStatus::Completed,
                artifact: ARTIFACT_REVIEW.to_string(),
                ended_at: Utc::now(),
                next: Some(NextAction {
                    agent: AGENT_TESTER.to_string(),
                    input_artifacts: vec![
                        ARTIFACT_IMPLEMENTOR.to_string(),
                        ARTIFACT_REVIEW.to_string(),
                    ],
                    instructions: Vec::new(),
                }),
                artifacts: None,
                note: None,
            });
            write_handoff(&ctx.run_dir, &updated).await?;
            Ok(PhaseOutcome {
                next: Some(Phase::Test),
            })
        }
        ReviewDecision::Rejected => {
            if handoff.state.iteration >= handoff.state.max_iterations {
                return Err(EngineError::Executor(format!("Reviewer rejected: {reasons}")));
            }
            info!(
                run_id = ctx.run_id,
                iteration = handoff.state.iteration,
                "review rejected; sending back to the implementor"
            );
            handoff.state.iteration += 1;
            let updated = handoff.update(HandoffUpdate {
                phase: Phase::Review,
                status: RunStatus::Completed,
                artifact: ARTIFACT_REVIEW.to_string(),
                ended_at: Utc::now(),
                next: Some(NextAction {
                    agent: AGENT_IMPLEMENTER.to_string(),
                    input_artifacts: vec![
                        ARTIFACT_PLAN.to_string(),
                        ARTIFACT_REVIEW.to_string(),
                    ],
                    instructions: review.reasons,
                }),
                artifacts: None,
                note: Some(format!("Reviewer rejected: {reasons}")),
            });
            write_handoff(&ctx.run_dir, &updated).await?;
            Ok(PhaseOutcome {
                next: Some(Phase::Implement),
            })
        }
        // Blocked ignores the retry budget on purpose.
        ReviewDecision::Blocked => Err(EngineError::Executor(format!(
            "Reviewer blocked: {reasons}"
        ))),
    }
}
