use std::path::Path;
use std::path::PathBuf;

use concerto_protocol::Phase;
use concerto_protocol::RunStatus;

use crate::agents::PhaseAgents;
use crate::config::Config;
use crate::error::EngineError;
use crate::handoff_io::read_handoff;
use crate::handoff_io::write_handoff;
use crate::workspace::WorkspaceOps;

mod implement;
mod mutation;
mod plan;
mod pr;
mod review;

/// What the worker does after a phase completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseOutcome {
    /// Phase to enqueue once the finished job is acked; `None` ends the
    /// run.
    pub next: Option<Phase>,
}

pub(crate) struct PhaseContext<'a> {
    pub(crate) config: &'a Config,
    pub(crate) agents: &'a dyn PhaseAgents,
    pub(crate) workspace: &'a dyn WorkspaceOps,
    pub(crate) run_id: &'a str,
    pub(crate) run_dir: PathBuf,
}

/// Execute one phase of one run against its handoff on disk.
///
/// Cancellation is observed here, before any side effect: a handoff
/// already marked cancelled aborts the phase and leaves the document
/// untouched. Otherwise the handoff is stamped in-progress for the
/// phase, the dispatcher runs, and the dispatcher's terminal handoff
/// write records the transition.
pub async fn execute(
    config: &Config,
    agents: &dyn PhaseAgents,
    workspace: &dyn WorkspaceOps,
    run_id: &str,
    phase: Phase,
) -> Result<PhaseOutcome, EngineError> {
    let run_dir = config.run_dir(run_id);
    let mut handoff = read_handoff(&run_dir).await?;
    if handoff.state.status == RunStatus::Cancelled {
        return Err(EngineError::Cancelled);
    }
    handoff.state.phase = phase;
    handoff.state.status = RunStatus::InProgress;
    write_handoff(&run_dir, &handoff).await?;

    let ctx = PhaseContext {
        config,
        agents,
        workspace,
        run_id,
        run_dir,
    };
    match phase {
        Phase::Plan => plan::run(&ctx, handoff).await,
        Phase::Implement => implement::run(&ctx, handoff).await,
        Phase::Review => review::run(&ctx, handoff).await,
        Phase::Test => test::run(&ctx, handoff).await,
        Phase::Pr => pr::run(&ctx, handoff).await,
    }
}

/// Phase-boundary cancellation check: re-read the handoff from disk and
/// abort before the phase commits its completion, so a cancel landing
/// mid-execution is never overwritten.
pub(crate) async fn ensure_not_cancelled(run_dir: &Path) -> Result<(), EngineError> {
    let current = read_handoff(run_dir).await?;
    if current.state.status == RunStatus::Cancelled {
        return Err(EngineError::Cancelled);
    }
    Ok(())
}
