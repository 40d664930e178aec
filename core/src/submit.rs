use chrono::Utc;
use concerto_protocol::AGENT_PLANNER;
use concerto_protocol::CreateQueuedParams;
use concerto_protocol::NextAction;
use concerto_protocol::Phase;
use concerto_protocol::RepoInfo;
use concerto_protocol::RunHandoff;
use concerto_protocol::TaskInfo;
use concerto_protocol::canonical_artifacts;
use concerto_state::QueueStore;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::error::EngineError;
use crate::handoff_io::write_handoff;
use crate::handoff_io::write_json_atomic;

pub const TASK_FILENAME: &str = "task.json";

pub struct SubmitParams {
    pub task: String,
    pub repo_url: String,
    pub keep_workspace: bool,
    pub base_branch: Option<String>,
}

pub struct Submission {
    pub run_id: String,
    /// False when the queue looks unattended (queued work, no worker).
    pub worker_detected: bool,
}

/// Create the run directory and its queued handoff without touching the
/// queue. Shared by [`submit`] and the manual single-phase commands.
pub async fn create_run(config: &Config, params: &SubmitParams) -> Result<String, EngineError> {
    let run_id = Uuid::now_v7().to_string();
    let run_dir = config.run_dir(run_id.as_str());
    tokio::fs::create_dir_all(&run_dir).await?;

    let task = TaskInfo {
        id: run_id.clone(),
        prompt: params.task.clone(),
        mode: "pipeline".to_string(),
    };
    write_json_atomic(&run_dir.join(TASK_FILENAME), &task).await?;
    let TaskInfo { id, prompt, mode } = task;

    let handoff = RunHandoff::create_queued(CreateQueuedParams {
        run_id: run_id.clone(),
        created_at: Utc::now(),
        repo: RepoInfo {
            root: String::new(),
            branch: String::new(),
            base_branch: params.base_branch.clone().unwrap_or_default(),
            url: params.repo_url.clone(),
        },
        keep_workspace: params.keep_workspace,
        task_id: id,
        prompt,
        mode,
        artifacts: canonical_artifacts(),
        next: NextAction {
            agent: AGENT_PLANNER.to_string(),
            input_artifacts: Vec::new(),
            instructions: Vec::new(),
        },
        max_iterations: config.max_review_retries,
    });
    write_handoff(&run_dir, &handoff).await?;
    Ok(run_id)
}

/// Submit a run: write its directory, enqueue the first `plan` job, and
/// report whether a worker appears to be draining the queue.
pub async fn submit(
    config: &Config,
    store: &QueueStore,
    params: SubmitParams,
) -> Result<Submission, EngineError> {
    let run_id = create_run(config, &params).await?;
    store.enqueue(run_id.as_str(), Phase::Plan).await?;
    info!(run_id = run_id.as_str(), "run submitted");

    let stats = store.stats().await?;
    let worker_detected =
        !(stats.queued > 0 && stats.in_progress == 0 && stats.lease_count == 0);
    if !worker_detected {
        warn!("no active worker detected; start one with `concerto worker`");
    }
    Ok(Submission {
        run_id,
        worker_detected,
    })
}
